//! LRU cache backend with tag invalidation

use super::{CacheBackend, CacheKey, CacheTag, CachedValue, SupportsTaggedInvalidation};
use crate::error::{AuthzError, Result};
use ahash::{AHashMap, AHashSet};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::warn;

struct Entry {
    value: CachedValue,
    tags: Vec<CacheTag>,
    expires_at: Instant,
}

struct Inner {
    entries: LruCache<CacheKey, Entry>,
    index: AHashMap<CacheTag, AHashSet<CacheKey>>,
    /// Bumped on every invalidation
    generation: u64,
}

impl Inner {
    fn unlink(&mut self, key: &CacheKey, tags: &[CacheTag]) {
        for tag in tags {
            if let Some(keys) = self.index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.index.remove(tag);
                }
            }
        }
    }

    fn insert(&mut self, key: CacheKey, entry: Entry) {
        for tag in &entry.tags {
            self.index.entry(tag.clone()).or_default().insert(key);
        }
        if let Some((evicted_key, evicted)) = self.entries.push(key, entry) {
            if evicted_key != key {
                self.unlink(&evicted_key, &evicted.tags);
            }
        }
    }

    fn remove(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.pop(key) {
            self.unlink(key, &entry.tags);
        }
    }
}

/// In-process LRU cache whose entries expire and can be dropped by tag
pub struct LruTagCache {
    inner: Mutex<Inner>,
}

impl LruTagCache {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| AuthzError::Config("cache capacity must be at least 1".to_string()))?;

        Ok(LruTagCache {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                index: AHashMap::new(),
                generation: 0,
            }),
        })
    }

    /// Clear the cache
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.index.clear();
        inner.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    fn lookup(&self, key: &CacheKey) -> (Option<CachedValue>, u64) {
        let mut inner = self.inner.lock();
        let generation = inner.generation;

        let expired = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return (Some(entry.value.clone()), generation);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.remove(key);
        }
        (None, generation)
    }
}

impl CacheBackend for LruTagCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedValue>> {
        Ok(self.lookup(key).0)
    }

    fn put(&self, key: CacheKey, tags: &[CacheTag], ttl: Duration, value: CachedValue) -> Result<()> {
        let entry = Entry {
            value,
            tags: tags.to_vec(),
            expires_at: Instant::now() + ttl,
        };
        let mut inner = self.inner.lock();
        inner.remove(&key);
        inner.insert(key, entry);
        Ok(())
    }

    fn as_tagged(&self) -> Option<&dyn SupportsTaggedInvalidation> {
        Some(self)
    }

    /// Computes outside the lock and skips the fill if an invalidation ran
    /// in the meantime.
    fn get_or_compute(
        &self,
        key: CacheKey,
        tags: &[CacheTag],
        ttl: Duration,
        compute: &mut dyn FnMut() -> Result<CachedValue>,
    ) -> Result<CachedValue> {
        let (cached, generation) = self.lookup(&key);
        if let Some(value) = cached {
            return Ok(value);
        }

        let value = compute()?;

        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.remove(&key);
            inner.insert(
                key,
                Entry {
                    tags: value.tags_with(tags),
                    value: value.clone(),
                    expires_at: Instant::now() + ttl,
                },
            );
        } else {
            warn!("Skipping cache fill for {:?}: invalidated during compute", key);
        }
        Ok(value)
    }
}

impl SupportsTaggedInvalidation for LruTagCache {
    fn invalidate(&self, tags: &[CacheTag]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.generation += 1;

        for tag in tags {
            let keys: Vec<CacheKey> = match inner.index.remove(tag) {
                Some(keys) => keys.into_iter().collect(),
                None => continue,
            };
            for key in keys {
                inner.remove(&key);
            }
        }
        Ok(())
    }
}
