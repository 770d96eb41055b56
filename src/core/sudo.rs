//! Session-scoped sudo elevation
//!
//! Permissions held through a protected role require the principal to have
//! recently re-confirmed their identity. Elevation is stored as an expiry
//! timestamp in a session store, keyed per session and principal.

use crate::core::model::UserId;
use ahash::AHashMap;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Default elevation lifetime
pub const DEFAULT_SUDO_TTL_MINUTES: i64 = 15;

/// Per-session key/value storage for elevation expiries
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<DateTime<Utc>>;
    fn put(&self, key: &str, expires_at: DateTime<Utc>);
    fn forget(&self, key: &str);
}

/// In-process session store
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<AHashMap<String, DateTime<Utc>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.read().get(key).copied()
    }

    fn put(&self, key: &str, expires_at: DateTime<Utc>) {
        self.entries.write().insert(key.to_string(), expires_at);
    }

    fn forget(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

/// Tracks sudo elevation per session and principal
pub struct SudoTracker {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
}

impl SudoTracker {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        SudoTracker { store, ttl }
    }

    /// Elevation lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Activate or query elevation
    ///
    /// With `activate`, stores `now + ttl` and returns `true`. Otherwise
    /// returns `true` only if a stored expiry exists and is strictly after
    /// `now`.
    pub fn sudo_mode(&self, session: Option<&str>, user: UserId, activate: bool, now: DateTime<Utc>) -> bool {
        let key = Self::key(session, user);

        if activate {
            let expires_at = now + self.ttl;
            self.store.put(&key, expires_at);
            debug!("Sudo mode activated for user {} until {}", user, expires_at);
            return true;
        }

        match self.store.get(&key) {
            Some(expires_at) if now < expires_at => true,
            Some(_) => {
                self.store.forget(&key);
                debug!("Sudo mode for user {} expired", user);
                false
            }
            None => false,
        }
    }

    /// Drop elevation before it expires
    pub fn revoke(&self, session: Option<&str>, user: UserId) {
        self.store.forget(&Self::key(session, user));
    }

    fn key(session: Option<&str>, user: UserId) -> String {
        match session {
            Some(session) => format!("sudo_mode:{}:{}", session, user),
            None => format!("sudo_mode:{}", user),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SudoTracker {
        SudoTracker::new(
            Arc::new(MemorySessionStore::new()),
            Duration::minutes(DEFAULT_SUDO_TTL_MINUTES),
        )
    }

    #[test]
    fn test_inactive_by_default() {
        let sudo = tracker();
        assert!(!sudo.sudo_mode(None, 1, false, Utc::now()));
    }

    #[test]
    fn test_activation_expires() {
        let sudo = tracker();
        let start = Utc::now();

        assert!(sudo.sudo_mode(None, 1, true, start));
        assert!(sudo.sudo_mode(None, 1, false, start));
        assert!(sudo.sudo_mode(None, 1, false, start + Duration::minutes(14)));

        // Expiry is exclusive
        assert!(!sudo.sudo_mode(None, 1, false, start + Duration::minutes(15)));
        assert!(!sudo.sudo_mode(None, 1, false, start + Duration::minutes(16)));
    }

    #[test]
    fn test_keyed_per_session_and_user() {
        let sudo = tracker();
        let now = Utc::now();

        sudo.sudo_mode(Some("session-a"), 1, true, now);
        assert!(sudo.sudo_mode(Some("session-a"), 1, false, now));
        assert!(!sudo.sudo_mode(Some("session-b"), 1, false, now));
        assert!(!sudo.sudo_mode(Some("session-a"), 2, false, now));
    }

    #[test]
    fn test_revoke() {
        let sudo = tracker();
        let now = Utc::now();

        sudo.sudo_mode(None, 1, true, now);
        sudo.revoke(None, 1);
        assert!(!sudo.sudo_mode(None, 1, false, now));
    }

    #[test]
    fn test_lapsed_elevation_is_evicted() {
        let sessions = Arc::new(MemorySessionStore::new());
        let sudo = SudoTracker::new(sessions.clone(), Duration::minutes(DEFAULT_SUDO_TTL_MINUTES));
        let now = Utc::now();

        sudo.sudo_mode(Some("session-a"), 1, true, now);
        sudo.sudo_mode(Some("session-b"), 1, true, now);
        assert_eq!(sessions.len(), 2);

        assert!(sudo.sudo_mode(Some("session-a"), 1, false, now));
        assert_eq!(sessions.len(), 2);

        assert!(!sudo.sudo_mode(Some("session-a"), 1, false, now + Duration::hours(1)));
        assert_eq!(sessions.len(), 1);
    }
}
