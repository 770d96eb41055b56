//! Resolution cache for role and permission sets
//!
//! Entries are tagged by principal (or role) id and by the relation table
//! they were read from. Mutations invalidate tags after the store write
//! commits. Backends that cannot invalidate by tag are never used for
//! memoization: every read against them is a live store query.

mod lru_tag;

pub use lru_tag::LruTagCache;

use crate::config::TableNames;
use crate::core::model::{AssignedRole, GrantedPermission, Permission, Role, RoleId, TeamId, UserId};
use crate::core::store::EntityStore;
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Label attached to cache entries for bulk invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheTag {
    User(UserId),
    Role(RoleId),
    Table(String),
}

/// What a cache entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    UserRoles,
    UserPermissions,
    RolePermissions,
}

/// Cache key: kind, subject id and scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: CacheKind,
    pub subject: u64,
    pub scope: Option<TeamId>,
}

impl CacheKey {
    pub fn user_roles(user: UserId, scope: Option<TeamId>) -> Self {
        CacheKey { kind: CacheKind::UserRoles, subject: user, scope }
    }

    pub fn user_permissions(user: UserId, scope: Option<TeamId>) -> Self {
        CacheKey { kind: CacheKind::UserPermissions, subject: user, scope }
    }

    pub fn role_permissions(role: RoleId) -> Self {
        CacheKey { kind: CacheKind::RolePermissions, subject: role, scope: None }
    }
}

/// Cached value, shared between readers
#[derive(Debug, Clone)]
pub enum CachedValue {
    Roles(Arc<Vec<AssignedRole>>),
    Grants(Arc<Vec<GrantedPermission>>),
    Permissions(Arc<Vec<Permission>>),
}

impl CachedValue {
    /// `base` plus a `Role` tag for every role record held in the value
    ///
    /// A role set embeds whole role records, so it goes stale when any of
    /// those roles is updated.
    pub fn tags_with(&self, base: &[CacheTag]) -> Vec<CacheTag> {
        let mut tags = base.to_vec();
        if let CachedValue::Roles(roles) = self {
            for assigned in roles.iter() {
                let tag = CacheTag::Role(assigned.role.id);
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }
        tags
    }
}

/// Key/value cache backend
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedValue>>;

    fn put(&self, key: CacheKey, tags: &[CacheTag], ttl: Duration, value: CachedValue) -> Result<()>;

    /// Tag invalidation capability, if the backend has one
    fn as_tagged(&self) -> Option<&dyn SupportsTaggedInvalidation> {
        None
    }

    /// Return the cached value or compute and store it
    ///
    /// The stored entry carries [`CachedValue::tags_with`]`(tags)`. Backend
    /// failures are logged and bypassed; only `compute` errors propagate.
    fn get_or_compute(
        &self,
        key: CacheKey,
        tags: &[CacheTag],
        ttl: Duration,
        compute: &mut dyn FnMut() -> Result<CachedValue>,
    ) -> Result<CachedValue> {
        match self.get(&key) {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => warn!("Cache read failed for {:?}, using live query: {}", key, e),
        }

        let value = compute()?;
        if let Err(e) = self.put(key, &value.tags_with(tags), ttl, value.clone()) {
            warn!("Cache write failed for {:?}: {}", key, e);
        }
        Ok(value)
    }
}

/// Backends able to drop every entry carrying a tag
pub trait SupportsTaggedInvalidation: CacheBackend {
    fn invalidate(&self, tags: &[CacheTag]) -> Result<()>;
}

/// Backend that stores nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughCache;

impl CacheBackend for PassThroughCache {
    fn get(&self, _key: &CacheKey) -> Result<Option<CachedValue>> {
        Ok(None)
    }

    fn put(&self, _key: CacheKey, _tags: &[CacheTag], _ttl: Duration, _value: CachedValue) -> Result<()> {
        Ok(())
    }
}

/// Per-principal role and grant sets, read through a cache backend
pub struct ResolutionCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    tables: TableNames,
}

impl ResolutionCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration, tables: TableNames) -> Self {
        ResolutionCache { backend, ttl, tables }
    }

    /// Cache that always queries the store
    pub fn uncached(tables: TableNames) -> Self {
        Self::new(Arc::new(PassThroughCache), Duration::from_secs(0), tables)
    }

    /// True if reads are memoized
    pub fn is_memoizing(&self) -> bool {
        self.backend.as_tagged().is_some()
    }

    /// Raw role assignments of a user in scope, expired ones included
    pub fn assigned_roles(
        &self,
        store: &dyn EntityStore,
        user: UserId,
        scope: Option<TeamId>,
    ) -> Result<Arc<Vec<AssignedRole>>> {
        let key = CacheKey::user_roles(user, scope);
        let tags = [CacheTag::User(user), CacheTag::Table(self.tables.role_user.clone())];
        let mut compute = || -> Result<CachedValue> {
            Ok(CachedValue::Roles(Arc::new(store.role_assignments_of(user, scope)?)))
        };

        match self.fetch(key, &tags, &mut compute)? {
            CachedValue::Roles(roles) => Ok(roles),
            _ => Ok(Arc::new(store.role_assignments_of(user, scope)?)),
        }
    }

    /// Roles of a user that are active at `now`
    ///
    /// Expiry is applied on every read, so a cached set never resurrects an
    /// expired assignment.
    pub fn roles_for(
        &self,
        store: &dyn EntityStore,
        user: UserId,
        scope: Option<TeamId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Role>> {
        Ok(self
            .assigned_roles(store, user, scope)?
            .iter()
            .filter(|assigned| assigned.is_active(now))
            .map(|assigned| assigned.role.clone())
            .collect())
    }

    /// Direct grants of a user in scope
    pub fn permissions_for(
        &self,
        store: &dyn EntityStore,
        user: UserId,
        scope: Option<TeamId>,
    ) -> Result<Arc<Vec<GrantedPermission>>> {
        let key = CacheKey::user_permissions(user, scope);
        let tags = [CacheTag::User(user), CacheTag::Table(self.tables.permission_user.clone())];
        let mut compute = || -> Result<CachedValue> {
            Ok(CachedValue::Grants(Arc::new(store.direct_permissions_of(user, scope)?)))
        };

        match self.fetch(key, &tags, &mut compute)? {
            CachedValue::Grants(grants) => Ok(grants),
            _ => Ok(Arc::new(store.direct_permissions_of(user, scope)?)),
        }
    }

    /// Permissions linked directly to a role
    pub fn role_permissions(&self, store: &dyn EntityStore, role: RoleId) -> Result<Arc<Vec<Permission>>> {
        let key = CacheKey::role_permissions(role);
        let tags = [CacheTag::Role(role), CacheTag::Table(self.tables.permission_role.clone())];
        let mut compute = || -> Result<CachedValue> {
            Ok(CachedValue::Permissions(Arc::new(store.permissions_of(role)?)))
        };

        match self.fetch(key, &tags, &mut compute)? {
            CachedValue::Permissions(permissions) => Ok(permissions),
            _ => Ok(Arc::new(store.permissions_of(role)?)),
        }
    }

    /// Drop every entry for a user
    pub fn invalidate_user(&self, user: UserId) {
        self.invalidate(&[CacheTag::User(user)]);
    }

    /// Drop the cached permission set of a role
    pub fn invalidate_role(&self, role: RoleId) {
        self.invalidate(&[CacheTag::Role(role)]);
    }

    /// Drop every entry read from a relation table
    pub fn invalidate_table(&self, table: &str) {
        self.invalidate(&[CacheTag::Table(table.to_string())]);
    }

    /// Best-effort tag invalidation
    pub fn invalidate(&self, tags: &[CacheTag]) {
        if let Some(tagged) = self.backend.as_tagged() {
            if let Err(e) = tagged.invalidate(tags) {
                warn!("Cache invalidation failed for {:?}: {}", tags, e);
            }
        }
    }

    fn fetch(
        &self,
        key: CacheKey,
        tags: &[CacheTag],
        compute: &mut dyn FnMut() -> Result<CachedValue>,
    ) -> Result<CachedValue> {
        if self.backend.as_tagged().is_none() {
            return compute();
        }
        self.backend.get_or_compute(key, tags, self.ttl, compute)
    }
}
