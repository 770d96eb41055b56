//! # Rolegate - Role and Permission Authorization
//!
//! `rolegate-rs` answers "does this principal hold this role or permission?"
//! for multi-tenant applications. It supports:
//!
//! - **Roles and permissions** with wildcard names (`project.*`) and guards
//! - **Team scopes**, expiring assignments and role hierarchies
//! - **Explicit denials** that override every grant
//! - **Access rules** restricting roles by IP and weekly schedule
//! - **Context rules**, prerequisite chains and sudo elevation per permission
//! - **Tag-invalidated caching** and an audit trail for every change
//!
//! ## Quick Start
//!
//! ```rust
//! use rolegate::{AuthorizerBuilder, EntityStore, EvaluationContext, MemoryStore, Result};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let editor = store.create_role("editor", "web")?;
//! let publish = store.create_permission("posts.publish", "web")?;
//! store.attach_role_permission(editor.id, publish.id)?;
//!
//! let authz = AuthorizerBuilder::new().store(store).build()?;
//!
//! let ctx = EvaluationContext::new(42);
//! authz.attach_role(&ctx, editor.id, None)?;
//!
//! assert!(authz.has_role(&ctx, &["editor"], false, None));
//! assert!(authz.can(&ctx, &["posts.publish"], false, None, None));
//! assert!(!authz.can(&ctx, &["posts.delete"], false, None, None));
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```rust,no_run
//! use rolegate::{AuthorizerBuilder, EngineConfig, MemoryStore, Result};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let config = EngineConfig::from_file("rolegate.toml")?;
//!
//! let authz = AuthorizerBuilder::new()
//!     .config(config)
//!     .store(Arc::new(MemoryStore::new()))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;

pub use crate::core::validation;

pub use crate::config::{AutoAssignConfig, CacheConfig, EngineConfig, TableNames};
pub use crate::core::{
    AbilityChecks, AbilityOptions, AbilityOutcome, AccessKind, AccessRequest, AccessRequestStatus, AccessRuleEvaluator,
    AccessRules, AttributeFn, AttributeSource, AuditEvent, AuditEventKind, AuditLogger, AuditSink, Authorizer,
    CacheBackend, CacheTag, ContextMatcher, ContextRules, Day, EntityStore, EvaluationContext, LruTagCache,
    MemoryAuditSink, MemorySessionStore, MemoryStore, NoAttributes, NullAuditSink, PassThroughCache, PatternMatcher,
    Permission, PermissionId, ResolutionCache, ReturnType, Role, RoleAssignment, RoleId, SessionStore, SudoTracker,
    SupportsTaggedInvalidation, TeamId, TimeWindow, UserId,
};
pub use crate::error::{AuthzError, Result};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Builder for creating an [`Authorizer`] with custom collaborators
///
/// Only the entity store is required. Unless overridden:
/// - the cache is an [`LruTagCache`] sized from `config.cache`, or a
///   [`PassThroughCache`] when caching is disabled
/// - sudo state lives in a [`MemorySessionStore`]
/// - audit events are discarded ([`NullAuditSink`])
///
/// # Examples
///
/// ```rust
/// use rolegate::{AuthorizerBuilder, MemoryAuditSink, MemoryStore};
/// use std::sync::Arc;
///
/// # fn main() -> rolegate::Result<()> {
/// let authz = AuthorizerBuilder::new()
///     .store(Arc::new(MemoryStore::new()))
///     .audit(Arc::new(MemoryAuditSink::new()))
///     .without_cache()
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct AuthorizerBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn EntityStore>>,
    cache: Option<Arc<dyn CacheBackend>>,
    sessions: Option<Arc<dyn SessionStore>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl AuthorizerBuilder {
    /// Create a new AuthorizerBuilder with default settings
    pub fn new() -> Self {
        AuthorizerBuilder {
            config: EngineConfig::default(),
            store: None,
            cache: None,
            sessions: None,
            audit: None,
        }
    }

    /// Use this configuration instead of the defaults
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the entity store (required)
    pub fn store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set a custom cache backend
    pub fn cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Read every decision straight from the store
    pub fn without_cache(mut self) -> Self {
        self.cache = Some(Arc::new(PassThroughCache));
        self
    }

    /// Set the session store used for sudo elevation
    pub fn sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Set the audit sink
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Build the authorizer
    pub fn build(self) -> Result<Authorizer> {
        self.config.check()?;

        let store = self
            .store
            .ok_or_else(|| AuthzError::Config("entity store must be set".to_string()))?;

        let backend: Arc<dyn CacheBackend> = match self.cache {
            Some(cache) => cache,
            None if self.config.cache.enabled => Arc::new(LruTagCache::new(self.config.cache.capacity)?),
            None => Arc::new(PassThroughCache),
        };
        let cache = ResolutionCache::new(
            backend,
            Duration::from_secs(self.config.cache.ttl_seconds),
            self.config.tables.clone(),
        );
        debug!("Resolution cache memoizing: {}", cache.is_memoizing());

        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new()));
        let sudo = SudoTracker::new(sessions, chrono::Duration::minutes(self.config.sudo_ttl_minutes));

        let audit = self.audit.unwrap_or_else(|| Arc::new(NullAuditSink));

        info!(
            "Building authorizer (guard '{}', protected roles {:?})",
            self.config.default_guard, self.config.protected_roles
        );
        Ok(Authorizer::new(store, cache, sudo, audit, self.config))
    }
}

impl Default for AuthorizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
