//! Role and permission resolution
//!
//! Provides:
//! - Roles with parent hierarchies, expiring and team-scoped assignments
//! - Direct permission grants with explicit denials that always win
//! - Wildcard name matching (`project.*`)
//! - Time and IP access rules per role
//! - Context rules and prerequisite chains per permission
//! - Sudo elevation for permissions held through protected roles
//! - Tag-invalidated resolution caching and audit events for every change

pub mod audit;
pub mod cache;
pub mod context;
pub mod dependency;
pub mod engine;
pub mod model;
pub mod pattern;
pub mod rules;
pub mod store;
pub mod sudo;
pub mod validation;

pub use audit::{AuditEvent, AuditEventKind, AuditLogger, AuditSink, MemoryAuditSink, NullAuditSink};
pub use cache::{
    CacheBackend, CacheKey, CacheTag, CachedValue, LruTagCache, PassThroughCache, ResolutionCache,
    SupportsTaggedInvalidation,
};
pub use context::{AttributeFn, AttributeSource, ContextMatcher, ContextRules, NoAttributes};
pub use dependency::{DependencyResolver, DependencyTrail};
pub use engine::{AbilityChecks, AbilityOptions, AbilityOutcome, Authorizer, EvaluationContext, ReturnType};
pub use model::{
    scope_applies, AccessKind, AccessRequest, AccessRequestStatus, AssignedRole, GrantedPermission, Permission,
    PermissionGrant, PermissionId, Role, RoleAssignment, RoleId, TeamId, UserId, DEFAULT_GUARD,
};
pub use pattern::PatternMatcher;
pub use rules::{AccessRuleEvaluator, AccessRules, Day, TimeWindow};
pub use store::{EntityStore, MemoryStore};
pub use sudo::{MemorySessionStore, SessionStore, SudoTracker, DEFAULT_SUDO_TTL_MINUTES};
