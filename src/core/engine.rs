//! Authorization engine
//!
//! Answers role and permission questions for one principal at a time and
//! applies assignment changes. Every decision takes an explicit
//! [`EvaluationContext`] carrying the principal, the team scope, the caller's
//! IP and the clock, so one [`Authorizer`] can be shared across threads and
//! tenants.
//!
//! Decision order for a single permission name:
//! 1. A matching denial grant rejects immediately.
//! 2. The permission is looked up among direct grants, then among the
//!    permissions of each active role (child before parent).
//! 3. Context rules, when a context is supplied.
//! 4. Sudo elevation, when the permission came through a protected role.
//! 5. Every prerequisite named in `depends_on`.
//!
//! Decisions never fail: missing records and store errors resolve to `false`.

use crate::config::EngineConfig;
use crate::core::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::core::cache::{CacheTag, ResolutionCache};
use crate::core::context::{AttributeSource, ContextMatcher, NoAttributes};
use crate::core::dependency::{DependencyResolver, DependencyTrail};
use crate::core::model::{
    AccessKind, AccessRequest, AccessRequestStatus, GrantedPermission, Permission, PermissionGrant,
    PermissionId, Role, RoleAssignment, RoleId, TeamId, UserId,
};
use crate::core::pattern::PatternMatcher;
use crate::core::rules::AccessRuleEvaluator;
use crate::core::store::EntityStore;
use crate::core::sudo::SudoTracker;
use crate::core::validation::validate_name;
use crate::error::{AuthzError, Result};
use ahash::AHashSet;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Who is asking, for which team, from where and when
#[derive(Clone)]
pub struct EvaluationContext {
    pub user: UserId,
    /// Team scope; `None` evaluates across every team
    pub scope: Option<TeamId>,
    pub ip: Option<String>,
    /// Clock reading; access-rule schedules are read in this offset
    pub now: DateTime<FixedOffset>,
    /// Session key for sudo elevation
    pub session: Option<String>,
    /// Principal performing a mutation, recorded in audit events
    pub actor: Option<UserId>,
    /// Attributes of the principal, read by context rules and auto-assignment
    pub attributes: Arc<dyn AttributeSource>,
}

impl EvaluationContext {
    pub fn new(user: UserId) -> Self {
        EvaluationContext {
            user,
            scope: None,
            ip: None,
            now: Utc::now().fixed_offset(),
            session: None,
            actor: None,
            attributes: Arc::new(NoAttributes),
        }
    }

    pub fn with_scope(mut self, team: Option<TeamId>) -> Self {
        self.scope = team;
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn at(mut self, now: DateTime<FixedOffset>) -> Self {
        self.now = now;
        self
    }

    pub fn at_utc(mut self, now: DateTime<Utc>) -> Self {
        self.now = now.fixed_offset();
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn acting_as(mut self, actor: UserId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_attributes(mut self, attributes: Arc<dyn AttributeSource>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        self.now.with_timezone(&Utc)
    }
}

impl fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("user", &self.user)
            .field("scope", &self.scope)
            .field("ip", &self.ip)
            .field("now", &self.now)
            .field("session", &self.session)
            .field("actor", &self.actor)
            .finish_non_exhaustive()
    }
}

/// Shape of an [`Authorizer::ability`] result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    #[default]
    Boolean,
    Array,
    Both,
}

impl FromStr for ReturnType {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "boolean" => Ok(ReturnType::Boolean),
            "array" => Ok(ReturnType::Array),
            "both" => Ok(ReturnType::Both),
            other => Err(AuthzError::InvalidArgument(format!(
                "return_type must be one of boolean, array, both (got '{}')",
                other
            ))),
        }
    }
}

/// Options for [`Authorizer::ability`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbilityOptions {
    /// Require every item to pass instead of any
    pub validate_all: bool,
    pub return_type: ReturnType,
}

impl AbilityOptions {
    pub fn validate_all(mut self, validate_all: bool) -> Self {
        self.validate_all = validate_all;
        self
    }

    pub fn return_type(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self
    }

    /// Parse untyped options such as `{"validate_all": true, "return_type": "both"}`
    ///
    /// Missing keys take their defaults. A non-boolean `validate_all` or an
    /// unknown `return_type` is an invalid argument.
    pub fn from_value(options: &Value) -> Result<Self> {
        let map = match options {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(AuthzError::InvalidArgument(format!(
                    "ability options must be an object (got {})",
                    other
                )))
            }
        };

        let validate_all = match map.get("validate_all") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(AuthzError::InvalidArgument(format!(
                    "validate_all must be a boolean (got {})",
                    other
                )))
            }
        };

        let return_type = match map.get("return_type") {
            None | Some(Value::Null) => ReturnType::Boolean,
            Some(Value::String(s)) => s.parse()?,
            Some(other) => {
                return Err(AuthzError::InvalidArgument(format!(
                    "return_type must be a string (got {})",
                    other
                )))
            }
        };

        Ok(AbilityOptions { validate_all, return_type })
    }
}

/// Per-item results of an ability check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityChecks {
    pub roles: BTreeMap<String, bool>,
    pub permissions: BTreeMap<String, bool>,
}

/// Result of [`Authorizer::ability`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbilityOutcome {
    Boolean(bool),
    Checks(AbilityChecks),
    Both(bool, AbilityChecks),
}

impl AbilityOutcome {
    /// Overall decision, unless only the per-item maps were requested
    pub fn granted(&self) -> Option<bool> {
        match self {
            AbilityOutcome::Boolean(granted) | AbilityOutcome::Both(granted, _) => Some(*granted),
            AbilityOutcome::Checks(_) => None,
        }
    }

    pub fn checks(&self) -> Option<&AbilityChecks> {
        match self {
            AbilityOutcome::Boolean(_) => None,
            AbilityOutcome::Checks(checks) | AbilityOutcome::Both(_, checks) => Some(checks),
        }
    }

    /// `true`, `{"roles": .., "permissions": ..}` or `[true, {..}]`
    pub fn to_value(&self) -> Value {
        match self {
            AbilityOutcome::Boolean(granted) => Value::Bool(*granted),
            AbilityOutcome::Checks(checks) => json!(checks),
            AbilityOutcome::Both(granted, checks) => json!([granted, checks]),
        }
    }
}

/// Role and grant sets loaded once per decision call
struct Snapshot {
    roles: Vec<Role>,
    grants: Arc<Vec<GrantedPermission>>,
}

/// A permission found for the principal
struct Resolved {
    permission: Permission,
    /// Came through a protected role
    needs_sudo: bool,
}

/// Principal recorded as the actor of an administrative change
fn acting(ctx: &EvaluationContext) -> Option<UserId> {
    ctx.actor.or(Some(ctx.user))
}

/// Run `check` over `names` with OR (`require_all = false`) or AND semantics
///
/// Stops at the first decisive item. With no decisive item the result is
/// `require_all`, so an empty AND list is vacuously true.
fn aggregate<N, F>(names: &[N], require_all: bool, mut check: F) -> bool
where
    N: AsRef<str>,
    F: FnMut(&str) -> bool,
{
    for name in names {
        let held = check(name.as_ref());
        if held && !require_all {
            return true;
        }
        if !held && require_all {
            return false;
        }
    }
    require_all
}

/// The authorization engine
pub struct Authorizer {
    store: Arc<dyn EntityStore>,
    cache: ResolutionCache,
    sudo: SudoTracker,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
}

impl Authorizer {
    /// Assemble an engine from its collaborators
    ///
    /// [`AuthorizerBuilder`](crate::AuthorizerBuilder) wires defaults from an
    /// [`EngineConfig`].
    pub fn new(
        store: Arc<dyn EntityStore>,
        cache: ResolutionCache,
        sudo: SudoTracker,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Self {
        Authorizer { store, cache, sudo, audit, config }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// True if the role is protected by its flag or by configuration
    pub fn is_protected(&self, role: &Role) -> bool {
        role.protected || self.config.is_protected_name(&role.name)
    }

    // --- decisions ---

    /// Check whether the principal holds the named roles
    ///
    /// A role counts if an unexpired assignment in scope exists and its name
    /// wildcard-matches. `guard = None` accepts any guard.
    pub fn has_role<N: AsRef<str>>(
        &self,
        ctx: &EvaluationContext,
        names: &[N],
        require_all: bool,
        guard: Option<&str>,
    ) -> bool {
        let roles = self.active_roles(ctx);

        let result = aggregate(names, require_all, |name| {
            roles
                .iter()
                .any(|role| PatternMatcher::matches_scoped(name, guard, &role.name, &role.guard))
        });
        debug!(
            "has_role user={} scope={:?} roles={:?} require_all={} -> {}",
            ctx.user,
            ctx.scope,
            names.iter().map(|n| n.as_ref()).collect::<Vec<&str>>(),
            require_all,
            result
        );
        result
    }

    /// Check whether the principal holds the named permissions
    ///
    /// `context` is checked against each found permission's context rules;
    /// it is not passed on to prerequisites.
    pub fn can<N: AsRef<str>>(
        &self,
        ctx: &EvaluationContext,
        names: &[N],
        require_all: bool,
        guard: Option<&str>,
        context: Option<&dyn AttributeSource>,
    ) -> bool {
        let snapshot = self.snapshot(ctx);

        aggregate(names, require_all, |name| {
            let mut trail = DependencyTrail::new();
            self.can_single(ctx, &snapshot, name, guard, context, &mut trail)
        })
    }

    /// [`can`](Self::can) with dotted-path fallback
    ///
    /// `project.1.task.5` is tried, then `project.1.task`, then `project.1`
    /// and finally `project`.
    pub fn can_inherited(&self, ctx: &EvaluationContext, name: &str, context: Option<&dyn AttributeSource>) -> bool {
        let snapshot = self.snapshot(ctx);
        let mut current = name;

        loop {
            let mut trail = DependencyTrail::new();
            if self.can_single(ctx, &snapshot, current, None, context, &mut trail) {
                return true;
            }

            match current.rfind('.') {
                Some(idx) => current = &current[..idx],
                None => return false,
            }
        }
    }

    /// Check roles and permissions together
    ///
    /// Every item is checked on its own. With `validate_all` the overall
    /// result requires every item to pass, otherwise any one item.
    pub fn ability<R: AsRef<str>, P: AsRef<str>>(
        &self,
        ctx: &EvaluationContext,
        roles: &[R],
        permissions: &[P],
        options: AbilityOptions,
    ) -> AbilityOutcome {
        let mut checks = AbilityChecks::default();

        for role in roles {
            let held = self.has_role(ctx, &[role.as_ref()], false, None);
            checks.roles.insert(role.as_ref().to_string(), held);
        }

        let snapshot = self.snapshot(ctx);
        for permission in permissions {
            let mut trail = DependencyTrail::new();
            let held = self.can_single(ctx, &snapshot, permission.as_ref(), None, None, &mut trail);
            checks.permissions.insert(permission.as_ref().to_string(), held);
        }

        let mut results = checks.roles.values().chain(checks.permissions.values());
        let granted = if options.validate_all {
            results.all(|held| *held)
        } else {
            results.any(|held| *held)
        };

        match options.return_type {
            ReturnType::Boolean => AbilityOutcome::Boolean(granted),
            ReturnType::Array => AbilityOutcome::Checks(checks),
            ReturnType::Both => AbilityOutcome::Both(granted, checks),
        }
    }

    /// [`ability`](Self::ability) with untyped options, returning JSON
    pub fn ability_json<R: AsRef<str>, P: AsRef<str>>(
        &self,
        ctx: &EvaluationContext,
        roles: &[R],
        permissions: &[P],
        options: &Value,
    ) -> Result<Value> {
        let options = AbilityOptions::from_value(options)?;
        Ok(self.ability(ctx, roles, permissions, options).to_value())
    }

    /// Check a role's own permissions, then its ancestors'
    pub fn role_has_permission<N: AsRef<str>>(
        &self,
        role: &Role,
        names: &[N],
        require_all: bool,
        guard: Option<&str>,
    ) -> bool {
        aggregate(names, require_all, |name| self.find_in_role_chain(role, name, guard).is_some())
    }

    /// Highest rate limit among the principal's active roles
    pub fn rate_limit(&self, ctx: &EvaluationContext) -> u32 {
        self.active_roles(ctx)
            .iter()
            .filter_map(|role| role.rate_limit)
            .fold(self.config.default_rate_limit, u32::max)
    }

    // --- sudo ---

    /// Activate (`activate = true`) or query sudo elevation
    pub fn sudo_mode(&self, ctx: &EvaluationContext, activate: bool) -> bool {
        self.sudo
            .sudo_mode(ctx.session.as_deref(), ctx.user, activate, ctx.now_utc())
    }

    pub fn revoke_sudo(&self, ctx: &EvaluationContext) {
        self.sudo.revoke(ctx.session.as_deref(), ctx.user);
    }

    // --- lookups ---

    /// Find a role by name, preferring the default guard
    pub fn role_named(&self, name: &str) -> Result<Role> {
        if let Some(role) = self.store.find_role_by_name(name, Some(&self.config.default_guard))? {
            return Ok(role);
        }
        self.store
            .find_role_by_name(name, None)?
            .ok_or_else(|| AuthzError::RoleNotFound(name.to_string()))
    }

    /// Find a permission by name, preferring the default guard
    pub fn permission_named(&self, name: &str) -> Result<Permission> {
        if let Some(permission) = self
            .store
            .find_permission_by_name(name, Some(&self.config.default_guard))?
        {
            return Ok(permission);
        }
        self.store
            .find_permission_by_name(name, None)?
            .ok_or_else(|| AuthzError::PermissionNotFound(name.to_string()))
    }

    pub fn permissions_in_group(&self, group: &str) -> Result<Vec<Permission>> {
        self.store.permissions_in_group(group)
    }

    // --- principal mutations ---

    /// Assign a role to the principal in the context's scope
    pub fn attach_role(&self, ctx: &EvaluationContext, role: RoleId, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        let record = self
            .store
            .role(role)?
            .ok_or_else(|| AuthzError::RoleNotFound(role.to_string()))?;

        self.store.attach_role(RoleAssignment {
            user: ctx.user,
            role,
            team: ctx.scope,
            expires_at,
        })?;
        self.cache.invalidate_user(ctx.user);

        info!("Attached role '{}' to user {} (team {:?})", record.name, ctx.user, ctx.scope);
        if self.is_protected(&record) {
            warn!("Protected role '{}' attached to user {}", record.name, ctx.user);
        }

        let metadata = match expires_at {
            Some(expiry) => json!({ "expires_at": expiry.to_rfc3339() }),
            None => Value::Null,
        };
        self.emit(
            AuditEvent::new(AuditEventKind::RoleAttached, ctx.now_utc())
                .by(ctx.actor)
                .for_user(ctx.user)
                .with_role(role)
                .in_team(ctx.scope)
                .with_metadata(metadata),
        );
        Ok(())
    }

    /// Remove a role from the principal; an unscoped context removes it in every team
    pub fn detach_role(&self, ctx: &EvaluationContext, role: RoleId) -> Result<usize> {
        let removed = self.store.detach_role(ctx.user, role, ctx.scope)?;
        self.cache.invalidate_user(ctx.user);

        info!("Detached role {} from user {} (team {:?}, {} rows)", role, ctx.user, ctx.scope, removed);
        self.emit(
            AuditEvent::new(AuditEventKind::RoleDetached, ctx.now_utc())
                .by(ctx.actor)
                .for_user(ctx.user)
                .with_role(role)
                .in_team(ctx.scope),
        );
        Ok(removed)
    }

    pub fn attach_roles(&self, ctx: &EvaluationContext, roles: &[RoleId]) -> Result<()> {
        for role in roles {
            self.attach_role(ctx, *role, None)?;
        }
        Ok(())
    }

    /// Remove the given roles, or with `None` every role assigned in the context's scope
    pub fn detach_roles(&self, ctx: &EvaluationContext, roles: Option<&[RoleId]>) -> Result<usize> {
        let targets: Vec<RoleId> = match roles {
            Some(roles) => roles.to_vec(),
            None => {
                let mut seen = AHashSet::new();
                self.store
                    .role_assignments_of(ctx.user, ctx.scope)?
                    .into_iter()
                    .filter(|assigned| ctx.scope.is_none() || assigned.team == ctx.scope)
                    .map(|assigned| assigned.role.id)
                    .filter(|id| seen.insert(*id))
                    .collect()
            }
        };

        let mut removed = 0;
        for role in targets {
            removed += self.detach_role(ctx, role)?;
        }
        Ok(removed)
    }

    /// Grant (or with `denied`, explicitly deny) a permission to the principal
    pub fn attach_permission(&self, ctx: &EvaluationContext, permission: PermissionId, denied: bool) -> Result<()> {
        let record = self
            .store
            .permission(permission)?
            .ok_or_else(|| AuthzError::PermissionNotFound(permission.to_string()))?;

        self.store.attach_permission(PermissionGrant {
            user: ctx.user,
            permission,
            team: ctx.scope,
            is_denied: denied,
        })?;
        self.cache.invalidate_user(ctx.user);

        if denied {
            warn!("Permission '{}' denied for user {}", record.name, ctx.user);
        } else {
            info!("Granted permission '{}' to user {} (team {:?})", record.name, ctx.user, ctx.scope);
        }

        self.emit(
            AuditEvent::new(AuditEventKind::PermissionAttached, ctx.now_utc())
                .by(ctx.actor)
                .for_user(ctx.user)
                .with_permission(permission)
                .in_team(ctx.scope)
                .with_metadata(json!({ "is_denied": denied })),
        );
        Ok(())
    }

    pub fn detach_permission(&self, ctx: &EvaluationContext, permission: PermissionId) -> Result<usize> {
        let removed = self.store.detach_permission(ctx.user, permission, ctx.scope)?;
        self.cache.invalidate_user(ctx.user);

        info!(
            "Detached permission {} from user {} (team {:?}, {} rows)",
            permission, ctx.user, ctx.scope, removed
        );
        self.emit(
            AuditEvent::new(AuditEventKind::PermissionDetached, ctx.now_utc())
                .by(ctx.actor)
                .for_user(ctx.user)
                .with_permission(permission)
                .in_team(ctx.scope),
        );
        Ok(removed)
    }

    /// Drop every assignment and grant of the context's principal
    pub fn remove_user(&self, ctx: &EvaluationContext) -> Result<()> {
        self.store.remove_user(ctx.user)?;
        self.cache.invalidate_user(ctx.user);

        info!("Removed all access for user {}", ctx.user);
        self.emit(
            AuditEvent::new(AuditEventKind::UserRemoved, ctx.now_utc())
                .by(ctx.actor)
                .for_user(ctx.user),
        );
        Ok(())
    }

    /// Assign roles whose configured attribute patterns match the principal
    ///
    /// Returns the ids of roles newly attached. Rules naming unknown roles are
    /// skipped.
    pub fn run_auto_assignment(&self, ctx: &EvaluationContext) -> Result<Vec<RoleId>> {
        if !self.config.auto_assign.enabled {
            return Ok(Vec::new());
        }

        let held: AHashSet<RoleId> = self
            .cache
            .roles_for(self.store.as_ref(), ctx.user, ctx.scope, ctx.now_utc())?
            .iter()
            .map(|role| role.id)
            .collect();

        let mut attached = Vec::new();
        for (role_name, conditions) in &self.config.auto_assign.rules {
            let matched = conditions.iter().all(|(attribute, pattern)| {
                let value = match ctx.attributes.attribute(attribute) {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                };
                PatternMatcher::matches(pattern, &value)
            });
            if !matched {
                continue;
            }

            let role = match self.store.find_role_by_name(role_name, None)? {
                Some(role) => role,
                None => {
                    debug!("Auto-assign rule names unknown role '{}'", role_name);
                    continue;
                }
            };
            if held.contains(&role.id) || attached.contains(&role.id) {
                continue;
            }

            self.attach_role(ctx, role.id, None)?;
            attached.push(role.id);
        }
        Ok(attached)
    }

    // --- role mutations ---
    //
    // The context supplies the clock and the acting principal; the changed
    // record is addressed by id.

    /// Save changes to an existing role
    ///
    /// Cached role sets of every holder and the role's permission links are
    /// dropped, so new access rules, flags and parents apply immediately.
    pub fn update_role(&self, ctx: &EvaluationContext, role: Role) -> Result<()> {
        let id = role.id;
        let name = role.name.clone();
        self.store.update_role(role)?;
        self.cache.invalidate_role(id);

        info!("Updated role '{}' ({})", name, id);
        self.emit(
            AuditEvent::new(AuditEventKind::RoleUpdated, ctx.now_utc())
                .by(acting(ctx))
                .with_role(id)
                .with_metadata(json!({ "name": name })),
        );
        Ok(())
    }

    /// Save changes to an existing permission
    ///
    /// Permission records are embedded in role links and direct grants, so
    /// both relation tables are invalidated.
    pub fn update_permission(&self, ctx: &EvaluationContext, permission: Permission) -> Result<()> {
        let id = permission.id;
        let name = permission.name.clone();
        self.store.update_permission(permission)?;
        self.cache.invalidate(&[
            CacheTag::Table(self.config.tables.permission_role.clone()),
            CacheTag::Table(self.config.tables.permission_user.clone()),
        ]);

        info!("Updated permission '{}' ({})", name, id);
        self.emit(
            AuditEvent::new(AuditEventKind::PermissionUpdated, ctx.now_utc())
                .by(acting(ctx))
                .with_permission(id)
                .with_metadata(json!({ "name": name })),
        );
        Ok(())
    }

    pub fn attach_permission_to_role(&self, ctx: &EvaluationContext, role: RoleId, permission: PermissionId) -> Result<()> {
        self.store.attach_role_permission(role, permission)?;
        self.cache.invalidate_role(role);

        info!("Linked permission {} to role {}", permission, role);
        self.emit(
            AuditEvent::new(AuditEventKind::RolePermissionAttached, ctx.now_utc())
                .by(acting(ctx))
                .with_role(role)
                .with_permission(permission),
        );
        Ok(())
    }

    pub fn detach_permission_from_role(
        &self,
        ctx: &EvaluationContext,
        role: RoleId,
        permission: PermissionId,
    ) -> Result<usize> {
        let removed = self.store.detach_role_permission(role, permission)?;
        self.cache.invalidate_role(role);

        info!("Unlinked permission {} from role {}", permission, role);
        self.emit(
            AuditEvent::new(AuditEventKind::RolePermissionDetached, ctx.now_utc())
                .by(acting(ctx))
                .with_role(role)
                .with_permission(permission),
        );
        Ok(removed)
    }

    /// Replace a role's permissions; an empty list detaches all
    pub fn sync_role_permissions(&self, ctx: &EvaluationContext, role: RoleId, permissions: &[PermissionId]) -> Result<()> {
        self.store.sync_role_permissions(role, permissions)?;
        self.cache.invalidate(&[
            CacheTag::Role(role),
            CacheTag::Table(self.config.tables.permission_role.clone()),
        ]);

        info!("Synced role {} to {} permissions", role, permissions.len());
        self.emit(
            AuditEvent::new(AuditEventKind::RolePermissionsSynced, ctx.now_utc())
                .by(acting(ctx))
                .with_role(role)
                .with_metadata(json!({ "permissions": permissions })),
        );
        Ok(())
    }

    /// Delete a role
    ///
    /// A protected role that still has members active at the context's clock
    /// cannot be deleted.
    pub fn delete_role(&self, ctx: &EvaluationContext, role: RoleId) -> Result<()> {
        let record = self
            .store
            .role(role)?
            .ok_or_else(|| AuthzError::RoleNotFound(role.to_string()))?;

        if self.is_protected(&record) {
            let members = self.store.active_member_count(role, ctx.now_utc())?;
            if members > 0 {
                return Err(AuthzError::ProtectedRoleInUse { role: record.name, members });
            }
        }

        self.store.delete_role(role)?;
        self.cache.invalidate(&[
            CacheTag::Role(role),
            CacheTag::Table(self.config.tables.role_user.clone()),
        ]);

        info!("Deleted role '{}'", record.name);
        self.emit(
            AuditEvent::new(AuditEventKind::RoleDeleted, ctx.now_utc())
                .by(acting(ctx))
                .with_role(role)
                .with_metadata(json!({ "name": record.name })),
        );
        Ok(())
    }

    // --- access requests ---

    /// File a pending request for a role or permission
    pub fn request_access(
        &self,
        ctx: &EvaluationContext,
        kind: AccessKind,
        item: &str,
        reason: Option<&str>,
    ) -> Result<u64> {
        validate_name(item)?;
        let now = ctx.now_utc();

        let id = self.store.insert_access_request(AccessRequest {
            id: 0,
            user: ctx.user,
            kind,
            item: item.to_string(),
            reason: reason.map(str::to_string),
            status: AccessRequestStatus::Pending,
            created_at: now,
            updated_at: now,
        })?;

        info!("User {} requested {:?} '{}' (request {})", ctx.user, kind, item, id);
        self.emit(
            AuditEvent::new(AuditEventKind::AccessRequested, now)
                .by(acting(ctx))
                .for_user(ctx.user)
                .with_metadata(json!({ "request": id, "type": kind, "item": item })),
        );
        Ok(id)
    }

    /// Grant what a pending request asks for and mark it approved
    ///
    /// `ctx` is the approver's context; the grant lands in its scope at its
    /// clock.
    pub fn approve_access_request(&self, ctx: &EvaluationContext, id: u64) -> Result<AccessRequest> {
        let request = self.pending_request(id)?;

        let mut grantee = ctx.clone();
        grantee.user = request.user;
        grantee.actor = acting(ctx);
        grantee.attributes = Arc::new(NoAttributes);

        match request.kind {
            AccessKind::Role => {
                let role = self.role_named(&request.item)?;
                self.attach_role(&grantee, role.id, None)?;
            }
            AccessKind::Permission => {
                let permission = self.permission_named(&request.item)?;
                self.attach_permission(&grantee, permission.id, false)?;
            }
        }

        self.finish_request(ctx, request, AccessRequestStatus::Approved, AuditEventKind::AccessApproved)
    }

    /// Mark a pending request rejected
    pub fn reject_access_request(&self, ctx: &EvaluationContext, id: u64) -> Result<AccessRequest> {
        let request = self.pending_request(id)?;
        self.finish_request(ctx, request, AccessRequestStatus::Rejected, AuditEventKind::AccessRejected)
    }

    pub fn pending_access_requests(&self) -> Result<Vec<AccessRequest>> {
        self.store.pending_access_requests()
    }

    fn pending_request(&self, id: u64) -> Result<AccessRequest> {
        let request = self
            .store
            .access_request(id)?
            .ok_or(AuthzError::AccessRequestNotFound(id))?;

        if request.status != AccessRequestStatus::Pending {
            return Err(AuthzError::AccessRequestProcessed {
                id,
                status: request.status.to_string(),
            });
        }
        Ok(request)
    }

    fn finish_request(
        &self,
        ctx: &EvaluationContext,
        mut request: AccessRequest,
        status: AccessRequestStatus,
        kind: AuditEventKind,
    ) -> Result<AccessRequest> {
        let now = ctx.now_utc();
        self.store.update_access_request(request.id, status, now)?;
        request.status = status;
        request.updated_at = now;

        info!("Access request {} {}", request.id, status);
        self.emit(
            AuditEvent::new(kind, now)
                .by(acting(ctx))
                .for_user(request.user)
                .with_metadata(json!({ "request": request.id, "item": request.item })),
        );
        Ok(request)
    }

    // --- internals ---

    fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(&event) {
            warn!("Audit sink dropped {:?} event: {}", event.kind, e);
        }
    }

    fn active_roles(&self, ctx: &EvaluationContext) -> Vec<Role> {
        match self
            .cache
            .roles_for(self.store.as_ref(), ctx.user, ctx.scope, ctx.now_utc())
        {
            Ok(roles) => roles,
            Err(e) => {
                warn!("Failed to load roles for user {}: {}", ctx.user, e);
                Vec::new()
            }
        }
    }

    fn snapshot(&self, ctx: &EvaluationContext) -> Snapshot {
        let grants = match self.cache.permissions_for(self.store.as_ref(), ctx.user, ctx.scope) {
            Ok(grants) => grants,
            Err(e) => {
                warn!("Failed to load permissions for user {}: {}", ctx.user, e);
                Arc::new(Vec::new())
            }
        };

        Snapshot {
            roles: self.active_roles(ctx),
            grants,
        }
    }

    fn can_single(
        &self,
        ctx: &EvaluationContext,
        snapshot: &Snapshot,
        name: &str,
        guard: Option<&str>,
        context: Option<&dyn AttributeSource>,
        trail: &mut DependencyTrail,
    ) -> bool {
        let denied = snapshot.grants.iter().any(|grant| {
            grant.is_denied
                && PatternMatcher::matches_scoped(name, guard, &grant.permission.name, &grant.permission.guard)
        });
        if denied {
            debug!("can user={} permission='{}' -> false (explicitly denied)", ctx.user, name);
            return false;
        }

        let resolved = match self.resolve_permission(ctx, snapshot, name, guard) {
            Some(resolved) => resolved,
            None => {
                debug!("can user={} permission='{}' -> false (not held)", ctx.user, name);
                return false;
            }
        };
        let permission = &resolved.permission;

        if let Some(context) = context {
            if !ContextMatcher::matches(&permission.context_rules, ctx.attributes.as_ref(), context) {
                debug!("can user={} permission='{}' -> false (context mismatch)", ctx.user, name);
                return false;
            }
        }

        if resolved.needs_sudo && !self.sudo_mode(ctx, false) {
            debug!("can user={} permission='{}' -> false (sudo required)", ctx.user, name);
            return false;
        }

        let satisfied = DependencyResolver::resolve(permission.id, &permission.depends_on, trail, |prerequisite, trail| {
            self.can_single(ctx, snapshot, prerequisite, guard, None, trail)
        });
        debug!(
            "can user={} permission='{}' via '{}' -> {}",
            ctx.user, name, permission.name, satisfied
        );
        satisfied
    }

    /// First matching permission: direct grants, then each active role's chain
    fn resolve_permission(
        &self,
        ctx: &EvaluationContext,
        snapshot: &Snapshot,
        name: &str,
        guard: Option<&str>,
    ) -> Option<Resolved> {
        let direct = snapshot.grants.iter().find(|grant| {
            !grant.is_denied
                && PatternMatcher::matches_scoped(name, guard, &grant.permission.name, &grant.permission.guard)
        });
        if let Some(grant) = direct {
            return Some(Resolved {
                permission: grant.permission.clone(),
                needs_sudo: false,
            });
        }

        for role in &snapshot.roles {
            if !AccessRuleEvaluator::is_active(role.access_rules.as_ref(), ctx.ip.as_deref(), ctx.now) {
                debug!("Role '{}' inactive for user {} under access rules", role.name, ctx.user);
                continue;
            }

            if let Some((permission, path)) = self.find_in_role_chain(role, name, guard) {
                let needs_sudo = path.iter().any(|r| self.is_protected(r));
                return Some(Resolved { permission, needs_sudo });
            }
        }
        None
    }

    /// Search a role and its ancestors, returning the permission and the
    /// roles walked to reach it
    fn find_in_role_chain(&self, role: &Role, name: &str, guard: Option<&str>) -> Option<(Permission, Vec<Role>)> {
        let mut visited = AHashSet::new();
        let mut path = Vec::new();
        let mut current = role.clone();

        loop {
            if !visited.insert(current.id) {
                warn!("Role hierarchy cycle detected at role '{}' ({})", current.name, current.id);
                return None;
            }

            let permissions = match self.cache.role_permissions(self.store.as_ref(), current.id) {
                Ok(permissions) => permissions,
                Err(e) => {
                    warn!("Failed to load permissions of role {}: {}", current.id, e);
                    return None;
                }
            };
            let found = permissions
                .iter()
                .find(|p| PatternMatcher::matches_scoped(name, guard, &p.name, &p.guard))
                .cloned();

            let parent_id = current.parent_id;
            path.push(current);
            if let Some(permission) = found {
                return Some((permission, path));
            }

            let parent_id = parent_id?;
            current = match self.store.role(parent_id) {
                Ok(Some(parent)) => parent,
                Ok(None) => return None,
                Err(e) => {
                    warn!("Failed to load parent role {}: {}", parent_id, e);
                    return None;
                }
            };
        }
    }
}
