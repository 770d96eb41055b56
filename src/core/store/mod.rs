//! Entity store interface
//!
//! The engine does not own persistence. Hosts plug in an [`EntityStore`]
//! backed by whatever database they use; [`MemoryStore`] is the in-process
//! implementation used in tests and small deployments.
//!
//! Read methods that take a `scope` apply [`scope_applies`]: a scoped read
//! returns rows for that team plus global rows, an unscoped read returns
//! every row.
//!
//! [`scope_applies`]: crate::core::model::scope_applies

mod memory;

pub use memory::MemoryStore;

use crate::core::model::{
    AccessRequest, AccessRequestStatus, AssignedRole, GrantedPermission, Permission, PermissionGrant,
    PermissionId, Role, RoleAssignment, RoleId, TeamId, UserId,
};
use crate::error::Result;
use chrono::{DateTime, Utc};

/// Storage of roles, permissions and their assignments
pub trait EntityStore: Send + Sync {
    // --- lookups ---

    fn role(&self, id: RoleId) -> Result<Option<Role>>;

    /// Exact name lookup; `guard = None` accepts any guard
    fn find_role_by_name(&self, name: &str, guard: Option<&str>) -> Result<Option<Role>>;

    fn permission(&self, id: PermissionId) -> Result<Option<Permission>>;

    /// Exact name lookup; `guard = None` accepts any guard
    fn find_permission_by_name(&self, name: &str, guard: Option<&str>) -> Result<Option<Permission>>;

    /// Roles at the top of a hierarchy
    fn roles_without_parent(&self) -> Result<Vec<Role>>;

    /// Permissions linked directly to a role (not its ancestors)
    fn permissions_of(&self, role: RoleId) -> Result<Vec<Permission>>;

    fn permissions_in_group(&self, group: &str) -> Result<Vec<Permission>>;

    /// Every role assignment of a user in scope, expired ones included
    ///
    /// Callers filter with [`AssignedRole::is_active`]; returning raw rows
    /// lets a cached copy stay correct as assignments expire.
    fn role_assignments_of(&self, user: UserId, scope: Option<TeamId>) -> Result<Vec<AssignedRole>>;

    /// Active roles of a user in scope
    fn roles_of(&self, user: UserId, scope: Option<TeamId>, now: DateTime<Utc>) -> Result<Vec<Role>> {
        Ok(self
            .role_assignments_of(user, scope)?
            .into_iter()
            .filter(|assigned| assigned.is_active(now))
            .map(|assigned| assigned.role)
            .collect())
    }

    /// Direct grants (affirmative and denied) of a user in scope
    fn direct_permissions_of(&self, user: UserId, scope: Option<TeamId>) -> Result<Vec<GrantedPermission>>;

    /// Number of distinct users with an active assignment to the role
    fn active_member_count(&self, role: RoleId, now: DateTime<Utc>) -> Result<usize>;

    // --- user assignments ---

    /// Insert or update the assignment for (user, role, team)
    fn attach_role(&self, assignment: RoleAssignment) -> Result<()>;

    /// Remove assignments; `team = None` removes them in every team
    fn detach_role(&self, user: UserId, role: RoleId, team: Option<TeamId>) -> Result<usize>;

    /// Insert or update the grant for (user, permission, team)
    fn attach_permission(&self, grant: PermissionGrant) -> Result<()>;

    /// Remove grants; `team = None` removes them in every team
    fn detach_permission(&self, user: UserId, permission: PermissionId, team: Option<TeamId>) -> Result<usize>;

    /// Remove every assignment and grant held by a user
    fn remove_user(&self, user: UserId) -> Result<()>;

    // --- role permissions ---

    fn attach_role_permission(&self, role: RoleId, permission: PermissionId) -> Result<()>;

    fn detach_role_permission(&self, role: RoleId, permission: PermissionId) -> Result<usize>;

    /// Replace a role's permission links with exactly `permissions`
    fn sync_role_permissions(&self, role: RoleId, permissions: &[PermissionId]) -> Result<()>;

    /// Delete a role together with its assignments and permission links
    fn delete_role(&self, role: RoleId) -> Result<()>;

    /// Replace an existing role record
    fn update_role(&self, role: Role) -> Result<()>;

    /// Replace an existing permission record
    fn update_permission(&self, permission: Permission) -> Result<()>;

    // --- access requests ---

    /// Store a new request and return its id
    fn insert_access_request(&self, request: AccessRequest) -> Result<u64>;

    fn access_request(&self, id: u64) -> Result<Option<AccessRequest>>;

    fn update_access_request(&self, id: u64, status: AccessRequestStatus, now: DateTime<Utc>) -> Result<()>;

    fn pending_access_requests(&self) -> Result<Vec<AccessRequest>>;
}
