//! In-memory entity store

use super::EntityStore;
use crate::core::model::{
    scope_applies, AccessRequest, AccessRequestStatus, AssignedRole, GrantedPermission, Permission,
    PermissionGrant, PermissionId, Role, RoleAssignment, RoleId, TeamId, UserId,
};
use crate::core::validation::{validate_guard, validate_name};
use crate::error::{AuthzError, Result};
use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Default)]
struct Inner {
    roles: BTreeMap<RoleId, Role>,
    permissions: BTreeMap<PermissionId, Permission>,
    role_permissions: AHashMap<RoleId, Vec<PermissionId>>,
    assignments: Vec<RoleAssignment>,
    grants: Vec<PermissionGrant>,
    requests: BTreeMap<u64, AccessRequest>,
    next_role_id: RoleId,
    next_permission_id: PermissionId,
    next_request_id: u64,
}

/// Thread-safe in-memory [`EntityStore`]
///
/// Every write runs under one write lock, so mutations are serialized.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a role with a fresh id
    pub fn create_role(&self, name: &str, guard: &str) -> Result<Role> {
        self.insert_role(Role::new(0, name, guard))
    }

    /// Insert a role; id `0` assigns a fresh id
    ///
    /// Fails if another role already has the same name and guard.
    pub fn insert_role(&self, mut role: Role) -> Result<Role> {
        validate_name(&role.name)?;
        validate_guard(&role.guard)?;

        let mut inner = self.inner.write();
        if inner
            .roles
            .values()
            .any(|r| r.id != role.id && r.name == role.name && r.guard == role.guard)
        {
            return Err(AuthzError::InvalidArgument(format!(
                "role '{}' already exists for guard '{}'",
                role.name, role.guard
            )));
        }

        if role.id == 0 {
            inner.next_role_id += 1;
            role.id = inner.next_role_id;
        } else {
            inner.next_role_id = inner.next_role_id.max(role.id);
        }

        inner.roles.insert(role.id, role.clone());
        Ok(role)
    }

    /// Create a permission with a fresh id
    pub fn create_permission(&self, name: &str, guard: &str) -> Result<Permission> {
        self.insert_permission(Permission::new(0, name, guard))
    }

    /// Insert a permission; id `0` assigns a fresh id
    pub fn insert_permission(&self, mut permission: Permission) -> Result<Permission> {
        validate_name(&permission.name)?;
        validate_guard(&permission.guard)?;
        for prerequisite in &permission.depends_on {
            validate_name(prerequisite)?;
        }

        let mut inner = self.inner.write();
        if inner.permissions.values().any(|p| {
            p.id != permission.id && p.name == permission.name && p.guard == permission.guard
        }) {
            return Err(AuthzError::InvalidArgument(format!(
                "permission '{}' already exists for guard '{}'",
                permission.name, permission.guard
            )));
        }

        if permission.id == 0 {
            inner.next_permission_id += 1;
            permission.id = inner.next_permission_id;
        } else {
            inner.next_permission_id = inner.next_permission_id.max(permission.id);
        }

        inner.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    /// Raw assignment rows, for inspection
    pub fn assignments(&self) -> Vec<RoleAssignment> {
        self.inner.read().assignments.clone()
    }

    /// Raw grant rows, for inspection
    pub fn grants(&self) -> Vec<PermissionGrant> {
        self.inner.read().grants.clone()
    }
}

impl EntityStore for MemoryStore {
    fn role(&self, id: RoleId) -> Result<Option<Role>> {
        Ok(self.inner.read().roles.get(&id).cloned())
    }

    fn find_role_by_name(&self, name: &str, guard: Option<&str>) -> Result<Option<Role>> {
        Ok(self
            .inner
            .read()
            .roles
            .values()
            .find(|r| r.name == name && guard.map_or(true, |g| r.guard == g))
            .cloned())
    }

    fn permission(&self, id: PermissionId) -> Result<Option<Permission>> {
        Ok(self.inner.read().permissions.get(&id).cloned())
    }

    fn find_permission_by_name(&self, name: &str, guard: Option<&str>) -> Result<Option<Permission>> {
        Ok(self
            .inner
            .read()
            .permissions
            .values()
            .find(|p| p.name == name && guard.map_or(true, |g| p.guard == g))
            .cloned())
    }

    fn roles_without_parent(&self) -> Result<Vec<Role>> {
        Ok(self
            .inner
            .read()
            .roles
            .values()
            .filter(|r| r.parent_id.is_none())
            .cloned()
            .collect())
    }

    fn permissions_of(&self, role: RoleId) -> Result<Vec<Permission>> {
        let inner = self.inner.read();
        Ok(inner
            .role_permissions
            .get(&role)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.permissions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn permissions_in_group(&self, group: &str) -> Result<Vec<Permission>> {
        Ok(self
            .inner
            .read()
            .permissions
            .values()
            .filter(|p| p.group.as_deref() == Some(group))
            .cloned()
            .collect())
    }

    fn role_assignments_of(&self, user: UserId, scope: Option<TeamId>) -> Result<Vec<AssignedRole>> {
        let inner = self.inner.read();
        Ok(inner
            .assignments
            .iter()
            .filter(|a| a.user == user && scope_applies(a.team, scope))
            .filter_map(|a| {
                inner.roles.get(&a.role).map(|role| AssignedRole {
                    role: role.clone(),
                    team: a.team,
                    expires_at: a.expires_at,
                })
            })
            .collect())
    }

    fn direct_permissions_of(&self, user: UserId, scope: Option<TeamId>) -> Result<Vec<GrantedPermission>> {
        let inner = self.inner.read();
        Ok(inner
            .grants
            .iter()
            .filter(|g| g.user == user && scope_applies(g.team, scope))
            .filter_map(|g| {
                inner.permissions.get(&g.permission).map(|permission| GrantedPermission {
                    permission: permission.clone(),
                    team: g.team,
                    is_denied: g.is_denied,
                })
            })
            .collect())
    }

    fn active_member_count(&self, role: RoleId, now: DateTime<Utc>) -> Result<usize> {
        let inner = self.inner.read();
        let members: AHashSet<UserId> = inner
            .assignments
            .iter()
            .filter(|a| a.role == role && a.is_active(now))
            .map(|a| a.user)
            .collect();
        Ok(members.len())
    }

    fn attach_role(&self, assignment: RoleAssignment) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.roles.contains_key(&assignment.role) {
            return Err(AuthzError::RoleNotFound(assignment.role.to_string()));
        }

        match inner.assignments.iter_mut().find(|a| {
            a.user == assignment.user && a.role == assignment.role && a.team == assignment.team
        }) {
            Some(existing) => existing.expires_at = assignment.expires_at,
            None => inner.assignments.push(assignment),
        }
        Ok(())
    }

    fn detach_role(&self, user: UserId, role: RoleId, team: Option<TeamId>) -> Result<usize> {
        let mut inner = self.inner.write();
        let before = inner.assignments.len();
        inner.assignments.retain(|a| {
            !(a.user == user && a.role == role && (team.is_none() || a.team == team))
        });
        Ok(before - inner.assignments.len())
    }

    fn attach_permission(&self, grant: PermissionGrant) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.permissions.contains_key(&grant.permission) {
            return Err(AuthzError::PermissionNotFound(grant.permission.to_string()));
        }

        match inner.grants.iter_mut().find(|g| {
            g.user == grant.user && g.permission == grant.permission && g.team == grant.team
        }) {
            Some(existing) => existing.is_denied = grant.is_denied,
            None => inner.grants.push(grant),
        }
        Ok(())
    }

    fn detach_permission(&self, user: UserId, permission: PermissionId, team: Option<TeamId>) -> Result<usize> {
        let mut inner = self.inner.write();
        let before = inner.grants.len();
        inner.grants.retain(|g| {
            !(g.user == user && g.permission == permission && (team.is_none() || g.team == team))
        });
        Ok(before - inner.grants.len())
    }

    fn remove_user(&self, user: UserId) -> Result<()> {
        let mut inner = self.inner.write();
        inner.assignments.retain(|a| a.user != user);
        inner.grants.retain(|g| g.user != user);
        Ok(())
    }

    fn attach_role_permission(&self, role: RoleId, permission: PermissionId) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.roles.contains_key(&role) {
            return Err(AuthzError::RoleNotFound(role.to_string()));
        }
        if !inner.permissions.contains_key(&permission) {
            return Err(AuthzError::PermissionNotFound(permission.to_string()));
        }

        let links = inner.role_permissions.entry(role).or_default();
        if !links.contains(&permission) {
            links.push(permission);
        }
        Ok(())
    }

    fn detach_role_permission(&self, role: RoleId, permission: PermissionId) -> Result<usize> {
        let mut inner = self.inner.write();
        let links = match inner.role_permissions.get_mut(&role) {
            Some(links) => links,
            None => return Ok(0),
        };
        let before = links.len();
        links.retain(|id| *id != permission);
        Ok(before - links.len())
    }

    fn sync_role_permissions(&self, role: RoleId, permissions: &[PermissionId]) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.roles.contains_key(&role) {
            return Err(AuthzError::RoleNotFound(role.to_string()));
        }
        if let Some(missing) = permissions.iter().find(|id| !inner.permissions.contains_key(id)) {
            return Err(AuthzError::PermissionNotFound(missing.to_string()));
        }

        let mut links: Vec<PermissionId> = Vec::with_capacity(permissions.len());
        for id in permissions {
            if !links.contains(id) {
                links.push(*id);
            }
        }
        inner.role_permissions.insert(role, links);
        Ok(())
    }

    fn update_role(&self, role: Role) -> Result<()> {
        validate_name(&role.name)?;
        validate_guard(&role.guard)?;

        let mut inner = self.inner.write();
        match inner.roles.get_mut(&role.id) {
            Some(existing) => {
                *existing = role;
                Ok(())
            }
            None => Err(AuthzError::RoleNotFound(role.id.to_string())),
        }
    }

    fn update_permission(&self, permission: Permission) -> Result<()> {
        validate_name(&permission.name)?;
        validate_guard(&permission.guard)?;

        let mut inner = self.inner.write();
        match inner.permissions.get_mut(&permission.id) {
            Some(existing) => {
                *existing = permission;
                Ok(())
            }
            None => Err(AuthzError::PermissionNotFound(permission.id.to_string())),
        }
    }

    fn delete_role(&self, role: RoleId) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.roles.remove(&role).is_none() {
            return Err(AuthzError::RoleNotFound(role.to_string()));
        }
        inner.assignments.retain(|a| a.role != role);
        inner.role_permissions.remove(&role);

        // Children lose their parent rather than dangling
        for child in inner.roles.values_mut() {
            if child.parent_id == Some(role) {
                child.parent_id = None;
            }
        }
        Ok(())
    }

    fn insert_access_request(&self, mut request: AccessRequest) -> Result<u64> {
        let mut inner = self.inner.write();
        inner.next_request_id += 1;
        request.id = inner.next_request_id;
        inner.requests.insert(request.id, request);
        Ok(inner.next_request_id)
    }

    fn access_request(&self, id: u64) -> Result<Option<AccessRequest>> {
        Ok(self.inner.read().requests.get(&id).cloned())
    }

    fn update_access_request(&self, id: u64, status: AccessRequestStatus, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.requests.get_mut(&id) {
            Some(request) => {
                request.status = status;
                request.updated_at = now;
                Ok(())
            }
            None => Err(AuthzError::AccessRequestNotFound(id)),
        }
    }

    fn pending_access_requests(&self) -> Result<Vec<AccessRequest>> {
        Ok(self
            .inner
            .read()
            .requests
            .values()
            .filter(|r| r.status == AccessRequestStatus::Pending)
            .cloned()
            .collect())
    }
}
