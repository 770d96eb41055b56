//! Role, permission and assignment records
//!
//! Structured attributes (access rules, context rules, prerequisite lists)
//! are decoded once when a record is built, never per decision.

use crate::core::context::ContextRules;
use crate::core::rules::AccessRules;
use crate::error::{AuthzError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type RoleId = u64;
pub type PermissionId = u64;
pub type TeamId = u64;

/// Guard used when a record is created without one
pub const DEFAULT_GUARD: &str = "web";

/// A named role, optionally inheriting from a single parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub guard: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parent role; permissions are inherited upward through this pointer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<RoleId>,
    /// Time and IP gating; `None` means always active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_rules: Option<AccessRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    #[serde(default)]
    pub protected: bool,
}

impl Role {
    /// Create a role with no parent, rules or limits
    pub fn new(id: RoleId, name: impl Into<String>, guard: impl Into<String>) -> Self {
        Role {
            id,
            name: name.into(),
            guard: guard.into(),
            display_name: None,
            description: None,
            parent_id: None,
            access_rules: None,
            rate_limit: None,
            protected: false,
        }
    }

    pub fn with_parent(mut self, parent: RoleId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    pub fn with_access_rules(mut self, rules: AccessRules) -> Self {
        self.access_rules = Some(rules);
        self
    }

    /// Decode access rules stored as a JSON blob
    ///
    /// An empty string or `null` clears the rules.
    pub fn with_access_rules_json(mut self, json: &str) -> Result<Self> {
        self.access_rules = AccessRules::from_json(json)?;
        Ok(self)
    }

    pub fn with_rate_limit(mut self, limit: u32) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }
}

/// A named permission with optional prerequisites and context rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
    pub guard: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Permission names the principal must also hold, checked in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "ContextRules::is_empty")]
    pub context_rules: ContextRules,
}

impl Permission {
    pub fn new(id: PermissionId, name: impl Into<String>, guard: impl Into<String>) -> Self {
        Permission {
            id,
            name: name.into(),
            guard: guard.into(),
            display_name: None,
            group: None,
            depends_on: Vec::new(),
            context_rules: ContextRules::default(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }

    /// Decode a JSON array of prerequisite names
    pub fn with_depends_on_json(mut self, json: &str) -> Result<Self> {
        let json = json.trim();
        if json.is_empty() || json == "null" {
            self.depends_on.clear();
            return Ok(self);
        }
        self.depends_on = serde_json::from_str(json).map_err(|e| {
            AuthzError::InvalidArgument(format!("depends_on for '{}': {}", self.name, e))
        })?;
        Ok(self)
    }

    pub fn with_context_rules(mut self, rules: ContextRules) -> Self {
        self.context_rules = rules;
        self
    }

    /// Decode a JSON object of principal-attribute -> context-attribute pairs
    pub fn with_context_rules_json(mut self, json: &str) -> Result<Self> {
        self.context_rules = ContextRules::from_json(json)?;
        Ok(self)
    }
}

/// A user's membership in a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user: UserId,
    pub role: RoleId,
    pub team: Option<TeamId>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    /// Active when there is no expiry or the expiry is still ahead
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        is_unexpired(self.expires_at, now)
    }
}

/// A permission granted (or explicitly denied) directly to a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub user: UserId,
    pub permission: PermissionId,
    pub team: Option<TeamId>,
    pub is_denied: bool,
}

/// Role record joined with the assignment that grants it
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedRole {
    pub role: Role,
    pub team: Option<TeamId>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AssignedRole {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        is_unexpired(self.expires_at, now)
    }
}

/// Permission record joined with the direct grant that carries it
#[derive(Debug, Clone, PartialEq)]
pub struct GrantedPermission {
    pub permission: Permission,
    pub team: Option<TeamId>,
    pub is_denied: bool,
}

fn is_unexpired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        None => true,
        Some(expiry) => expiry > now,
    }
}

/// True if a row bound to `team` applies under the evaluation `scope`
///
/// A scoped evaluation sees its own team's rows plus global rows; an
/// unscoped evaluation sees every row.
pub fn scope_applies(team: Option<TeamId>, scope: Option<TeamId>) -> bool {
    match scope {
        None => true,
        Some(scope) => team.is_none() || team == Some(scope),
    }
}

/// What an access request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Role,
    Permission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for AccessRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AccessRequestStatus::Pending => "pending",
            AccessRequestStatus::Approved => "approved",
            AccessRequestStatus::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// A user's request to be granted a role or permission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: u64,
    pub user: UserId,
    pub kind: AccessKind,
    pub item: String,
    pub reason: Option<String>,
    pub status: AccessRequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
