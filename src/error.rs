//! Error types for authorization operations

use thiserror::Error;

/// Authorization engine errors
///
/// Decision queries (`has_role`, `can`, `can_inherited`) never produce these
/// for a missing role or permission: "no access" is always `false`. Errors are
/// reserved for malformed input, protected-state violations, and mutations
/// addressed at records that do not exist.
#[derive(Error, Debug)]
pub enum AuthzError {
    /// Caller passed malformed options or names
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Protected role still has active members and cannot be deleted
    #[error("Cannot delete protected role '{role}' while it has {members} active member(s)")]
    ProtectedRoleInUse { role: String, members: usize },

    /// Role does not exist
    #[error("Role not found: {0}")]
    RoleNotFound(String),

    /// Permission does not exist
    #[error("Permission not found: {0}")]
    PermissionNotFound(String),

    /// Access request does not exist
    #[error("Access request not found: {0}")]
    AccessRequestNotFound(u64),

    /// Access request already approved or rejected
    #[error("Access request #{id} is already processed ({status})")]
    AccessRequestProcessed { id: u64, status: String },

    /// Entity store failed a write or lookup
    #[error("Entity store error: {0}")]
    Store(String),

    /// Cache backend could not serve the request
    #[error("Cache backend unavailable: {0}")]
    CacheUnavailable(String),

    /// Audit sink rejected an event
    #[error("Audit sink unavailable: {0}")]
    AuditUnavailable(String),

    /// Configuration is structurally wrong
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration failed field validation
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, AuthzError>;
