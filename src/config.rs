//! Engine configuration
//!
//! Loaded from TOML and validated before use:
//!
//! ```toml
//! default_guard = "web"
//! protected_roles = ["admin"]
//! sudo_ttl_minutes = 15
//! default_rate_limit = 60
//!
//! [cache]
//! enabled = true
//! capacity = 10000
//! ttl_seconds = 3600
//!
//! [tables]
//! role_user = "role_user"
//! permission_user = "permission_user"
//! permission_role = "permission_role"
//!
//! [auto_assign]
//! enabled = true
//!
//! [auto_assign.rules.employee]
//! email = "*@company.com"
//! ```

use crate::core::sudo::DEFAULT_SUDO_TTL_MINUTES;
use crate::core::validation::validate_guard;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use validator::Validate;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EngineConfig {
    /// Guard given to records created without one
    #[validate(length(min = 1))]
    pub default_guard: String,

    /// Role names treated as protected in addition to each role's own flag
    pub protected_roles: Vec<String>,

    /// Sudo elevation lifetime
    #[validate(range(min = 1))]
    pub sudo_ttl_minutes: i64,

    /// Rate limit for principals whose roles set none higher
    pub default_rate_limit: u32,

    #[validate(nested)]
    pub cache: CacheConfig,

    #[validate(nested)]
    pub tables: TableNames,

    pub auto_assign: AutoAssignConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_guard: crate::core::model::DEFAULT_GUARD.to_string(),
            protected_roles: vec!["admin".to_string()],
            sudo_ttl_minutes: DEFAULT_SUDO_TTL_MINUTES,
            default_rate_limit: 60,
            cache: CacheConfig::default(),
            tables: TableNames::default(),
            auto_assign: AutoAssignConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(toml_str)?;
        config.check()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("Loading engine config from {:?}", path.as_ref());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Run field validation plus guard-name checks
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        validate_guard(&self.default_guard)?;
        Ok(())
    }

    /// True if the role name is listed as protected
    pub fn is_protected_name(&self, name: &str) -> bool {
        self.protected_roles.iter().any(|n| n == name)
    }
}

/// Resolution cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    /// Build a tag-capable LRU cache; otherwise every read is live
    pub enabled: bool,

    #[validate(range(min = 1))]
    pub capacity: usize,

    #[validate(range(min = 1))]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            capacity: 10_000,
            ttl_seconds: 3600,
        }
    }
}

/// Relation names used as cache tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TableNames {
    #[validate(length(min = 1))]
    pub role_user: String,

    #[validate(length(min = 1))]
    pub permission_user: String,

    #[validate(length(min = 1))]
    pub permission_role: String,
}

impl Default for TableNames {
    fn default() -> Self {
        TableNames {
            role_user: "role_user".to_string(),
            permission_user: "permission_user".to_string(),
            permission_role: "permission_role".to_string(),
        }
    }
}

/// Attribute-driven role auto-assignment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoAssignConfig {
    pub enabled: bool,

    /// Role name -> (principal attribute -> wildcard pattern)
    pub rules: BTreeMap<String, BTreeMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthzError;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_guard, "web");
        assert_eq!(config.sudo_ttl_minutes, 15);
        assert_eq!(config.default_rate_limit, 60);
        assert!(config.is_protected_name("admin"));
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            protected_roles = ["root", "admin"]

            [cache]
            capacity = 50
            "#,
        )
        .unwrap();

        assert!(config.is_protected_name("root"));
        assert_eq!(config.cache.capacity, 50);
        assert_eq!(config.cache.ttl_seconds, 3600);
        assert_eq!(config.tables.role_user, "role_user");
    }

    #[test]
    fn test_auto_assign_rules() {
        let config = EngineConfig::from_toml_str(
            r#"
            [auto_assign]
            enabled = true

            [auto_assign.rules.employee]
            email = "*@company.com"
            "#,
        )
        .unwrap();

        assert!(config.auto_assign.enabled);
        assert_eq!(config.auto_assign.rules["employee"]["email"], "*@company.com");
    }

    #[test]
    fn test_validation_failures() {
        let err = EngineConfig::from_toml_str("sudo_ttl_minutes = 0").unwrap_err();
        assert!(matches!(err, AuthzError::Validation(_)));

        let err = EngineConfig::from_toml_str("[cache]\ncapacity = 0").unwrap_err();
        assert!(matches!(err, AuthzError::Validation(_)));

        let err = EngineConfig::from_toml_str("default_guard = \"Web Guard\"").unwrap_err();
        assert!(matches!(err, AuthzError::InvalidArgument(_)));

        let err = EngineConfig::from_toml_str("sudo_ttl_minutes = \"soon\"").unwrap_err();
        assert!(matches!(err, AuthzError::Toml(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_rate_limit = 120").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.default_rate_limit, 120);

        assert!(matches!(
            EngineConfig::from_file("/nonexistent/rolegate.toml"),
            Err(AuthzError::Io(_))
        ));
    }
}
