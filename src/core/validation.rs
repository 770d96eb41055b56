//! Validation for role, permission and guard names
//!
//! Names are identifiers, not display text:
//! - Role and permission names: no whitespace, no commas (commas separate
//!   names in list input), at most 255 characters. Wildcard characters are
//!   allowed so that a role can hold a pattern such as `project.*`.
//! - Guards: lowercase letters, numbers, `_` and `-`.

use crate::error::{AuthzError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Pattern for role and permission names
const NAME_PATTERN: &str = r"^[^\s,]+$";

/// Pattern for guard names
const GUARD_PATTERN: &str = r"^[a-z0-9_-]+$";

/// Maximum name length (column width in typical schemas)
const MAX_NAME_LENGTH: usize = 255;

static NAME_RE: OnceLock<Regex> = OnceLock::new();
static GUARD_RE: OnceLock<Regex> = OnceLock::new();

/// Validate a role or permission name
///
/// # Examples
///
/// ```
/// use rolegate::validation::validate_name;
///
/// assert!(validate_name("users-manage").is_ok());
/// assert!(validate_name("project.*").is_ok());
/// assert!(validate_name("manage users").is_err());
/// assert!(validate_name("a,b").is_err());
/// ```
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AuthzError::InvalidArgument("name cannot be empty".to_string()));
    }

    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(AuthzError::InvalidArgument(format!(
            "name too long (max {} characters)",
            MAX_NAME_LENGTH
        )));
    }

    let re = compiled(&NAME_RE, NAME_PATTERN)?;
    if !re.is_match(name) {
        return Err(AuthzError::InvalidArgument(format!(
            "name '{}' cannot contain whitespace or commas",
            name
        )));
    }

    Ok(())
}

/// Validate a guard name
pub fn validate_guard(guard: &str) -> Result<()> {
    let re = compiled(&GUARD_RE, GUARD_PATTERN)?;
    if !re.is_match(guard) {
        return Err(AuthzError::InvalidArgument(format!(
            "guard '{}' must be lowercase letters, numbers, '_' or '-'",
            guard
        )));
    }
    Ok(())
}

/// Split comma-separated names, trimming blanks and dropping empty items
///
/// ```
/// use rolegate::validation::split_names;
///
/// assert_eq!(split_names("admin, owner,,"), vec!["admin", "owner"]);
/// ```
pub fn split_names(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Compile a pattern once per process
fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> Result<&'static Regex> {
    if let Some(re) = cell.get() {
        return Ok(re);
    }
    let re = Regex::new(pattern).map_err(|e| AuthzError::Config(format!("invalid pattern {}: {}", pattern, e)))?;
    Ok(cell.get_or_init(|| re))
}
