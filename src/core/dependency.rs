//! Prerequisite resolution for permissions
//!
//! A permission may declare `depends_on`: permission names the principal must
//! also hold. Each prerequisite is checked with a full permission check (same
//! guard, no context). The chain is tracked so that a prerequisite cycle
//! resolves to "denied" instead of recursing forever.

use crate::core::model::PermissionId;
use tracing::warn;

/// Permissions currently being resolved, outermost first
#[derive(Debug, Default, Clone)]
pub struct DependencyTrail {
    chain: Vec<PermissionId>,
}

impl DependencyTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth of the current chain
    pub fn depth(&self) -> usize {
        self.chain.len()
    }

    fn contains(&self, id: PermissionId) -> bool {
        self.chain.contains(&id)
    }
}

/// Resolves permission prerequisite chains
pub struct DependencyResolver;

impl DependencyResolver {
    /// Require every prerequisite of `owner` to pass `check`
    ///
    /// `check` receives each prerequisite name and the trail, and is expected
    /// to run a full permission check that may call back into `resolve`.
    /// Prerequisites are checked in declaration order and the first failure
    /// stops resolution.
    ///
    /// Returns `false` without calling `check` when `owner` is already on the
    /// trail (a cycle).
    pub fn resolve<F>(owner: PermissionId, prerequisites: &[String], trail: &mut DependencyTrail, mut check: F) -> bool
    where
        F: FnMut(&str, &mut DependencyTrail) -> bool,
    {
        if prerequisites.is_empty() {
            return true;
        }

        if trail.contains(owner) {
            warn!(
                "Permission dependency cycle detected at permission {} (chain {:?})",
                owner, trail.chain
            );
            return false;
        }

        trail.chain.push(owner);
        let satisfied = prerequisites
            .iter()
            .all(|prerequisite| check(prerequisite, trail));
        trail.chain.pop();

        satisfied
    }
}
