//! Entity lifecycle states and merge strategies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntityState {
    /// Not indexed by any manager.
    #[default]
    Detached,
    /// New; will be inserted on save.
    Added,
    /// Matches the server.
    Unchanged,
    /// Edited since it was last saved or queried.
    Modified,
    /// Marked for deletion on save.
    Deleted,
}

impl EntityState {
    /// Returns true for `Added`, `Modified` and `Deleted`.
    pub fn is_changed(&self) -> bool {
        matches!(
            self,
            EntityState::Added | EntityState::Modified | EntityState::Deleted
        )
    }

    /// Returns true for `Detached`.
    pub fn is_detached(&self) -> bool {
        matches!(self, EntityState::Detached)
    }

    /// Returns true for `Added`.
    pub fn is_added(&self) -> bool {
        matches!(self, EntityState::Added)
    }

    /// Returns true for `Unchanged`.
    pub fn is_unchanged(&self) -> bool {
        matches!(self, EntityState::Unchanged)
    }

    /// Returns true for `Modified`.
    pub fn is_modified(&self) -> bool {
        matches!(self, EntityState::Modified)
    }

    /// Returns true for `Deleted`.
    pub fn is_deleted(&self) -> bool {
        matches!(self, EntityState::Deleted)
    }

    /// Parses a state name as written in export bundles.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Detached" => Some(EntityState::Detached),
            "Added" => Some(EntityState::Added),
            "Unchanged" => Some(EntityState::Unchanged),
            "Modified" => Some(EntityState::Modified),
            "Deleted" => Some(EntityState::Deleted),
            _ => None,
        }
    }

    /// State name as written in export bundles.
    pub fn name(&self) -> &'static str {
        match self {
            EntityState::Detached => "Detached",
            EntityState::Added => "Added",
            EntityState::Unchanged => "Unchanged",
            EntityState::Modified => "Modified",
            EntityState::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Policy for an incoming entity whose key is already cached.
///
/// | strategy | cached `Unchanged` | cached `Added`/`Modified`/`Deleted` |
/// |---|---|---|
/// | `Disallowed` | error | error |
/// | `OverwriteChanges` | overwrite | overwrite |
/// | `PreserveChanges` | overwrite | keep cached |
/// | `SkipMerge` | keep cached | keep cached |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Collisions are an error.
    #[default]
    Disallowed,
    /// Incoming values and state always win.
    OverwriteChanges,
    /// Incoming values win unless the cached entity has pending changes.
    PreserveChanges,
    /// The cached entity always wins.
    SkipMerge,
}

impl MergeStrategy {
    /// Returns true if an incoming entity replaces a cached one in `cached_state`.
    pub fn overwrites(&self, cached_state: EntityState) -> bool {
        match self {
            MergeStrategy::OverwriteChanges => true,
            MergeStrategy::PreserveChanges => !cached_state.is_changed(),
            MergeStrategy::Disallowed | MergeStrategy::SkipMerge => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        for state in [
            EntityState::Detached,
            EntityState::Added,
            EntityState::Unchanged,
            EntityState::Modified,
            EntityState::Deleted,
        ] {
            assert_eq!(EntityState::from_name(state.name()), Some(state));
        }
        assert_eq!(EntityState::from_name("Gone"), None);
        assert!(EntityState::Deleted.is_changed());
        assert!(!EntityState::Unchanged.is_changed());
    }

    #[test]
    fn overwrite_matrix() {
        use EntityState::*;
        assert!(MergeStrategy::OverwriteChanges.overwrites(Modified));
        assert!(MergeStrategy::PreserveChanges.overwrites(Unchanged));
        assert!(!MergeStrategy::PreserveChanges.overwrites(Added));
        assert!(!MergeStrategy::SkipMerge.overwrites(Unchanged));
        assert!(!MergeStrategy::Disallowed.overwrites(Unchanged));
    }
}
