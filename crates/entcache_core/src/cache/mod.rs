//! Cache storage: per-type identity maps, the unattached-children buffer
//! and the relationship linker.

mod group;
mod linker;
mod unattached;

pub use group::{AttachOutcome, EntityGroup};
pub(crate) use linker::{find_entity, RelationshipLinker};
pub use unattached::{UnattachedChildrenMap, UnattachedTuple};
