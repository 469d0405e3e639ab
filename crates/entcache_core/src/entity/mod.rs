//! Entities, keys and lifecycle states.

mod aspect;
mod handle;
mod key;
mod state;

pub(crate) use aspect::EntityAspect;
pub use handle::Entity;
pub use key::{values_string, EntityKey, KeyFill, KEY_DELIMITER};
pub use state::{EntityState, MergeStrategy};
