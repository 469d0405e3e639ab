//! Per-entity tracking state.

use super::state::EntityState;
use crate::context::ManagerContext;
use crate::validation::ValidationError;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tracking metadata carried by every entity.
#[derive(Debug, Default)]
pub(crate) struct EntityAspect {
    pub(crate) state: EntityState,
    /// Pre-change values, recorded on the first tracked write of each property.
    pub(crate) original_values: BTreeMap<String, Value>,
    pub(crate) is_being_saved: bool,
    pub(crate) has_temp_key: bool,
    pub(crate) validation_errors: Vec<ValidationError>,
    pub(crate) extra_metadata: Option<serde_json::Value>,
    /// Set while the entity is inside `attach_entity`.
    pub(crate) attaching: bool,
    /// Owning manager; `None` while detached.
    pub(crate) context: Option<Arc<ManagerContext>>,
}

impl EntityAspect {
    /// Resets everything a detached entity must not keep.
    pub(crate) fn reset_detached(&mut self) {
        self.state = EntityState::Detached;
        self.context = None;
        self.original_values.clear();
        self.is_being_saved = false;
        self.attaching = false;
    }
}
