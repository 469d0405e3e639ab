//! Save requests, responses and the transport contract.
//!
//! A save runs in two phases around the network call:
//! `EntityManager::begin_save` validates and snapshots the entities and
//! returns a [`PendingSave`]; the caller sends [`PendingSave::request`]
//! through a [`SaveTransport`] (or any other way) and hands the outcome to
//! `EntityManager::complete_save`. `EntityManager::save_changes` chains
//! both for synchronous transports.

mod concurrency;
mod transport;

pub(crate) use concurrency::stamp_concurrency;
pub use transport::{MockSaveTransport, SaveTransport};

use crate::config::SaveOptions;
use crate::entity::{Entity, EntityKey, EntityState};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Snapshot of one entity as sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    /// Concrete type name.
    pub entity_type_name: String,
    /// Key at the time of the snapshot (may be temporary).
    pub key: EntityKey,
    /// State at the time of the snapshot.
    pub entity_state: EntityState,
    /// Current values, including stamped concurrency values.
    pub values: BTreeMap<String, Value>,
    /// Original values of changed properties.
    pub original_values: BTreeMap<String, Value>,
    /// Whether the key is temporary.
    pub has_temp_key: bool,
}

impl EntitySnapshot {
    pub(crate) fn of(entity: &Entity) -> Self {
        Self {
            entity_type_name: entity.type_name(),
            key: entity.key(),
            entity_state: entity.entity_state(),
            values: entity.values(),
            original_values: entity.original_values(),
            has_temp_key: entity.has_temp_key(),
        }
    }
}

/// What a save sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    /// Resource the save is posted to.
    pub resource_name: String,
    /// Opaque tag from the save options.
    pub tag: Option<String>,
    /// Entities to save.
    pub entities: Vec<EntitySnapshot>,
}

/// An entity as materialized by the server.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawEntity {
    /// Concrete type name.
    pub entity_type_name: String,
    /// Data property values by client property name.
    pub values: BTreeMap<String, Value>,
}

impl RawEntity {
    /// Creates a record with no values.
    pub fn new(entity_type_name: impl Into<String>) -> Self {
        Self {
            entity_type_name: entity_type_name.into(),
            values: BTreeMap::new(),
        }
    }

    /// Adds a value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl From<&EntitySnapshot> for RawEntity {
    fn from(snapshot: &EntitySnapshot) -> Self {
        Self {
            entity_type_name: snapshot.entity_type_name.clone(),
            values: snapshot.values.clone(),
        }
    }
}

/// Server assigned replacement for a temporary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapping {
    /// Type of the entity whose key changed.
    pub entity_type_name: String,
    /// Temporary value sent by the client.
    pub temp_value: Value,
    /// Permanent value assigned by the server.
    pub real_value: Value,
}

/// Successful save response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SaveResponse {
    /// Saved entities as the server sees them; order is not significant and
    /// entities may be omitted.
    pub entities: Vec<RawEntity>,
    /// Temporary to permanent key replacements.
    pub key_mappings: Vec<KeyMapping>,
}

/// A per-entity error reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntityError {
    /// Type of the failing entity.
    pub entity_type_name: String,
    /// Key values the server echoed back.
    pub key_values: Vec<Value>,
    /// Error name.
    pub error_name: String,
    /// Error message.
    pub error_message: String,
    /// Offending property, if any.
    pub property_name: Option<String>,
}

/// Failed save response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SaveFailure {
    /// Failure message.
    pub message: String,
    /// Per-entity errors.
    pub entity_errors: Vec<ServerEntityError>,
    /// What a non-transactional backend did save. Never applied to the cache.
    pub partial: Option<SaveResponse>,
}

impl SaveFailure {
    /// Creates a failure with a message only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Adds a per-entity error.
    #[must_use]
    pub fn with_entity_error(mut self, error: ServerEntityError) -> Self {
        self.entity_errors.push(error);
        self
    }
}

impl fmt::Display for SaveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} entity errors)", self.message, self.entity_errors.len())
    }
}

/// Result of a completed save.
#[derive(Debug, Clone, Default)]
pub struct SaveResult {
    /// Saved entities (cached instances; deleted ones are now detached).
    pub entities: Vec<Entity>,
    /// Key replacements that were applied.
    pub key_mappings: Vec<KeyMapping>,
}

/// A save between [`EntityManager::begin_save`](crate::EntityManager::begin_save)
/// and [`EntityManager::complete_save`](crate::EntityManager::complete_save).
///
/// The targeted entities stay marked as being saved until the pending save
/// is completed.
#[must_use = "a pending save keeps its entities marked as being saved until completed"]
#[derive(Debug)]
pub struct PendingSave {
    pub(crate) manager_id: Uuid,
    pub(crate) request: SaveRequest,
    pub(crate) targets: Vec<Entity>,
}

impl PendingSave {
    pub(crate) fn noop(manager_id: Uuid, options: &SaveOptions) -> Self {
        Self {
            manager_id,
            request: SaveRequest {
                resource_name: options.resource_name.clone(),
                tag: options.tag.clone(),
                entities: Vec::new(),
            },
            targets: Vec::new(),
        }
    }

    /// The request to send.
    pub fn request(&self) -> &SaveRequest {
        &self.request
    }

    /// Entities included in the save.
    pub fn entities(&self) -> &[Entity] {
        &self.targets
    }

    /// Returns true if there is nothing to send.
    pub fn is_noop(&self) -> bool {
        self.targets.is_empty()
    }
}
