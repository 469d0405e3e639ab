//! Export bundles.
//!
//! A bundle is a self-contained snapshot of cached entities (with their
//! tracking state) that another manager sharing the same metadata can
//! import. The layout is stable JSON with camelCase field names; CBOR is
//! offered as a compact alternative for storage.

use crate::config::{DataService, QueryOptions, SaveOptions, ValidationOptions};
use crate::entity::{Entity, EntityKey, MergeStrategy};
use crate::error::{CacheError, CacheResult};
use crate::metadata::StoreDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Exported entities plus the context needed to import them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    /// Full metadata definition, when exported with metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_store: Option<StoreDefinition>,
    /// Metadata format version of the exporting manager.
    pub metadata_version: String,
    /// Name of the exporting manager's metadata store.
    pub metadata_store_name: String,
    /// Data service of the exporting manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_service: Option<DataService>,
    /// Save defaults of the exporting manager.
    pub save_options: SaveOptions,
    /// Query defaults of the exporting manager.
    pub query_options: QueryOptions,
    /// Validation triggers of the exporting manager.
    pub validation_options: ValidationOptions,
    /// Exported entities by concrete type name.
    pub entity_group_map: BTreeMap<String, EntityGroupExport>,
    /// Keys that were temporary when exported.
    #[serde(default)]
    pub temp_keys: Vec<SerializedKey>,
}

/// Exported entities of one type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityGroupExport {
    /// The entities.
    pub entities: Vec<RawEntityExport>,
}

/// One exported entity: server-named property values plus its aspect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntityExport {
    /// Data property values by server property name.
    #[serde(flatten)]
    pub values: BTreeMap<String, serde_json::Value>,
    /// Tracking state.
    pub entity_aspect: ExportedAspect,
}

/// Tracking state of an exported entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedAspect {
    /// State name (`Added`, `Unchanged`, `Modified` or `Deleted`).
    pub entity_state: String,
    /// Scalar navigations whose foreign key held a temporary key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub temp_nav_prop_names: Vec<String>,
    /// Original values by server property name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub original_values_map: BTreeMap<String, serde_json::Value>,
    /// Opaque caller metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_metadata: Option<serde_json::Value>,
}

/// A key in serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedKey {
    /// Concrete type name.
    pub entity_type: String,
    /// Key values, JSON encoded per key property type.
    pub values: Vec<serde_json::Value>,
}

impl ExportBundle {
    /// Number of exported entities.
    pub fn entity_count(&self) -> usize {
        self.entity_group_map.values().map(|g| g.entities.len()).sum()
    }

    /// Encodes the bundle as compact JSON.
    pub fn to_json(&self) -> CacheResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Encodes the bundle as indented JSON.
    pub fn to_json_pretty(&self) -> CacheResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decodes a JSON bundle.
    pub fn from_json(json: &str) -> CacheResult<Self> {
        serde_json::from_str(json).map_err(|e| CacheError::import_format(e.to_string()))
    }

    /// Encodes the bundle as CBOR.
    pub fn to_cbor(&self) -> CacheResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CacheError::cbor(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a CBOR bundle.
    pub fn from_cbor(bytes: &[u8]) -> CacheResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| CacheError::cbor(e.to_string()))
    }

    /// Writes the bundle to a file: CBOR for a `.cbor` extension, JSON otherwise.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> CacheResult<()> {
        let path = path.as_ref();
        let bytes = if is_cbor(path) {
            self.to_cbor()?
        } else {
            self.to_json_pretty()?.into_bytes()
        };
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Reads a bundle written by [`ExportBundle::write_to_path`].
    pub fn read_from_path(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        if is_cbor(path) {
            Self::from_cbor(&bytes)
        } else {
            let json =
                String::from_utf8(bytes).map_err(|e| CacheError::import_format(e.to_string()))?;
            Self::from_json(&json)
        }
    }
}

fn is_cbor(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("cbor"))
}

/// Options for `EntityManager::export_entities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Embed the full metadata definition.
    pub include_metadata: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_metadata: true,
        }
    }
}

/// Options for `EntityManager::import_entities`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Collision policy; the manager's import default when `None`.
    pub merge_strategy: Option<MergeStrategy>,
}

impl ImportOptions {
    /// Uses `strategy` for collisions.
    pub fn with_merge_strategy(strategy: MergeStrategy) -> Self {
        Self {
            merge_strategy: Some(strategy),
        }
    }
}

/// Result of an import.
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    /// Cached instances of the imported entities.
    pub entities: Vec<Entity>,
    /// Imported temporary keys and the keys minted for them, by root type.
    pub temp_key_map: BTreeMap<EntityKey, EntityKey>,
}
