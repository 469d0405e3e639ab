//! Export and import of cached entities.

use super::EntityManager;
use crate::bundle::{
    EntityGroupExport, ExportBundle, ExportOptions, ExportedAspect, ImportOptions, ImportResult,
    RawEntityExport, SerializedKey,
};
use crate::cache::{find_entity, AttachOutcome};
use crate::entity::{Entity, EntityKey, EntityState, MergeStrategy};
use crate::error::{CacheError, CacheResult};
use crate::events::EntityAction;
use crate::metadata::{EntityType, METADATA_VERSION};
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

/// An imported entity before it is attached.
struct Staged {
    entity: Entity,
    state: EntityState,
    original_values: BTreeMap<String, Value>,
    temp_nav_prop_names: Vec<String>,
    extra_metadata: Option<serde_json::Value>,
    has_temp_key: bool,
}

impl EntityManager {
    /// Exports `entities`, or every cached entity when `None`.
    ///
    /// Property names are written with the server naming convention.
    /// Temporary keys are listed so that an importing manager can replace
    /// them with keys of its own.
    pub fn export_entities(
        &self,
        entities: Option<&[Entity]>,
        options: ExportOptions,
    ) -> CacheResult<ExportBundle> {
        let entities = match entities {
            Some(list) => {
                for entity in list {
                    if entity.manager_id() != Some(self.id()) {
                        return Err(CacheError::invalid_operation(format!(
                            "{} is not attached to this entity manager",
                            entity.key()
                        )));
                    }
                }
                list.to_vec()
            }
            None => self.get_entities(None, None)?,
        };
        let temp_keys: BTreeSet<EntityKey> =
            self.state.lock().key_generator.temp_keys().into_iter().collect();
        let naming = self.metadata.naming_convention();

        let mut groups: BTreeMap<String, EntityGroupExport> = BTreeMap::new();
        let mut serialized_keys = Vec::new();
        for entity in &entities {
            let entity_type = entity.entity_type();
            let current = entity.values();
            let values = entity_type
                .data_properties()
                .iter()
                .map(|p| {
                    let value = current.get(&p.name).cloned().unwrap_or_default();
                    (naming.server_property_name(&p.name), p.data_type.to_json(&value))
                })
                .collect();
            let original_values_map = entity
                .original_values()
                .iter()
                .filter_map(|(name, value)| {
                    let prop = entity_type.data_property(name)?;
                    Some((naming.server_property_name(name), prop.data_type.to_json(value)))
                })
                .collect();
            let temp_nav_prop_names = entity_type
                .navigation_properties()
                .iter()
                .filter(|nav| nav.is_scalar && nav.foreign_keys.len() == 1)
                .filter(|nav| {
                    let Some(target) = self.metadata.find_entity_type(&nav.target) else {
                        return false;
                    };
                    let fk = entity.values_of(&nav.foreign_keys);
                    temp_keys.contains(&EntityKey::new(target.root_type_name(), fk))
                })
                .map(|nav| nav.name.clone())
                .collect();

            if entity.has_temp_key() {
                serialized_keys.push(SerializedKey {
                    entity_type: entity_type.name().to_string(),
                    values: key_json(&entity_type, entity.key().values()),
                });
            }
            groups
                .entry(entity_type.name().to_string())
                .or_default()
                .entities
                .push(RawEntityExport {
                    values,
                    entity_aspect: ExportedAspect {
                        entity_state: entity.entity_state().name().to_string(),
                        temp_nav_prop_names,
                        original_values_map,
                        extra_metadata: entity.extra_metadata(),
                    },
                });
        }

        debug!(
            manager = %self.id(),
            entities = entities.len(),
            temp_keys = serialized_keys.len(),
            "entities exported"
        );
        Ok(ExportBundle {
            metadata_store: options.include_metadata.then(|| self.metadata.definition()),
            metadata_version: METADATA_VERSION.to_string(),
            metadata_store_name: self.metadata.name().to_string(),
            data_service: self.config.data_service.clone(),
            save_options: self.config.save_options.clone(),
            query_options: self.config.query_options.clone(),
            validation_options: self.config.validation_options.clone(),
            entity_group_map: groups,
            temp_keys: serialized_keys,
        })
    }

    /// Imports a bundle produced by [`EntityManager::export_entities`].
    ///
    /// Temporary keys in the bundle are replaced with keys minted by this
    /// manager, and foreign keys that referenced them within the bundle
    /// follow. Entities keep their exported state and original values.
    ///
    /// # Errors
    ///
    /// `ImportFormat` if the bundle was exported from a different metadata
    /// store or version, names unknown types, holds `Detached` entities or
    /// values that do not fit their properties. `MergeDisallowed` if the
    /// strategy is `Disallowed` and an entity is already cached; nothing is
    /// imported in that case.
    pub fn import_entities(
        &self,
        bundle: &ExportBundle,
        options: ImportOptions,
    ) -> CacheResult<ImportResult> {
        if bundle.metadata_store_name != self.metadata.name() {
            return Err(CacheError::import_format(format!(
                "bundle was exported from metadata store {}, this manager uses {}",
                bundle.metadata_store_name,
                self.metadata.name()
            )));
        }
        if bundle.metadata_version != METADATA_VERSION {
            return Err(CacheError::import_format(format!(
                "unsupported metadata version {}",
                bundle.metadata_version
            )));
        }
        let strategy = options.merge_strategy.unwrap_or(self.config.import_merge_strategy);

        let bundle_temp_keys = bundle
            .temp_keys
            .iter()
            .map(|k| {
                let entity_type = self.import_type(&k.entity_type)?;
                let values = key_values(&entity_type, &k.values)?;
                Ok(EntityKey::new(entity_type.root_type_name(), values))
            })
            .collect::<CacheResult<HashSet<EntityKey>>>()?;
        let mut staged = Vec::with_capacity(bundle.entity_count());
        for (type_name, group) in &bundle.entity_group_map {
            let entity_type = self.import_type(type_name)?;
            for raw in &group.entities {
                staged.push(self.stage(&entity_type, raw)?);
            }
        }

        let _deferred = self.ctx.feed.defer();
        let mut temp_key_map = BTreeMap::new();
        let mut entities: Vec<Entity> = Vec::with_capacity(staged.len());
        {
            let mut cache = self.state.lock();
            if strategy == MergeStrategy::Disallowed {
                for s in &staged {
                    let key = s.entity.key();
                    if !bundle_temp_keys.contains(&root_key(&s.entity, &key))
                        && find_entity(&self.metadata, &cache.groups, &key).is_some()
                    {
                        return Err(CacheError::MergeDisallowed {
                            key: key.key_string(),
                        });
                    }
                }
            }

            for s in &staged {
                let key = root_key(&s.entity, &s.entity.key());
                if bundle_temp_keys.contains(&key) && !temp_key_map.contains_key(&key) {
                    let entity_type = s.entity.entity_type();
                    let value = cache.key_generator.generate_temp_key_value(&entity_type)?;
                    let minted = EntityKey::new(key.entity_type(), vec![value]);
                    temp_key_map.insert(key.clone(), minted);
                }
            }
            for s in &mut staged {
                self.remap_staged(s, &temp_key_map)?;
            }

            let _loading = self.ctx.loading.enter();
            for s in staged {
                let outcome = self.attach_in(&mut cache, &s.entity, s.state, strategy)?;
                let action = match &outcome {
                    AttachOutcome::Attached(_) => Some(EntityAction::AttachOnImport),
                    AttachOutcome::Merged(_) => Some(EntityAction::MergeOnImport),
                    AttachOutcome::Skipped(_) => None,
                };
                let cached = outcome.into_entity();
                if let Some(action) = action {
                    cached.write_aspect(|a| {
                        a.original_values = s.original_values;
                        a.extra_metadata = s.extra_metadata;
                        a.has_temp_key = s.has_temp_key;
                    });
                    self.ctx.feed.publish(action, Some(&cached));
                }
                if !entities.contains(&cached) {
                    entities.push(cached);
                }
            }
        }
        self.ctx.mark_changed();
        debug!(
            manager = %self.id(),
            entities = entities.len(),
            temp_keys = temp_key_map.len(),
            ?strategy,
            "entities imported"
        );
        Ok(ImportResult {
            entities,
            temp_key_map,
        })
    }

    fn import_type(&self, name: &str) -> CacheResult<Arc<EntityType>> {
        self.metadata
            .entity_type(name)
            .map_err(|_| CacheError::import_format(format!("unknown entity type {name}")))
    }

    fn stage(&self, entity_type: &Arc<EntityType>, raw: &RawEntityExport) -> CacheResult<Staged> {
        let aspect = &raw.entity_aspect;
        let state = EntityState::from_name(&aspect.entity_state)
            .filter(|s| !s.is_detached())
            .ok_or_else(|| {
                CacheError::import_format(format!(
                    "{} entity has invalid state {}",
                    entity_type.name(),
                    aspect.entity_state
                ))
            })?;
        let entity = Entity::new(Arc::clone(entity_type));
        for (name, value) in self.client_values(entity_type, &raw.values)? {
            entity
                .set_value(&name, value)
                .map_err(|e| CacheError::import_format(e.to_string()))?;
        }
        Ok(Staged {
            entity,
            state,
            original_values: self.client_values(entity_type, &aspect.original_values_map)?,
            temp_nav_prop_names: aspect.temp_nav_prop_names.clone(),
            extra_metadata: aspect.extra_metadata.clone(),
            has_temp_key: false,
        })
    }

    /// Converts server-named JSON values to client-named values, skipping
    /// names the type does not declare.
    fn client_values(
        &self,
        entity_type: &EntityType,
        json: &BTreeMap<String, serde_json::Value>,
    ) -> CacheResult<BTreeMap<String, Value>> {
        let naming = self.metadata.naming_convention();
        let mut values = BTreeMap::new();
        for (server_name, raw) in json {
            let name = naming.client_property_name(server_name);
            let Some(prop) = entity_type.data_property(&name) else {
                continue;
            };
            let value = prop.data_type.from_json(raw).map_err(|message| {
                CacheError::import_format(format!("{}.{name}: {message}", entity_type.name()))
            })?;
            values.insert(name, value);
        }
        Ok(values)
    }

    /// Applies freshly minted temporary keys to a staged entity's key and
    /// to the foreign keys the bundle flagged as temporary.
    fn remap_staged(
        &self,
        staged: &mut Staged,
        temp_key_map: &BTreeMap<EntityKey, EntityKey>,
    ) -> CacheResult<()> {
        let entity_type = staged.entity.entity_type();
        if let Some(minted) = temp_key_map.get(&root_key(&staged.entity, &staged.entity.key())) {
            let key_name = entity_type.key_properties().first();
            if let (Some(key_name), Some(value)) = (key_name, minted.values().first()) {
                staged.entity.set_value(key_name, value.clone())?;
                staged.has_temp_key = true;
            }
        }
        for nav_name in &staged.temp_nav_prop_names {
            let Some(nav) = entity_type.navigation_property(nav_name) else {
                continue;
            };
            let target = self.metadata.find_entity_type(&nav.target);
            let (Some(target), [fk_name]) = (target, nav.foreign_keys.as_slice()) else {
                continue;
            };
            let fk = staged.entity.values_of(&nav.foreign_keys);
            let old = EntityKey::new(target.root_type_name(), fk);
            if let Some(value) = temp_key_map.get(&old).and_then(|k| k.values().first()) {
                staged.entity.set_value(fk_name, value.clone())?;
            }
        }
        Ok(())
    }
}

fn root_key(entity: &Entity, key: &EntityKey) -> EntityKey {
    key.with_type(entity.entity_type().root_type_name())
}

fn key_json(entity_type: &EntityType, values: &[Value]) -> Vec<serde_json::Value> {
    entity_type
        .key_properties()
        .iter()
        .zip(values)
        .map(|(name, value)| match entity_type.data_property(name) {
            Some(prop) => prop.data_type.to_json(value),
            None => serde_json::Value::Null,
        })
        .collect()
}

fn key_values(entity_type: &EntityType, json: &[serde_json::Value]) -> CacheResult<Vec<Value>> {
    entity_type
        .key_properties()
        .iter()
        .zip(json)
        .map(|(name, raw)| {
            let prop = entity_type
                .data_property(name)
                .ok_or_else(|| CacheError::unknown_property(entity_type.name(), name.as_str()))?;
            prop.data_type.from_json(raw).map_err(|message| {
                CacheError::import_format(format!("{}.{name}: {message}", entity_type.name()))
            })
        })
        .collect()
}
