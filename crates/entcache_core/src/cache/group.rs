//! Per-type identity map.

use crate::entity::{values_string, Entity, EntityKey, EntityState, MergeStrategy};
use crate::error::{CacheError, CacheResult};
use crate::metadata::EntityType;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Holes tolerated before the slot vector is compacted.
const COMPACT_THRESHOLD: usize = 32;

/// Result of [`EntityGroup::attach_entity`].
#[derive(Debug, Clone)]
pub enum AttachOutcome {
    /// The entity was new to the group and is now indexed.
    Attached(Entity),
    /// The key was cached; incoming values and state replaced the cached ones.
    Merged(Entity),
    /// The key was cached and the cached entity was kept as is.
    Skipped(Entity),
}

impl AttachOutcome {
    /// The cached instance after collision resolution.
    pub fn entity(&self) -> &Entity {
        match self {
            AttachOutcome::Attached(e) | AttachOutcome::Merged(e) | AttachOutcome::Skipped(e) => e,
        }
    }

    /// Consumes the outcome, returning the cached instance.
    pub fn into_entity(self) -> Entity {
        match self {
            AttachOutcome::Attached(e) | AttachOutcome::Merged(e) | AttachOutcome::Skipped(e) => e,
        }
    }
}

/// Indexed store of the cached entities of one concrete type.
///
/// Every entity in the group is indexed by the string form of its current
/// key values, and no two entities share a key. Removal leaves a hole in the
/// slot vector so indices stay stable; holes are compacted away once they
/// pile up.
#[derive(Debug)]
pub struct EntityGroup {
    entity_type: Arc<EntityType>,
    slots: Vec<Option<Entity>>,
    index: HashMap<String, usize>,
    holes: usize,
}

impl EntityGroup {
    /// Creates an empty group.
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        Self {
            entity_type,
            slots: Vec::new(),
            index: HashMap::new(),
            holes: 0,
        }
    }

    /// Type of the entities in this group.
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the group holds no entities.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Indexes `entity`, resolving key collisions with `strategy`.
    ///
    /// A new entity is indexed but its state and owner are left to the
    /// caller. On a collision the cached instance is returned; when the
    /// strategy overwrites, the incoming values replace the cached ones,
    /// original values are discarded and the cached state becomes `state`.
    pub fn attach_entity(
        &mut self,
        entity: &Entity,
        state: EntityState,
        strategy: MergeStrategy,
    ) -> CacheResult<AttachOutcome> {
        let key = entity.key();
        let index_key = key.values_string();
        let Some(cached) = self.find_by_index_key(&index_key) else {
            self.index.insert(index_key, self.slots.len());
            self.slots.push(Some(entity.clone()));
            return Ok(AttachOutcome::Attached(entity.clone()));
        };
        if cached == *entity {
            return Ok(AttachOutcome::Skipped(cached));
        }

        let cached_state = cached.entity_state();
        if strategy == MergeStrategy::Disallowed {
            return Err(CacheError::MergeDisallowed {
                key: key.key_string(),
            });
        }
        if !strategy.overwrites(cached_state) {
            tracing::trace!(key = %key, ?strategy, %cached_state, "merge skipped");
            return Ok(AttachOutcome::Skipped(cached));
        }

        cached.replace_values_raw(&entity.values());
        cached.write_aspect(|aspect| {
            aspect.original_values.clear();
            aspect.state = state;
        });
        tracing::trace!(key = %key, ?strategy, %cached_state, %state, "merged into cached entity");
        Ok(AttachOutcome::Merged(cached))
    }

    /// Looks up an entity by key values.
    pub fn find_entity_by_key(&self, key: &EntityKey) -> Option<Entity> {
        self.find_by_index_key(&key.values_string())
    }

    /// Looks up an entity by key values.
    pub fn find_by_values(&self, values: &[Value]) -> Option<Entity> {
        self.find_by_index_key(&values_string(values))
    }

    fn find_by_index_key(&self, index_key: &str) -> Option<Entity> {
        self.index
            .get(index_key)
            .and_then(|&i| self.slots.get(i))
            .and_then(Clone::clone)
    }

    /// Removes `entity` from the index; returns false if it was not cached here.
    pub fn detach_entity(&mut self, entity: &Entity) -> bool {
        let index_key = entity.key().values_string();
        match self.index.get(&index_key) {
            Some(&i) if self.slots[i].as_ref() == Some(entity) => {
                self.index.remove(&index_key);
                self.slots[i] = None;
                self.holes += 1;
                self.compact_if_needed();
                true
            }
            _ => false,
        }
    }

    fn compact_if_needed(&mut self) {
        if self.holes < COMPACT_THRESHOLD || self.holes * 2 < self.slots.len() {
            return;
        }
        self.slots.retain(Option::is_some);
        self.holes = 0;
        self.index.clear();
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(e) = slot {
                self.index.insert(e.key().values_string(), i);
            }
        }
    }

    /// Cached entities in insertion order, optionally filtered by state.
    pub fn get_entities(&self, states: Option<&[EntityState]>) -> Vec<Entity> {
        self.slots
            .iter()
            .flatten()
            .filter(|e| states.map_or(true, |s| s.contains(&e.entity_state())))
            .cloned()
            .collect()
    }

    /// Entities that are `Added`, `Modified` or `Deleted`.
    pub fn get_changes(&self) -> Vec<Entity> {
        self.slots
            .iter()
            .flatten()
            .filter(|e| e.entity_state().is_changed())
            .cloned()
            .collect()
    }

    /// Returns true if any entity has pending changes.
    pub fn has_changes(&self) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|e| e.entity_state().is_changed())
    }

    /// Rekeys the entity holding the temporary single-part key `temp` to `real`.
    ///
    /// The entity keeps its identity; both its key property and the index
    /// entry change. Returns the entity, or `None` if no entity holds `temp`.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if another entity is already cached under `real`.
    /// The group is left unchanged.
    pub fn fixup_key(&mut self, temp: &Value, real: &Value) -> CacheResult<Option<Entity>> {
        let [key_name] = self.entity_type.key_properties() else {
            return Ok(None);
        };
        let old_key = temp.to_string();
        let Some(&slot) = self.index.get(&old_key) else {
            return Ok(None);
        };
        let new_key = real.to_string();
        if new_key != old_key && self.index.contains_key(&new_key) {
            return Err(CacheError::invalid_operation(format!(
                "cannot remap {}:{old_key} to {new_key}: that key is already cached",
                self.entity_type.name()
            )));
        }
        let Some(entity) = self.slots.get(slot).cloned().flatten() else {
            return Ok(None);
        };
        self.index.remove(&old_key);
        entity.set_value_raw(key_name, real.clone());
        self.index.insert(new_key, slot);
        Ok(Some(entity))
    }

    /// Repoints every foreign key `property` holding `old` to `new`.
    ///
    /// Recorded original values holding `old` are rewritten too, so a later
    /// reject does not resurrect the temporary value. When the property is
    /// part of the key the index follows. Returns the number of entities
    /// updated.
    pub fn update_fk_val(&mut self, property: &str, old: &Value, new: &Value) -> usize {
        let is_key = self
            .entity_type
            .key_properties()
            .iter()
            .any(|k| k == property);
        let mut updated = 0;
        for (slot, entity) in self.slots.iter().enumerate() {
            let Some(entity) = entity else { continue };
            entity.write_aspect(|aspect| {
                if aspect.original_values.get(property) == Some(old) {
                    aspect.original_values.insert(property.to_string(), new.clone());
                }
            });
            if entity.get_value(property).as_ref() != Some(old) {
                continue;
            }
            let old_index_key = is_key.then(|| entity.key().values_string());
            entity.set_value_raw(property, new.clone());
            if let Some(old_index_key) = old_index_key {
                self.index.remove(&old_index_key);
                self.index.insert(entity.key().values_string(), slot);
            }
            updated += 1;
        }
        updated
    }

    /// Drops every entity, returning them.
    pub fn clear(&mut self) -> Vec<Entity> {
        self.index.clear();
        self.holes = 0;
        std::mem::take(&mut self.slots).into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::metadata::{DataType, EntityTypeDef, MetadataStore};

    fn customer_type() -> Arc<EntityType> {
        MetadataStore::builder("t")
            .entity_type(
                EntityTypeDef::new("Customer")
                    .key("id", DataType::Int32)
                    .property("name", DataType::String)
                    .property("regionId", DataType::Int32),
            )
            .build()
            .unwrap()
            .entity_type("Customer")
            .unwrap()
    }

    fn customer(t: &Arc<EntityType>, id: i64, name: &str) -> Entity {
        Entity::with_values(
            Arc::clone(t),
            [("id", Value::from(id)), ("name", Value::from(name))],
        )
        .unwrap()
    }

    fn cached(group: &mut EntityGroup, e: &Entity, state: EntityState) {
        let outcome = group.attach_entity(e, state, MergeStrategy::Disallowed).unwrap();
        assert!(matches!(outcome, AttachOutcome::Attached(_)));
        e.set_state(state);
    }

    #[test]
    fn attach_find_detach() {
        let t = customer_type();
        let mut group = EntityGroup::new(Arc::clone(&t));
        let c = customer(&t, 1, "a");
        cached(&mut group, &c, EntityState::Unchanged);

        assert_eq!(group.find_entity_by_key(&c.key()), Some(c.clone()));
        assert_eq!(group.len(), 1);
        assert!(group.detach_entity(&c));
        assert!(!group.detach_entity(&c));
        assert!(group.find_entity_by_key(&c.key()).is_none());
        assert!(group.is_empty());
    }

    #[test]
    fn disallowed_collision_is_an_error() {
        let t = customer_type();
        let mut group = EntityGroup::new(Arc::clone(&t));
        cached(&mut group, &customer(&t, 1, "a"), EntityState::Unchanged);
        let result = group.attach_entity(
            &customer(&t, 1, "b"),
            EntityState::Unchanged,
            MergeStrategy::Disallowed,
        );
        assert!(matches!(result, Err(CacheError::MergeDisallowed { .. })));
    }

    #[test]
    fn preserve_changes_keeps_modified() {
        let t = customer_type();
        let mut group = EntityGroup::new(Arc::clone(&t));
        let c = customer(&t, 1, "local");
        cached(&mut group, &c, EntityState::Modified);

        let outcome = group
            .attach_entity(
                &customer(&t, 1, "server"),
                EntityState::Unchanged,
                MergeStrategy::PreserveChanges,
            )
            .unwrap();
        assert!(matches!(outcome, AttachOutcome::Skipped(_)));
        assert_eq!(c.get_value("name"), Some(Value::from("local")));
        assert_eq!(c.entity_state(), EntityState::Modified);
    }

    #[test]
    fn overwrite_replaces_values_and_state() {
        let t = customer_type();
        let mut group = EntityGroup::new(Arc::clone(&t));
        let c = customer(&t, 1, "local");
        cached(&mut group, &c, EntityState::Modified);
        c.write_aspect(|a| {
            a.original_values.insert("name".into(), Value::from("orig"));
        });

        let outcome = group
            .attach_entity(
                &customer(&t, 1, "server"),
                EntityState::Unchanged,
                MergeStrategy::OverwriteChanges,
            )
            .unwrap();
        assert_eq!(outcome.entity(), &c);
        assert_eq!(c.get_value("name"), Some(Value::from("server")));
        assert_eq!(c.entity_state(), EntityState::Unchanged);
        assert!(c.original_values().is_empty());
    }

    #[test]
    fn fixup_key_preserves_identity() {
        let t = customer_type();
        let mut group = EntityGroup::new(Arc::clone(&t));
        let c = customer(&t, -1, "new");
        cached(&mut group, &c, EntityState::Added);

        let fixed = group.fixup_key(&Value::Integer(-1), &Value::Integer(7)).unwrap().unwrap();
        assert_eq!(fixed, c);
        assert_eq!(c.get_value("id"), Some(Value::Integer(7)));
        assert_eq!(group.find_by_values(&[Value::Integer(7)]), Some(c));
        assert!(group.find_by_values(&[Value::Integer(-1)]).is_none());
        assert!(group.fixup_key(&Value::Integer(-1), &Value::Integer(8)).unwrap().is_none());
    }

    #[test]
    fn fixup_key_refuses_a_cached_real_key() {
        let t = customer_type();
        let mut group = EntityGroup::new(Arc::clone(&t));
        let added = customer(&t, -1, "new");
        let existing = customer(&t, 7, "old");
        cached(&mut group, &added, EntityState::Added);
        cached(&mut group, &existing, EntityState::Unchanged);

        let err = group.fixup_key(&Value::Integer(-1), &Value::Integer(7)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(group.find_by_values(&[Value::Integer(7)]), Some(existing.clone()));
        assert_eq!(group.find_by_values(&[Value::Integer(-1)]), Some(added.clone()));
        assert_eq!(added.get_value("id"), Some(Value::Integer(-1)));
        assert_eq!(existing.get_value("id"), Some(Value::Integer(7)));
    }

    #[test]
    fn update_fk_val_rewrites_values_and_originals() {
        let t = customer_type();
        let mut group = EntityGroup::new(Arc::clone(&t));
        let a = customer(&t, 1, "a");
        let b = customer(&t, 2, "b");
        a.set_value("regionId", -5).unwrap();
        b.set_value("regionId", 3).unwrap();
        cached(&mut group, &a, EntityState::Unchanged);
        cached(&mut group, &b, EntityState::Modified);
        b.write_aspect(|asp| {
            asp.original_values.insert("regionId".into(), Value::Integer(-5));
        });

        let n = group.update_fk_val("regionId", &Value::Integer(-5), &Value::Integer(9));
        assert_eq!(n, 1);
        assert_eq!(a.get_value("regionId"), Some(Value::Integer(9)));
        assert_eq!(b.get_value("regionId"), Some(Value::Integer(3)));
        assert_eq!(b.original_values().get("regionId"), Some(&Value::Integer(9)));
    }

    #[test]
    fn compaction_keeps_index_consistent() {
        let t = customer_type();
        let mut group = EntityGroup::new(Arc::clone(&t));
        let all: Vec<Entity> = (0..100).map(|i| customer(&t, i + 1, "x")).collect();
        for e in &all {
            cached(&mut group, e, EntityState::Unchanged);
        }
        for e in all.iter().take(80) {
            assert!(group.detach_entity(e));
        }
        assert_eq!(group.len(), 20);
        for e in all.iter().skip(80) {
            assert_eq!(group.find_entity_by_key(&e.key()).as_ref(), Some(e));
        }
        assert_eq!(group.get_entities(None).len(), 20);
    }

    #[test]
    fn changes_and_state_filters() {
        let t = customer_type();
        let mut group = EntityGroup::new(Arc::clone(&t));
        cached(&mut group, &customer(&t, 1, "a"), EntityState::Unchanged);
        cached(&mut group, &customer(&t, 2, "b"), EntityState::Added);
        cached(&mut group, &customer(&t, 3, "c"), EntityState::Deleted);

        assert_eq!(group.get_changes().len(), 2);
        assert!(group.has_changes());
        assert_eq!(
            group
                .get_entities(Some(&[EntityState::Unchanged, EntityState::Added]))
                .len(),
            2
        );
    }
}
