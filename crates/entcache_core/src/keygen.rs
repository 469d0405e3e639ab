//! Temporary key generation.

use crate::entity::EntityKey;
use crate::error::{CacheError, CacheResult};
use crate::metadata::{DataType, EntityType};
use crate::value::Value;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Mints provisional keys for new entities with auto-generated keys.
///
/// Each manager owns its own generator; keys are never shared between
/// managers.
pub trait KeyGenerator: Send + Sync {
    /// Returns a fresh temporary value for the single key property of
    /// `entity_type` and remembers it.
    fn generate_temp_key_value(&mut self, entity_type: &EntityType) -> CacheResult<Value>;

    /// Returns true if `key` was minted by this generator and not yet remapped.
    fn is_temp_key(&self, key: &EntityKey) -> bool;

    /// All outstanding temporary keys.
    fn temp_keys(&self) -> Vec<EntityKey>;

    /// Forgets a temporary key after it has been replaced by a real one.
    fn remove(&mut self, key: &EntityKey);
}

/// Default generator.
///
/// Integer keys count down from -1 per type hierarchy (so they can never
/// collide with server identities), GUID keys are random v4 UUIDs and
/// string keys are `K_1`, `K_2`, ...
#[derive(Debug, Default)]
pub struct DefaultKeyGenerator {
    next_integer: HashMap<String, i64>,
    next_string: u64,
    temp_keys: BTreeSet<EntityKey>,
}

impl DefaultKeyGenerator {
    /// Creates a generator with no outstanding keys.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyGenerator for DefaultKeyGenerator {
    fn generate_temp_key_value(&mut self, entity_type: &EntityType) -> CacheResult<Value> {
        let [key_name] = entity_type.key_properties() else {
            return Err(CacheError::key_generation(
                entity_type.name(),
                "temporary keys need exactly one key property",
            ));
        };
        let data_type = entity_type
            .data_property(key_name)
            .map(|p| p.data_type)
            .ok_or_else(|| CacheError::unknown_property(entity_type.name(), key_name.as_str()))?;

        let value = match data_type {
            DataType::Int32 | DataType::Int64 => {
                let next = self
                    .next_integer
                    .entry(entity_type.root_type_name().to_string())
                    .or_insert(-1);
                let value = *next;
                *next -= 1;
                Value::Integer(value)
            }
            DataType::Guid => Value::Guid(Uuid::new_v4()),
            DataType::String => {
                self.next_string += 1;
                Value::Text(format!("K_{}", self.next_string))
            }
            other => {
                return Err(CacheError::key_generation(
                    entity_type.name(),
                    format!("cannot generate {other} keys"),
                ))
            }
        };
        self.temp_keys
            .insert(EntityKey::single(entity_type.root_type_name(), value.clone()));
        Ok(value)
    }

    fn is_temp_key(&self, key: &EntityKey) -> bool {
        self.temp_keys.contains(key)
    }

    fn temp_keys(&self) -> Vec<EntityKey> {
        self.temp_keys.iter().cloned().collect()
    }

    fn remove(&mut self, key: &EntityKey) {
        self.temp_keys.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntityTypeDef, MetadataStore};
    use std::collections::HashSet;

    fn store() -> MetadataStore {
        MetadataStore::builder("t")
            .entity_type(EntityTypeDef::new("Customer").key("id", DataType::Int32))
            .entity_type(EntityTypeDef::new("Preferred").base_type("Customer"))
            .entity_type(EntityTypeDef::new("Tag").key("id", DataType::Guid))
            .entity_type(EntityTypeDef::new("Code").key("code", DataType::String))
            .entity_type(EntityTypeDef::new("Stamp").key("at", DataType::DateTime))
            .build()
            .unwrap()
    }

    #[test]
    fn integer_keys_count_down_per_hierarchy() {
        let store = store();
        let mut gen = DefaultKeyGenerator::new();
        let customer = store.entity_type("Customer").unwrap();
        let preferred = store.entity_type("Preferred").unwrap();

        assert_eq!(gen.generate_temp_key_value(&customer).unwrap(), Value::Integer(-1));
        assert_eq!(gen.generate_temp_key_value(&preferred).unwrap(), Value::Integer(-2));
        assert!(gen.is_temp_key(&EntityKey::single("Customer", -2)));

        gen.remove(&EntityKey::single("Customer", -1));
        assert_eq!(gen.temp_keys(), vec![EntityKey::single("Customer", -2)]);
    }

    #[test]
    fn other_key_types() {
        let store = store();
        let mut gen = DefaultKeyGenerator::new();
        let tag = store.entity_type("Tag").unwrap();
        let code = store.entity_type("Code").unwrap();
        let stamp = store.entity_type("Stamp").unwrap();

        let a = gen.generate_temp_key_value(&tag).unwrap();
        let b = gen.generate_temp_key_value(&tag).unwrap();
        assert_ne!(a, b);
        assert_eq!(gen.generate_temp_key_value(&code).unwrap(), Value::from("K_1"));
        assert!(matches!(
            gen.generate_temp_key_value(&stamp),
            Err(CacheError::KeyGeneration { .. })
        ));
    }

    #[test]
    fn many_keys_are_distinct() {
        let store = store();
        let mut gen = DefaultKeyGenerator::new();
        let customer = store.entity_type("Customer").unwrap();
        let keys: HashSet<Value> = (0..500)
            .map(|_| gen.generate_temp_key_value(&customer).unwrap())
            .collect();
        assert_eq!(keys.len(), 500);
    }
}
