//! Materializing server records into detached entities.

use super::EntityManager;
use crate::entity::Entity;
use crate::error::CacheResult;
use crate::save::RawEntity;
use tracing::trace;

impl EntityManager {
    /// Builds a detached entity from a server record.
    ///
    /// Values for properties the type does not declare are ignored; values
    /// of the wrong type are an error.
    pub(crate) fn materialize(&self, raw: &RawEntity) -> CacheResult<Entity> {
        let entity_type = self.metadata.entity_type(&raw.entity_type_name)?;
        let entity = Entity::new(entity_type);
        for (name, value) in &raw.values {
            if entity.get_value(name).is_none() {
                trace!(
                    entity_type = %raw.entity_type_name,
                    property = %name,
                    "ignoring undeclared property"
                );
                continue;
            }
            entity.set_value(name, value.clone())?;
        }
        Ok(entity)
    }

    /// Materializes every record before anything touches the cache.
    pub(crate) fn materialize_all(&self, records: &[RawEntity]) -> CacheResult<Vec<Entity>> {
        records.iter().map(|raw| self.materialize(raw)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::metadata::{DataType, EntityTypeDef, MetadataStore};
    use crate::value::Value;
    use std::sync::Arc;

    fn manager() -> EntityManager {
        let store = MetadataStore::builder("t")
            .entity_type(
                EntityTypeDef::new("Product")
                    .key("id", DataType::Int32)
                    .property("name", DataType::String),
            )
            .build()
            .unwrap();
        EntityManager::new(Arc::new(store))
    }

    #[test]
    fn materializes_detached_entity() {
        let m = manager();
        let record = RawEntity::new("Product")
            .with("id", 4)
            .with("name", "Chai")
            .with("extra", 1);
        let e = m.materialize(&record).unwrap();
        assert!(!e.is_attached());
        assert_eq!(e.get_value("name"), Some(Value::from("Chai")));
        assert_eq!(e.get_value("extra"), None);
    }

    #[test]
    fn mistyped_record_fails() {
        let m = manager();
        let err = m
            .materialize_all(&[RawEntity::new("Product").with("id", "four")])
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidValue { .. }));
        assert!(matches!(
            m.materialize(&RawEntity::new("Nope")),
            Err(CacheError::UnknownEntityType { .. })
        ));
    }
}
