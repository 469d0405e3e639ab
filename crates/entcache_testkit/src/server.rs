//! In-memory data services.
//!
//! [`InMemorySaveServer`] behaves like a data service with identity keys:
//! it assigns permanent keys to entities saved with temporary ones,
//! rewrites foreign keys that referenced them, and answers with the saved
//! entities plus the key mappings. [`InMemoryQueryServer`] serves queries
//! from a fixed set of records.

use entcache_core::{
    Entity, EntityQuery, EntityState, KeyMapping, MetadataStore, QueryFailure, QueryResponse,
    QueryTransport, RawEntity, SaveFailure, SaveRequest, SaveResponse, SaveTransport, Value,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
struct SaveServerState {
    /// Next permanent key per root type.
    next_ids: HashMap<String, i64>,
    /// Stored records by key string.
    rows: BTreeMap<String, RawEntity>,
    calls: usize,
    failures: Vec<SaveFailure>,
    omit_entities: bool,
}

/// A save endpoint backed by a map of records.
pub struct InMemorySaveServer {
    metadata: Arc<MetadataStore>,
    state: Mutex<SaveServerState>,
}

impl InMemorySaveServer {
    /// Creates a server whose identity keys start at 1.
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        Self {
            metadata,
            state: Mutex::new(SaveServerState::default()),
        }
    }

    /// Sets the next identity value handed out for `root_type`.
    #[must_use]
    pub fn with_next_id(self, root_type: &str, next: i64) -> Self {
        self.state.lock().next_ids.insert(root_type.to_string(), next);
        self
    }

    /// Makes the next save fail with `failure`.
    pub fn fail_next(&self, failure: SaveFailure) {
        self.state.lock().failures.push(failure);
    }

    /// Answers saves with key mappings only, omitting the saved entities.
    pub fn omit_entities(&self, omit: bool) {
        self.state.lock().omit_entities = omit;
    }

    /// Number of save requests received.
    pub fn call_count(&self) -> usize {
        self.state.lock().calls
    }

    /// Stored record for `key_string`, if any.
    pub fn row(&self, key_string: &str) -> Option<RawEntity> {
        self.state.lock().rows.get(key_string).cloned()
    }

    /// Number of stored records.
    pub fn row_count(&self) -> usize {
        self.state.lock().rows.len()
    }

    fn assign_keys(
        &self,
        state: &mut SaveServerState,
        request: &SaveRequest,
    ) -> Result<Vec<KeyMapping>, SaveFailure> {
        let mut mappings = Vec::new();
        for snapshot in request.entities.iter().filter(|s| s.has_temp_key) {
            let entity_type = self
                .metadata
                .entity_type(&snapshot.entity_type_name)
                .map_err(|e| SaveFailure::new(e.to_string()))?;
            let Some(temp_value) = snapshot.key.values().first() else {
                continue;
            };
            let next = state
                .next_ids
                .entry(entity_type.root_type_name().to_string())
                .or_insert(1);
            mappings.push(KeyMapping {
                entity_type_name: snapshot.entity_type_name.clone(),
                temp_value: temp_value.clone(),
                real_value: Value::Integer(*next),
            });
            *next += 1;
        }
        Ok(mappings)
    }

    /// Replaces temporary key and foreign key values in `record`.
    fn apply_mappings(
        &self,
        record: &mut RawEntity,
        mappings: &[KeyMapping],
    ) -> Result<(), SaveFailure> {
        let entity_type = self
            .metadata
            .entity_type(&record.entity_type_name)
            .map_err(|e| SaveFailure::new(e.to_string()))?;
        let lookup = |target_type: &str, value: &Value| {
            let root = self.metadata.find_entity_type(target_type)?.root_type_name().to_string();
            mappings
                .iter()
                .find(|m| {
                    &m.temp_value == value
                        && self
                            .metadata
                            .find_entity_type(&m.entity_type_name)
                            .is_some_and(|t| t.root_type_name() == root)
                })
                .map(|m| m.real_value.clone())
        };

        if let [key_name] = entity_type.key_properties() {
            if let Some(real) = record
                .values
                .get(key_name)
                .and_then(|v| lookup(entity_type.name(), v))
            {
                record.values.insert(key_name.clone(), real);
            }
        }
        for nav in entity_type.navigation_properties().iter().filter(|n| n.is_scalar) {
            for fk in &nav.foreign_keys {
                if let Some(real) = record.values.get(fk).and_then(|v| lookup(&nav.target, v)) {
                    record.values.insert(fk.clone(), real);
                }
            }
        }
        Ok(())
    }
}

impl SaveTransport for InMemorySaveServer {
    fn save_changes(&self, request: &SaveRequest) -> Result<SaveResponse, SaveFailure> {
        let mut state = self.state.lock();
        state.calls += 1;
        if !state.failures.is_empty() {
            return Err(state.failures.remove(0));
        }

        let key_mappings = self.assign_keys(&mut state, request)?;
        let mut entities = Vec::with_capacity(request.entities.len());
        for snapshot in &request.entities {
            let mut record = RawEntity::from(snapshot);
            self.apply_mappings(&mut record, &key_mappings)?;
            let key = self
                .metadata
                .entity_type(&record.entity_type_name)
                .and_then(|t| Entity::with_values(t, record.values.clone()))
                .map_err(|e| SaveFailure::new(e.to_string()))?
                .key()
                .key_string();
            if snapshot.entity_state == EntityState::Deleted {
                state.rows.remove(&key);
                continue;
            }
            state.rows.insert(key, record.clone());
            entities.push(record);
        }
        tracing::debug!(
            saved = entities.len(),
            key_mappings = key_mappings.len(),
            "in-memory server saved"
        );
        if state.omit_entities {
            entities.clear();
        }
        Ok(SaveResponse {
            entities,
            key_mappings,
        })
    }
}

/// A query endpoint over a fixed set of records.
///
/// Records are materialized as detached entities so the query's filter,
/// ordering and paging run exactly as they would against the cache.
pub struct InMemoryQueryServer {
    metadata: Arc<MetadataStore>,
    records: Mutex<Vec<RawEntity>>,
    failures: Mutex<Vec<QueryFailure>>,
    calls: Mutex<usize>,
}

impl InMemoryQueryServer {
    /// Creates a server with no records.
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        Self {
            metadata,
            records: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
        }
    }

    /// Adds records.
    #[must_use]
    pub fn with_records(self, records: impl IntoIterator<Item = RawEntity>) -> Self {
        self.records.lock().extend(records);
        self
    }

    /// Replaces the record with the same type and key, or adds it.
    pub fn upsert(&self, record: RawEntity) {
        let mut records = self.records.lock();
        let key = self.key_string(&record);
        match records.iter_mut().find(|r| self.key_string(r) == key) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Makes the next query fail with `failure`.
    pub fn fail_next(&self, failure: QueryFailure) {
        self.failures.lock().push(failure);
    }

    /// Number of queries received.
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }

    fn key_string(&self, record: &RawEntity) -> Option<String> {
        let entity_type = self.metadata.entity_type(&record.entity_type_name).ok()?;
        let entity = Entity::with_values(entity_type, record.values.clone()).ok()?;
        Some(entity.key().key_string())
    }
}

impl QueryTransport for InMemoryQueryServer {
    fn execute(&self, query: &EntityQuery) -> Result<QueryResponse, QueryFailure> {
        *self.calls.lock() += 1;
        {
            let mut failures = self.failures.lock();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }
        let target = self
            .metadata
            .entity_type(query.entity_type())
            .map_err(|e| QueryFailure::new(e.to_string()).with_status(400))?;

        let mut candidates = Vec::new();
        for record in self.records.lock().iter() {
            let Ok(entity_type) = self.metadata.entity_type(&record.entity_type_name) else {
                continue;
            };
            if !entity_type.is_self_or_subtype_of(target.name()) {
                continue;
            }
            let entity = Entity::with_values(entity_type, record.values.clone())
                .map_err(|e| QueryFailure::new(e.to_string()).with_status(500))?;
            candidates.push(entity);
        }
        let inline_count = candidates.iter().filter(|e| query.matches(e)).count();
        let records = query
            .apply(candidates)
            .iter()
            .map(|e| RawEntity {
                entity_type_name: e.type_name(),
                values: e.values(),
            })
            .collect();
        Ok(QueryResponse {
            records,
            inline_count: Some(inline_count),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use entcache_core::SaveOptions;

    #[test]
    fn assigns_real_keys_and_rewrites_foreign_keys() {
        let manager = sales_manager();
        let customer = new_customer(&manager, "Alfreds");
        let _order = new_order(&manager, &customer);
        let server = InMemorySaveServer::new(sales_metadata()).with_next_id("Customer", 7);

        let pending = manager.begin_save(None, Some(SaveOptions::default())).unwrap();
        let response = server.save_changes(pending.request()).unwrap();

        let customer_mapping = response
            .key_mappings
            .iter()
            .find(|m| m.entity_type_name == "Customer")
            .unwrap();
        assert_eq!(customer_mapping.real_value, Value::Integer(7));
        let order = response
            .entities
            .iter()
            .find(|r| r.entity_type_name == "Order")
            .unwrap();
        assert_eq!(order.values.get("customerId"), Some(&Value::Integer(7)));
        assert_eq!(server.row_count(), 2);
        manager.complete_save(pending, Ok(response)).unwrap();
    }

    #[test]
    fn serves_queries_with_counts() {
        let server = InMemoryQueryServer::new(sales_metadata()).with_records([
            customer_record(1, "Alfreds"),
            customer_record(2, "Berglunds"),
            RawEntity::new("PreferredCustomer").with("id", 3).with("name", "Chop-suey"),
            order_record(10, 1, 1),
        ]);
        let response = server
            .execute(&EntityQuery::from("Customer").order_by_property("id", true).take(2))
            .unwrap();
        assert_eq!(response.inline_count, Some(3));
        assert_eq!(response.records.len(), 2);
        assert_eq!(response.records[0].entity_type_name, "PreferredCustomer");

        server.fail_next(QueryFailure::new("offline"));
        assert!(server.execute(&EntityQuery::from("Customer")).is_err());
        assert_eq!(server.call_count(), 2);
    }
}
