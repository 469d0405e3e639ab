//! Buffer of relationship links waiting for a missing parent.

use crate::entity::{Entity, EntityKey};
use crate::metadata::{EntityType, NavigationProperty};
use std::collections::HashMap;
use std::sync::Arc;

/// Children waiting on one navigation property of a parent.
#[derive(Debug, Clone)]
pub struct UnattachedTuple {
    /// Navigation the link will be wired through. Declared on the child for
    /// foreign key navigations, on the parent for unidirectional parent
    /// navigations.
    pub navigation: Arc<NavigationProperty>,
    /// Buffered children.
    pub children: Vec<Entity>,
}

/// Links that cannot be wired yet because the parent is not cached.
///
/// Entries are keyed by the parent's key string, built with the type the
/// navigation targets; [`UnattachedChildrenMap::take_tuples`] walks up the
/// attaching parent's base types so a link buffered against a base type key
/// is found when a subtype instance arrives.
#[derive(Debug, Default)]
pub struct UnattachedChildrenMap {
    map: HashMap<String, Vec<UnattachedTuple>>,
}

impl UnattachedChildrenMap {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of parent keys with pending links.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Buffers `child` under `parent_key` and `navigation`.
    pub fn add_child(
        &mut self,
        parent_key: &EntityKey,
        navigation: &Arc<NavigationProperty>,
        child: &Entity,
    ) {
        let tuples = self.map.entry(parent_key.key_string()).or_default();
        match tuples.iter_mut().find(|t| t.navigation.is_same(navigation)) {
            Some(tuple) => {
                if !tuple.children.contains(child) {
                    tuple.children.push(child.clone());
                }
            }
            None => tuples.push(UnattachedTuple {
                navigation: Arc::clone(navigation),
                children: vec![child.clone()],
            }),
        }
        tracing::trace!(
            parent = %parent_key,
            navigation = %navigation.name,
            "buffered unattached child"
        );
    }

    /// Drops the tuple for `navigation` under `parent_key`.
    pub fn remove_children(&mut self, parent_key: &str, navigation: &NavigationProperty) {
        if let Some(tuples) = self.map.get_mut(parent_key) {
            tuples.retain(|t| !t.navigation.is_same(navigation));
            if tuples.is_empty() {
                self.map.remove(parent_key);
            }
        }
    }

    /// Buffered children still attached, for one parent and navigation.
    pub fn get_children(&self, parent_key: &str, navigation: &NavigationProperty) -> Vec<Entity> {
        self.map
            .get(parent_key)
            .and_then(|tuples| tuples.iter().find(|t| t.navigation.is_same(navigation)))
            .map(|t| live(&t.children))
            .unwrap_or_default()
    }

    /// Buffered tuples for a parent, trying its own type then each base type.
    ///
    /// Returns the key string the tuples were found under.
    pub fn get_tuples(
        &self,
        key: &EntityKey,
        entity_type: &EntityType,
    ) -> Option<(String, Vec<UnattachedTuple>)> {
        candidate_keys(key, entity_type)
            .into_iter()
            .find_map(|k| self.map.get(&k).map(|tuples| (k, tuples.clone())))
    }

    /// Removes and returns every tuple buffered for a parent (any level of
    /// its type hierarchy), with detached children filtered out.
    pub fn take_tuples(
        &mut self,
        key: &EntityKey,
        entity_type: &EntityType,
    ) -> Vec<UnattachedTuple> {
        let mut taken = Vec::new();
        for k in candidate_keys(key, entity_type) {
            if let Some(tuples) = self.map.remove(&k) {
                taken.extend(tuples.into_iter().filter_map(|mut t| {
                    t.children = live(&t.children);
                    (!t.children.is_empty()).then_some(t)
                }));
            }
        }
        taken
    }

    /// Moves entries buffered under `old` to `new`, merging with existing ones.
    pub fn rekey(&mut self, old: &str, new: String) {
        let Some(tuples) = self.map.remove(old) else {
            return;
        };
        let target = self.map.entry(new).or_default();
        for tuple in tuples {
            match target.iter_mut().find(|t| t.navigation.is_same(&tuple.navigation)) {
                Some(existing) => {
                    for child in tuple.children {
                        if !existing.children.contains(&child) {
                            existing.children.push(child);
                        }
                    }
                }
                None => target.push(tuple),
            }
        }
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.map.clear();
    }
}

fn candidate_keys(key: &EntityKey, entity_type: &EntityType) -> Vec<String> {
    std::iter::once(entity_type.name())
        .chain(entity_type.ancestors().iter().map(String::as_str))
        .map(|t| key.with_type(t).key_string())
        .collect()
}

fn live(children: &[Entity]) -> Vec<Entity> {
    children
        .iter()
        .filter(|c| !c.entity_state().is_detached())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityState;
    use crate::metadata::{DataType, EntityTypeDef, MetadataStore, NavigationDef};

    fn store() -> MetadataStore {
        MetadataStore::builder("t")
            .entity_type(
                EntityTypeDef::new("Customer")
                    .key("id", DataType::Int32)
                    .navigation(NavigationDef::collection("orders", "Order").inverse("customer")),
            )
            .entity_type(EntityTypeDef::new("Preferred").base_type("Customer"))
            .entity_type(
                EntityTypeDef::new("Order")
                    .key("id", DataType::Int32)
                    .property("customerId", DataType::Int32)
                    .navigation(
                        NavigationDef::scalar("customer", "Customer")
                            .foreign_keys(["customerId"])
                            .inverse("orders"),
                    ),
            )
            .build()
            .unwrap()
    }

    fn order(store: &MetadataStore, id: i64, state: EntityState) -> Entity {
        let e = Entity::with_values(store.entity_type("Order").unwrap(), [("id", id)]).unwrap();
        e.set_state(state);
        e
    }

    #[test]
    fn add_get_remove() {
        let store = store();
        let nav = store.navigation("Order", "customer").unwrap();
        let parent = EntityKey::single("Customer", 7);
        let mut map = UnattachedChildrenMap::new();
        let o1 = order(&store, 1, EntityState::Unchanged);
        let o2 = order(&store, 2, EntityState::Detached);

        map.add_child(&parent, &nav, &o1);
        map.add_child(&parent, &nav, &o1);
        map.add_child(&parent, &nav, &o2);

        assert_eq!(map.get_children("Customer:::7", &nav), vec![o1.clone()]);
        map.remove_children("Customer:::7", &nav);
        assert!(map.is_empty());
    }

    #[test]
    fn subtype_parent_finds_base_type_entry() {
        let store = store();
        let nav = store.navigation("Order", "customer").unwrap();
        let mut map = UnattachedChildrenMap::new();
        let o1 = order(&store, 1, EntityState::Unchanged);
        map.add_child(&EntityKey::single("Customer", 7), &nav, &o1);

        let preferred = store.entity_type("Preferred").unwrap();
        let key = EntityKey::single("Preferred", 7);
        let (found_under, tuples) = map.get_tuples(&key, &preferred).unwrap();
        assert_eq!(found_under, "Customer:::7");
        assert_eq!(tuples[0].children, vec![o1.clone()]);

        let taken = map.take_tuples(&key, &preferred);
        assert_eq!(taken.len(), 1);
        assert!(map.is_empty());
    }

    #[test]
    fn rekey_moves_entries() {
        let store = store();
        let nav = store.navigation("Order", "customer").unwrap();
        let mut map = UnattachedChildrenMap::new();
        let o1 = order(&store, 1, EntityState::Added);
        map.add_child(&EntityKey::single("Customer", -1), &nav, &o1);

        map.rekey("Customer:::-1", "Customer:::7".to_string());
        assert!(map.get_children("Customer:::-1", &nav).is_empty());
        assert_eq!(map.get_children("Customer:::7", &nav), vec![o1]);
    }
}
