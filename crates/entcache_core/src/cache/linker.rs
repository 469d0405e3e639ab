//! Relationship linking.
//!
//! Runs once for every entity that enters the cache. Linking is independent
//! of arrival order: whichever side of a relationship attaches second
//! completes the wiring, either by finding the other side in the cache or
//! by draining the links the other side buffered for it.
//!
//! All writes here are raw (untracked); callers hold the loading scope.

use super::group::EntityGroup;
use super::unattached::UnattachedChildrenMap;
use crate::entity::{Entity, EntityKey};
use crate::metadata::{MetadataStore, NavigationKind, NavigationProperty};
use crate::value::Value;
use std::collections::HashMap;

/// Finds a cached entity by key, searching the key's type and all its subtypes.
pub(crate) fn find_entity(
    metadata: &MetadataStore,
    groups: &HashMap<String, EntityGroup>,
    key: &EntityKey,
) -> Option<Entity> {
    let entity_type = metadata.find_entity_type(key.entity_type())?;
    entity_type
        .self_and_subtypes()
        .iter()
        .find_map(|t| groups.get(t)?.find_entity_by_key(key))
}

/// Wires navigation properties between an entity and its relatives.
pub(crate) struct RelationshipLinker<'a> {
    metadata: &'a MetadataStore,
    groups: &'a HashMap<String, EntityGroup>,
    unattached: &'a mut UnattachedChildrenMap,
}

impl<'a> RelationshipLinker<'a> {
    pub(crate) fn new(
        metadata: &'a MetadataStore,
        groups: &'a HashMap<String, EntityGroup>,
        unattached: &'a mut UnattachedChildrenMap,
    ) -> Self {
        Self {
            metadata,
            groups,
            unattached,
        }
    }

    /// Links a freshly attached entity as parent, then as child.
    pub(crate) fn link(&mut self, entity: &Entity) {
        self.resolve_as_parent(entity);
        self.resolve_as_child(entity);
        self.resolve_inverse_foreign_keys(entity);
    }

    /// Drops references made stale by changed foreign keys, then links again.
    pub(crate) fn relink(&mut self, entity: &Entity, changed: &[String]) {
        let entity_type = entity.entity_type();
        for nav in entity_type.navigation_properties() {
            if nav.is_scalar && nav.foreign_keys.iter().any(|fk| changed.contains(fk)) {
                entity.unlink_if_stale(nav);
            }
        }
        self.resolve_as_child(entity);
        self.resolve_inverse_foreign_keys(entity);
    }

    /// Follows an edit of the foreign key `name` whose previous value was `old`.
    ///
    /// A parent that navigates to the entity through the old value lets go
    /// of it; then the entity links to the parent the new value names, or is
    /// buffered until that parent arrives.
    pub(crate) fn relink_foreign_key(&mut self, entity: &Entity, name: &str, old: &Value) {
        let entity_type = entity.entity_type();
        for ifk in entity_type.inverse_foreign_keys() {
            if !ifk.foreign_keys.iter().any(|fk| fk == name) {
                continue;
            }
            let values = ifk
                .foreign_keys
                .iter()
                .map(|fk| {
                    if fk == name {
                        old.clone()
                    } else {
                        entity.get_value(fk).unwrap_or_default()
                    }
                })
                .collect();
            let old_key = EntityKey::new(ifk.parent_type.as_str(), values);
            if let Some(parent) = find_entity(self.metadata, self.groups, &old_key) {
                parent.release_inverse(&ifk.navigation, entity);
            }
        }
        tracing::trace!(entity = %entity.key(), property = %name, "foreign key changed, relinking");
        self.relink(entity, &[name.to_string()]);
    }

    /// Drains links other entities buffered while waiting for `parent`.
    fn resolve_as_parent(&mut self, parent: &Entity) {
        let entity_type = parent.entity_type();
        let parent_key = parent.key();
        let tuples = self.unattached.take_tuples(&parent_key, &entity_type);
        for mut tuple in tuples {
            // Drop children whose foreign keys moved on after they were buffered.
            let fks = match &tuple.navigation.kind {
                NavigationKind::ScalarBidirectional { .. }
                | NavigationKind::ScalarUnidirectionalChildToParent => {
                    &tuple.navigation.foreign_keys
                }
                _ => &tuple.navigation.inverse_foreign_keys,
            };
            tuple
                .children
                .retain(|c| c.values_of(fks).as_slice() == parent_key.values());
            let nav = &tuple.navigation;
            tracing::trace!(
                parent = %parent_key,
                navigation = %nav.name,
                children = tuple.children.len(),
                "draining buffered links"
            );
            match &nav.kind {
                NavigationKind::ScalarBidirectional { inverse } => {
                    let inverse_is_scalar = entity_type
                        .navigation_property(inverse)
                        .is_some_and(|n| n.is_scalar);
                    let waiting = tuple
                        .children
                        .iter()
                        .filter(|c| c.navigation(&nav.name).is_none());
                    if inverse_is_scalar {
                        if let Some(child) = waiting.take(1).next() {
                            child.set_scalar_raw(&nav.name, Some(parent.clone()));
                            parent.set_scalar_raw(inverse, Some(child.clone()));
                        }
                    } else {
                        for child in waiting {
                            child.set_scalar_raw(&nav.name, Some(parent.clone()));
                            parent.push_collection_raw(inverse, child);
                        }
                    }
                }
                NavigationKind::ScalarUnidirectionalChildToParent => {
                    for child in &tuple.children {
                        if child.navigation(&nav.name).is_none() {
                            child.set_scalar_raw(&nav.name, Some(parent.clone()));
                        }
                    }
                }
                NavigationKind::CollectionUnidirectionalParentToChild => {
                    for child in &tuple.children {
                        parent.push_collection_raw(&nav.name, child);
                    }
                }
                NavigationKind::ForeignKeyOnlyUnidirectional => {
                    if let Some(child) = tuple.children.first() {
                        parent.set_scalar_raw(&nav.name, Some(child.clone()));
                    }
                }
                NavigationKind::CollectionBidirectional { .. } => {
                    tracing::warn!(navigation = %nav.name, "unexpected buffered collection link");
                }
            }
        }
    }

    /// Resolves scalar navigations backed by foreign keys on `child`.
    fn resolve_as_child(&mut self, child: &Entity) {
        let entity_type = child.entity_type();
        for nav in entity_type.navigation_properties() {
            if !nav.is_scalar
                || nav.foreign_keys.is_empty()
                || child.navigation(&nav.name).is_some()
            {
                continue;
            }
            let Some(parent_type) = self.metadata.find_entity_type(&nav.target) else {
                continue;
            };
            let parent_key =
                EntityKey::new(nav.target.as_str(), child.values_of(&nav.foreign_keys));
            if parent_key.is_empty_reference(parent_type) {
                continue;
            }
            match find_entity(self.metadata, self.groups, &parent_key) {
                Some(parent) => self.wire(child, nav, &parent),
                None => self.unattached.add_child(&parent_key, nav, child),
            }
        }
    }

    /// Resolves foreign keys on `child` that only the parent can navigate.
    fn resolve_inverse_foreign_keys(&mut self, child: &Entity) {
        let entity_type = child.entity_type();
        for ifk in entity_type.inverse_foreign_keys() {
            let Some(parent_type) = self.metadata.find_entity_type(&ifk.parent_type) else {
                continue;
            };
            let Some(nav) = parent_type.navigation_property(&ifk.navigation) else {
                continue;
            };
            let parent_key =
                EntityKey::new(ifk.parent_type.as_str(), child.values_of(&ifk.foreign_keys));
            if parent_key.is_empty_reference(parent_type) {
                continue;
            }
            match find_entity(self.metadata, self.groups, &parent_key) {
                Some(parent) if nav.is_scalar => {
                    parent.set_scalar_raw(&nav.name, Some(child.clone()))
                }
                Some(parent) => {
                    parent.push_collection_raw(&nav.name, child);
                }
                None => self.unattached.add_child(&parent_key, nav, child),
            }
        }
    }

    fn wire(&self, child: &Entity, nav: &NavigationProperty, parent: &Entity) {
        child.set_scalar_raw(&nav.name, Some(parent.clone()));
        if let NavigationKind::ScalarBidirectional { inverse } = &nav.kind {
            let inverse_is_scalar = parent
                .entity_type()
                .navigation_property(inverse)
                .is_some_and(|n| n.is_scalar);
            if inverse_is_scalar {
                parent.set_scalar_raw(inverse, Some(child.clone()));
            } else {
                parent.push_collection_raw(inverse, child);
            }
        }
        tracing::trace!(
            child = %child.key(),
            parent = %parent.key(),
            navigation = %nav.name,
            "linked"
        );
    }
}
