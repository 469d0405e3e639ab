//! Shared entity handles.

use super::aspect::EntityAspect;
use super::key::EntityKey;
use super::state::EntityState;
use crate::context::ManagerContext;
use crate::error::{CacheError, CacheResult};
use crate::events::EntityAction;
use crate::metadata::{DataPropertyDef, EntityType, NavigationKind, NavigationProperty};
use crate::validation::{validate_into_aspect, ValidationError, ValidationOrigin};
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// Current value of a navigation property.
#[derive(Debug, Clone)]
pub(crate) enum NavigationValue {
    Scalar(Option<Entity>),
    Collection(Vec<Entity>),
}

pub(crate) struct EntityInner {
    pub(crate) entity_type: Arc<EntityType>,
    pub(crate) values: BTreeMap<String, Value>,
    pub(crate) navigation: BTreeMap<String, NavigationValue>,
    pub(crate) aspect: EntityAspect,
}

/// A tracked entity.
///
/// `Entity` is a shared handle: clones refer to the same object, and
/// equality is identity. A manager guarantees at most one cached instance
/// per key, so comparing handles with `==` is the way to check that two
/// lookups resolved to the same entity.
///
/// Locking rule: no method holds this entity's lock while locking another
/// entity.
#[derive(Clone)]
pub struct Entity(Arc<RwLock<EntityInner>>);

impl Entity {
    /// Creates a detached entity with every property at its initial value.
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        let values = entity_type
            .data_properties()
            .iter()
            .map(|p| (p.name.clone(), p.initial_value()))
            .collect();
        let navigation = entity_type
            .navigation_properties()
            .iter()
            .map(|n| {
                let value = if n.is_scalar {
                    NavigationValue::Scalar(None)
                } else {
                    NavigationValue::Collection(Vec::new())
                };
                (n.name.clone(), value)
            })
            .collect();
        Self(Arc::new(RwLock::new(EntityInner {
            entity_type,
            values,
            navigation,
            aspect: EntityAspect::default(),
        })))
    }

    /// Creates a detached entity and assigns the given values.
    pub fn with_values<I, K, V>(entity_type: Arc<EntityType>, values: I) -> CacheResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let entity = Self::new(entity_type);
        for (name, value) in values {
            entity.set_value(name.as_ref(), value)?;
        }
        Ok(entity)
    }

    /// The entity's type.
    pub fn entity_type(&self) -> Arc<EntityType> {
        Arc::clone(&self.0.read().entity_type)
    }

    /// Name of the entity's type.
    pub fn type_name(&self) -> String {
        self.0.read().entity_type.name().to_string()
    }

    /// Current key.
    pub fn key(&self) -> EntityKey {
        let inner = self.0.read();
        let values = inner
            .entity_type
            .key_properties()
            .iter()
            .map(|k| inner.values.get(k).cloned().unwrap_or_default())
            .collect();
        EntityKey::new(inner.entity_type.name(), values)
    }

    /// Value of a data property, or `None` if the type has no such property.
    pub fn get_value(&self, name: &str) -> Option<Value> {
        self.0.read().values.get(name).cloned()
    }

    /// All data property values.
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.0.read().values.clone()
    }

    /// Values of the given properties, in order.
    pub fn values_of(&self, names: &[String]) -> Vec<Value> {
        let inner = self.0.read();
        names
            .iter()
            .map(|n| inner.values.get(n).cloned().unwrap_or_default())
            .collect()
    }

    /// Writes a data property.
    ///
    /// On an attached entity outside a loading scope the write is tracked:
    /// the original value is recorded the first time the property changes,
    /// `Unchanged` becomes `Modified`, and `PropertyChange` (plus
    /// `EntityStateChange` when the state moved) is published. Changing a
    /// key property of an attached entity is refused; keys only change
    /// through temporary key remapping.
    ///
    /// Writing a foreign key that no longer matches the entity currently
    /// referenced through the corresponding scalar navigation unlinks that
    /// navigation (both sides). A tracked foreign key write then links the
    /// entity to the parent the new value names, or buffers the link until
    /// that parent is attached.
    pub fn set_value(&self, name: &str, value: impl Into<Value>) -> CacheResult<()> {
        self.write_value(name, value.into(), true)
    }

    fn write_value(&self, name: &str, value: Value, relink: bool) -> CacheResult<()> {
        let (old, ctx, tracked, state_changed, stale, relink) = {
            let mut inner = self.0.write();
            let entity_type = Arc::clone(&inner.entity_type);
            let prop = entity_type
                .data_property(name)
                .ok_or_else(|| CacheError::unknown_property(entity_type.name(), name))?;
            check_value(&entity_type, prop, &value)?;

            let old = inner.values.get(name).cloned().unwrap_or_default();
            if old == value {
                return Ok(());
            }
            let ctx = inner.aspect.context.clone();
            let tracked = ctx.as_ref().is_some_and(|c| !c.is_loading());
            if prop.is_part_of_key && tracked {
                return Err(CacheError::invalid_operation(format!(
                    "cannot change key property {}.{name} of an attached entity",
                    entity_type.name()
                )));
            }

            let mut state_changed = false;
            if tracked {
                let state = inner.aspect.state;
                if state.is_unchanged() || state.is_modified() {
                    inner
                        .aspect
                        .original_values
                        .entry(name.to_string())
                        .or_insert_with(|| old.clone());
                }
                if state.is_unchanged() {
                    inner.aspect.state = EntityState::Modified;
                    state_changed = true;
                }
            }
            inner.values.insert(name.to_string(), value.clone());

            let stale: Vec<Arc<NavigationProperty>> = entity_type
                .navigation_properties()
                .iter()
                .filter(|n| n.is_scalar && n.foreign_keys.iter().any(|f| f == name))
                .cloned()
                .collect();
            let is_foreign_key = !stale.is_empty()
                || entity_type
                    .inverse_foreign_keys()
                    .iter()
                    .any(|ifk| ifk.foreign_keys.iter().any(|f| f == name));
            let relink = relink && tracked && is_foreign_key && !inner.aspect.state.is_deleted();
            (old, ctx, tracked, state_changed, stale, relink)
        };

        for nav in &stale {
            self.unlink_if_stale(nav);
        }

        if let Some(ctx) = ctx.filter(|_| tracked) {
            if relink {
                ctx.relink_foreign_key(self, name, &old);
            }
            ctx.feed.publish_property(self, name, old, value);
            if state_changed {
                ctx.feed.publish(EntityAction::EntityStateChange, Some(self));
            }
            ctx.mark_changed();
            if ctx.validate_on_property_change {
                if let Some(validator) = &ctx.validator {
                    validate_into_aspect(validator.as_ref(), self);
                }
            }
        }
        Ok(())
    }

    /// Entity referenced by a scalar navigation property.
    pub fn navigation(&self, name: &str) -> Option<Entity> {
        match self.0.read().navigation.get(name) {
            Some(NavigationValue::Scalar(target)) => target.clone(),
            _ => None,
        }
    }

    /// Entities in a collection navigation property.
    pub fn collection(&self, name: &str) -> Vec<Entity> {
        match self.0.read().navigation.get(name) {
            Some(NavigationValue::Collection(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// Points a scalar navigation property at `target`.
    ///
    /// Foreign keys on this entity follow the target's key, and the inverse
    /// side (collection or scalar) of a bidirectional relationship is kept in
    /// sync. Both entities must belong to the same manager, or both be
    /// detached.
    pub fn set_navigation(&self, name: &str, target: Option<&Entity>) -> CacheResult<()> {
        let entity_type = self.entity_type();
        let nav = Arc::clone(
            entity_type
                .navigation_property(name)
                .ok_or_else(|| CacheError::unknown_property(entity_type.name(), name))?,
        );
        if !nav.is_scalar {
            return Err(CacheError::invalid_operation(format!(
                "{}.{name} is a collection",
                entity_type.name()
            )));
        }
        if let Some(t) = target {
            self.check_related(&nav, t)?;
        }

        let old = self.navigation(name);
        if old.as_ref() == target {
            return Ok(());
        }

        if !nav.foreign_keys.is_empty() {
            let values = match target {
                Some(t) => t.key().values().to_vec(),
                None => vec![Value::Null; nav.foreign_keys.len()],
            };
            for (fk, value) in nav.foreign_keys.iter().zip(values) {
                self.set_foreign_key(fk, value)?;
            }
        }
        self.set_scalar_raw(name, target.cloned());

        match &nav.kind {
            NavigationKind::ScalarBidirectional { inverse } => {
                if let Some(old) = &old {
                    old.release_inverse(inverse, self);
                }
                if let Some(new) = target {
                    if new.is_scalar_navigation(inverse) {
                        if let Some(previous) = new.navigation(inverse).filter(|p| p != self) {
                            previous.set_scalar_raw(name, None);
                        }
                        new.set_scalar_raw(inverse, Some(self.clone()));
                    } else {
                        new.push_collection_raw(inverse, self);
                    }
                }
            }
            NavigationKind::ForeignKeyOnlyUnidirectional => {
                if let Some(old) = &old {
                    for fk in &nav.inverse_foreign_keys {
                        old.set_foreign_key(fk, Value::Null)?;
                    }
                }
                if let Some(new) = target {
                    let key = self.key();
                    for (fk, value) in nav.inverse_foreign_keys.iter().zip(key.values()) {
                        new.set_foreign_key(fk, value.clone())?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Adds `child` to a collection navigation property.
    ///
    /// For a bidirectional relationship this sets the child's scalar
    /// navigation (and foreign keys); for a unidirectional one it writes the
    /// child's foreign keys.
    pub fn add_to_collection(&self, name: &str, child: &Entity) -> CacheResult<()> {
        let nav = self.collection_navigation(name)?;
        self.check_related(&nav, child)?;
        if self.collection(name).contains(child) {
            return Ok(());
        }
        match &nav.kind {
            NavigationKind::CollectionBidirectional { inverse } => {
                child.set_navigation(inverse, Some(self))
            }
            _ => {
                let key = self.key();
                for (fk, value) in nav.inverse_foreign_keys.iter().zip(key.values()) {
                    child.set_foreign_key(fk, value.clone())?;
                }
                self.push_collection_raw(name, child);
                Ok(())
            }
        }
    }

    /// Removes `child` from a collection navigation property.
    ///
    /// Returns false if it was not in the collection.
    pub fn remove_from_collection(&self, name: &str, child: &Entity) -> CacheResult<bool> {
        let nav = self.collection_navigation(name)?;
        if !self.collection(name).contains(child) {
            return Ok(false);
        }
        match &nav.kind {
            NavigationKind::CollectionBidirectional { inverse } => {
                child.set_navigation(inverse, None)?;
                // The child may have pointed elsewhere already.
                self.remove_collection_raw(name, child);
            }
            _ => {
                self.remove_collection_raw(name, child);
                for fk in &nav.inverse_foreign_keys {
                    child.set_foreign_key(fk, Value::Null)?;
                }
            }
        }
        Ok(true)
    }

    /// Lifecycle state.
    pub fn entity_state(&self) -> EntityState {
        self.0.read().aspect.state
    }

    /// Returns true unless the entity is detached.
    pub fn is_attached(&self) -> bool {
        !self.entity_state().is_detached()
    }

    /// Id of the owning manager.
    pub fn manager_id(&self) -> Option<Uuid> {
        self.0.read().aspect.context.as_ref().map(|c| c.id())
    }

    /// Values recorded before the first tracked change of each property.
    pub fn original_values(&self) -> BTreeMap<String, Value> {
        self.0.read().aspect.original_values.clone()
    }

    /// Returns true while a save including this entity is outstanding.
    pub fn is_being_saved(&self) -> bool {
        self.0.read().aspect.is_being_saved
    }

    /// Returns true while the key is a provisional client value.
    pub fn has_temp_key(&self) -> bool {
        self.0.read().aspect.has_temp_key
    }

    /// Attached validation errors.
    pub fn validation_errors(&self) -> Vec<ValidationError> {
        self.0.read().aspect.validation_errors.clone()
    }

    /// Opaque metadata carried through export and import.
    pub fn extra_metadata(&self) -> Option<serde_json::Value> {
        self.0.read().aspect.extra_metadata.clone()
    }

    /// Sets the opaque metadata.
    pub fn set_extra_metadata(&self, metadata: Option<serde_json::Value>) {
        self.0.write().aspect.extra_metadata = metadata;
    }

    // Crate internal, untracked operations.

    pub(crate) fn ptr_eq(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn read_aspect<R>(&self, f: impl FnOnce(&EntityAspect) -> R) -> R {
        f(&self.0.read().aspect)
    }

    pub(crate) fn write_aspect<R>(&self, f: impl FnOnce(&mut EntityAspect) -> R) -> R {
        f(&mut self.0.write().aspect)
    }

    pub(crate) fn context(&self) -> Option<Arc<ManagerContext>> {
        self.0.read().aspect.context.clone()
    }

    pub(crate) fn set_state(&self, state: EntityState) {
        self.0.write().aspect.state = state;
    }

    pub(crate) fn set_value_raw(&self, name: &str, value: Value) {
        self.0.write().values.insert(name.to_string(), value);
    }

    /// Replaces all data values, returning the names whose value changed.
    pub(crate) fn replace_values_raw(&self, values: &BTreeMap<String, Value>) -> Vec<String> {
        let mut inner = self.0.write();
        let mut changed = Vec::new();
        for (name, value) in values {
            if !inner.values.contains_key(name) {
                continue;
            }
            if inner.values.get(name) != Some(value) {
                changed.push(name.clone());
                inner.values.insert(name.clone(), value.clone());
            }
        }
        changed
    }

    pub(crate) fn set_scalar_raw(&self, name: &str, target: Option<Entity>) {
        self.0
            .write()
            .navigation
            .insert(name.to_string(), NavigationValue::Scalar(target));
    }

    /// Appends to a collection unless already present; returns true if added.
    pub(crate) fn push_collection_raw(&self, name: &str, child: &Entity) -> bool {
        let mut inner = self.0.write();
        match inner.navigation.get_mut(name) {
            Some(NavigationValue::Collection(items)) => {
                if items.iter().any(|e| e.ptr_eq(child)) {
                    false
                } else {
                    items.push(child.clone());
                    true
                }
            }
            _ => false,
        }
    }

    pub(crate) fn remove_collection_raw(&self, name: &str, child: &Entity) -> bool {
        let mut inner = self.0.write();
        match inner.navigation.get_mut(name) {
            Some(NavigationValue::Collection(items)) => {
                let before = items.len();
                items.retain(|e| !e.ptr_eq(child));
                items.len() != before
            }
            _ => false,
        }
    }

    /// Drops every navigation reference held by this entity.
    pub(crate) fn clear_navigation_raw(&self) {
        let mut inner = self.0.write();
        for value in inner.navigation.values_mut() {
            match value {
                NavigationValue::Scalar(target) => *target = None,
                NavigationValue::Collection(items) => items.clear(),
            }
        }
    }

    pub(crate) fn replace_validation_errors(
        &self,
        origin: ValidationOrigin,
        errors: Vec<ValidationError>,
    ) {
        let mut inner = self.0.write();
        let aspect = &mut inner.aspect;
        aspect.validation_errors.retain(|e| e.origin != origin);
        aspect.validation_errors.extend(errors);
    }

    /// Clears a scalar navigation whose foreign keys no longer match the target's key.
    pub(crate) fn unlink_if_stale(&self, nav: &NavigationProperty) {
        let Some(target) = self.navigation(&nav.name) else {
            return;
        };
        let fk_values = self.values_of(&nav.foreign_keys);
        if target.key().values() == fk_values.as_slice() {
            return;
        }
        self.set_scalar_raw(&nav.name, None);
        if let Some(inverse) = nav.inverse() {
            target.release_inverse(inverse, self);
        }
    }

    /// Removes `child` from this entity's side of a relationship.
    pub(crate) fn release_inverse(&self, inverse: &str, child: &Entity) {
        if self.is_scalar_navigation(inverse) {
            if self.navigation(inverse).is_some_and(|e| e.ptr_eq(child)) {
                self.set_scalar_raw(inverse, None);
            }
        } else {
            self.remove_collection_raw(inverse, child);
        }
    }

    fn is_scalar_navigation(&self, name: &str) -> bool {
        matches!(
            self.0.read().navigation.get(name),
            Some(NavigationValue::Scalar(_))
        )
    }

    fn collection_navigation(&self, name: &str) -> CacheResult<Arc<NavigationProperty>> {
        let entity_type = self.entity_type();
        let nav = entity_type
            .navigation_property(name)
            .ok_or_else(|| CacheError::unknown_property(entity_type.name(), name))?;
        if nav.is_scalar {
            return Err(CacheError::invalid_operation(format!(
                "{}.{name} is not a collection",
                entity_type.name()
            )));
        }
        Ok(Arc::clone(nav))
    }

    fn check_related(&self, nav: &NavigationProperty, other: &Entity) -> CacheResult<()> {
        if !other.entity_type().is_self_or_subtype_of(&nav.target) {
            return Err(CacheError::invalid_value(
                nav.declaring_type.as_str(),
                nav.name.as_str(),
                format!("expected {}, got {}", nav.target, other.type_name()),
            ));
        }
        if self.manager_id() != other.manager_id() {
            return Err(CacheError::invalid_operation(
                "related entities must belong to the same manager",
            ));
        }
        Ok(())
    }

    /// Writes a foreign key, mapping null to the type default for non-nullable keys.
    fn set_foreign_key(&self, name: &str, value: Value) -> CacheResult<()> {
        let value = if value.is_null() {
            self.entity_type()
                .data_property(name)
                .filter(|p| !p.is_nullable)
                .map_or(Value::Null, |p| p.data_type.default_value())
        } else {
            value
        };
        // Navigation setters wire both sides themselves.
        self.write_value(name, value, false)
    }
}

fn check_value(entity_type: &EntityType, prop: &DataPropertyDef, value: &Value) -> CacheResult<()> {
    if value.is_null() && !prop.is_nullable {
        return Err(CacheError::invalid_value(
            entity_type.name(),
            prop.name.as_str(),
            "null is not allowed",
        ));
    }
    prop.data_type.check(value).map_err(|message| {
        CacheError::invalid_value(entity_type.name(), prop.name.as_str(), message)
    })
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(inner) => {
                let key: Vec<String> = inner
                    .entity_type
                    .key_properties()
                    .iter()
                    .map(|k| inner.values.get(k).cloned().unwrap_or_default().to_string())
                    .collect();
                write!(
                    f,
                    "Entity({}:{} {})",
                    inner.entity_type.name(),
                    key.join(","),
                    inner.aspect.state
                )
            }
            None => f.write_str("Entity(<locked>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DataType, EntityTypeDef, MetadataStore, NavigationDef};

    fn store() -> MetadataStore {
        MetadataStore::builder("t")
            .entity_type(
                EntityTypeDef::new("Customer")
                    .key("id", DataType::Int32)
                    .property("name", DataType::String)
                    .navigation(NavigationDef::collection("orders", "Order").inverse("customer")),
            )
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

    fn entity(store: &MetadataStore, type_name: &str, id: i64) -> Entity {
        Entity::with_values(store.entity_type(type_name).unwrap(), [("id", id)]).unwrap()
    }

    #[test]
    fn detached_writes_are_untracked() {
        let store = store();
        let c = entity(&store, "Customer", 1);
        c.set_value("name", "Alfreds").unwrap();
        assert_eq!(c.get_value("name"), Some(Value::from("Alfreds")));
        assert_eq!(c.entity_state(), EntityState::Detached);
        assert!(c.original_values().is_empty());
        assert_eq!(c.key(), EntityKey::single("Customer", 1));
    }

    #[test]
    fn rejects_unknown_and_mistyped_values() {
        let store = store();
        let c = entity(&store, "Customer", 1);
        assert!(matches!(
            c.set_value("nope", 1),
            Err(CacheError::UnknownProperty { .. })
        ));
        assert!(matches!(
            c.set_value("name", 5),
            Err(CacheError::InvalidValue { .. })
        ));
        assert!(c.set_value("id", Value::Null).is_err());
    }

    #[test]
    fn identity_equality() {
        let store = store();
        let a = entity(&store, "Customer", 1);
        let b = entity(&store, "Customer", 1);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn set_navigation_syncs_foreign_key_and_inverse() {
        let store = store();
        let c1 = entity(&store, "Customer", 1);
        let c2 = entity(&store, "Customer", 2);
        let o = entity(&store, "Order", 10);

        o.set_navigation("customer", Some(&c1)).unwrap();
        assert_eq!(o.get_value("customerId"), Some(Value::Integer(1)));
        assert_eq!(c1.collection("orders"), vec![o.clone()]);

        o.set_navigation("customer", Some(&c2)).unwrap();
        assert!(c1.collection("orders").is_empty());
        assert_eq!(c2.collection("orders"), vec![o.clone()]);

        o.set_navigation("customer", None).unwrap();
        assert!(c2.collection("orders").is_empty());
        assert_eq!(o.get_value("customerId"), Some(Value::Null));
    }

    #[test]
    fn collection_edits_go_through_the_child() {
        let store = store();
        let c = entity(&store, "Customer", 1);
        let o = entity(&store, "Order", 10);

        c.add_to_collection("orders", &o).unwrap();
        assert_eq!(o.navigation("customer"), Some(c.clone()));
        assert_eq!(o.get_value("customerId"), Some(Value::Integer(1)));

        assert!(c.remove_from_collection("orders", &o).unwrap());
        assert!(!c.remove_from_collection("orders", &o).unwrap());
        assert_eq!(o.navigation("customer"), None);
        assert!(c.collection("orders").is_empty());
    }

    #[test]
    fn changing_foreign_key_unlinks_stale_reference() {
        let store = store();
        let c = entity(&store, "Customer", 1);
        let o = entity(&store, "Order", 10);
        o.set_navigation("customer", Some(&c)).unwrap();

        o.set_value("customerId", 2).unwrap();
        assert_eq!(o.navigation("customer"), None);
        assert!(c.collection("orders").is_empty());
    }

    #[test]
    fn debug_does_not_recurse() {
        let store = store();
        let c = entity(&store, "Customer", 1);
        let o = entity(&store, "Order", 10);
        o.set_navigation("customer", Some(&c)).unwrap();
        assert_eq!(format!("{o:?}"), "Entity(Order:10 Detached)");
    }
}
