//! The entity manager.
//!
//! An [`EntityManager`] owns one identity map per entity type, the buffer
//! of links waiting for absent parents, and a temporary key generator.
//! Every cached entity belongs to exactly one manager.
//!
//! Locking rule: the manager's cache state is locked before any entity,
//! and no entity lock is held while the cache state is locked.

mod import;
mod merge;
mod query;
mod remap;
mod save;

use crate::cache::{
    find_entity, AttachOutcome, EntityGroup, RelationshipLinker, UnattachedChildrenMap,
};
use crate::config::ManagerConfig;
use crate::context::ManagerContext;
use crate::entity::{Entity, EntityAspect, EntityKey, EntityState, KeyFill, MergeStrategy};
use crate::error::{CacheError, CacheResult};
use crate::events::{EntityAction, EntityChanged};
use crate::keygen::{DefaultKeyGenerator, KeyGenerator};
use crate::metadata::{AutoGeneratedKeyType, EntityType, MetadataStore};
use crate::validation::{validate_into_aspect, ValidationError, Validator};
use crate::value::Value;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Everything guarded by the manager's lock.
pub(crate) struct CacheState {
    pub(crate) groups: HashMap<String, EntityGroup>,
    pub(crate) unattached: UnattachedChildrenMap,
    pub(crate) key_generator: Box<dyn KeyGenerator>,
    /// Last instant handed out for a `DateTime` concurrency property.
    pub(crate) last_stamp: Option<DateTime<Utc>>,
}

/// Builder for an [`EntityManager`].
pub struct EntityManagerBuilder {
    metadata: Arc<MetadataStore>,
    config: ManagerConfig,
    validator: Option<Arc<dyn Validator>>,
    key_generator: Option<Box<dyn KeyGenerator>>,
}

impl EntityManagerBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the validator used by the configured validation triggers.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Replaces the default temporary key generator.
    #[must_use]
    pub fn key_generator(mut self, generator: Box<dyn KeyGenerator>) -> Self {
        self.key_generator = Some(generator);
        self
    }

    /// Creates the manager.
    pub fn build(self) -> EntityManager {
        let state = Arc::new(Mutex::new(CacheState {
            groups: HashMap::new(),
            unattached: UnattachedChildrenMap::new(),
            key_generator: self
                .key_generator
                .unwrap_or_else(|| Box::new(DefaultKeyGenerator::new())),
            last_stamp: None,
        }));
        let ctx = Arc::new(ManagerContext::new(
            Arc::clone(&self.metadata),
            Arc::downgrade(&state),
            self.validator,
            self.config.validation_options.validate_on_property_change,
        ));
        debug!(manager = %ctx.id(), store = %self.metadata.name(), "entity manager created");
        EntityManager {
            metadata: self.metadata,
            config: self.config,
            ctx,
            state,
        }
    }
}

/// An identity-mapped cache of tracked entities.
///
/// # Example
///
/// ```rust,ignore
/// use entcache_core::{EntityManager, EntityState, MergeStrategy};
///
/// let manager = EntityManager::new(metadata);
/// let customer = manager.create_entity("Customer", [("name", "Alfreds")])?;
/// manager.attach_entity(&customer, EntityState::Added, MergeStrategy::Disallowed)?;
/// assert!(customer.has_temp_key());
/// assert!(manager.has_changes());
/// ```
pub struct EntityManager {
    metadata: Arc<MetadataStore>,
    config: ManagerConfig,
    ctx: Arc<ManagerContext>,
    state: Arc<Mutex<CacheState>>,
}

impl EntityManager {
    /// Creates a manager with the default configuration.
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        Self::builder(metadata).build()
    }

    /// Creates a manager with the given configuration.
    pub fn with_config(metadata: Arc<MetadataStore>, config: ManagerConfig) -> Self {
        Self::builder(metadata).config(config).build()
    }

    /// Starts building a manager.
    pub fn builder(metadata: Arc<MetadataStore>) -> EntityManagerBuilder {
        EntityManagerBuilder {
            metadata,
            config: ManagerConfig::default(),
            validator: None,
            key_generator: None,
        }
    }

    /// Unique id of this manager.
    pub fn id(&self) -> Uuid {
        self.ctx.id()
    }

    /// The type system.
    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    /// The configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Returns true while a merge, import or link is in progress.
    pub fn is_loading(&self) -> bool {
        self.ctx.is_loading()
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> Receiver<EntityChanged> {
        self.ctx.feed.subscribe()
    }

    /// Creates a detached entity of `type_name` with the given values.
    pub fn create_entity<I, K, V>(&self, type_name: &str, values: I) -> CacheResult<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        Entity::with_values(self.metadata.entity_type(type_name)?, values)
    }

    /// Creates an entity and attaches it in `state`.
    pub fn create_attached_entity<I, K, V>(
        &self,
        type_name: &str,
        values: I,
        state: EntityState,
    ) -> CacheResult<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let entity = self.create_entity(type_name, values)?;
        self.attach_entity(&entity, state, MergeStrategy::Disallowed)
    }

    /// Attaches `entity` in `state`, resolving key collisions with `strategy`.
    ///
    /// Returns the cached instance, which is not `entity` when the key was
    /// already cached. Attaching an entity this manager already owns
    /// returns it unchanged.
    ///
    /// # Errors
    ///
    /// - `AttachFailed` if `state` is `Detached`, the entity's type is not
    ///   from this manager's metadata store, the entity belongs to another
    ///   manager, or an `Added` entity's key is only partially set
    /// - `MergeDisallowed` on a collision under `MergeStrategy::Disallowed`
    pub fn attach_entity(
        &self,
        entity: &Entity,
        state: EntityState,
        strategy: MergeStrategy,
    ) -> CacheResult<Entity> {
        let outcome = {
            let mut cache = self.state.lock();
            self.attach_in(&mut cache, entity, state, strategy)?
        };
        match &outcome {
            AttachOutcome::Attached(e) => {
                debug!(key = %e.key(), %state, "attached");
                self.ctx.feed.publish(EntityAction::Attach, Some(e));
                if !state.is_unchanged() {
                    self.ctx.feed.publish(EntityAction::EntityStateChange, Some(e));
                }
                if self.config.validation_options.validate_on_attach {
                    self.validate_entity(e);
                }
            }
            AttachOutcome::Merged(e) => {
                debug!(key = %e.key(), ?strategy, "merged on attach");
                self.ctx.feed.publish(EntityAction::EntityStateChange, Some(e));
            }
            AttachOutcome::Skipped(_) => {}
        }
        Ok(outcome.into_entity())
    }

    /// Indexes and links an entity. Callers publish the notifications.
    pub(crate) fn attach_in(
        &self,
        cache: &mut CacheState,
        entity: &Entity,
        state: EntityState,
        strategy: MergeStrategy,
    ) -> CacheResult<AttachOutcome> {
        if state.is_detached() {
            return Err(CacheError::attach_failed("cannot attach an entity as Detached"));
        }
        let entity_type = entity.entity_type();
        if !self.metadata.owns(&entity_type) {
            return Err(CacheError::attach_failed(format!(
                "entity type {} does not belong to metadata store {}",
                entity_type.name(),
                self.metadata.name()
            )));
        }
        let (attaching, owner) =
            entity.read_aspect(|a| (a.attaching, a.context.as_ref().map(|c| c.id())));
        if attaching {
            return Ok(AttachOutcome::Skipped(entity.clone()));
        }
        match owner {
            Some(id) if id != self.id() => {
                return Err(CacheError::attach_failed(format!(
                    "{} belongs to another entity manager",
                    entity.key()
                )))
            }
            Some(_) => return Ok(AttachOutcome::Skipped(entity.clone())),
            None => {}
        }
        if state.is_added() {
            prepare_added_key(cache, entity, &entity_type)?;
        }

        entity.write_aspect(|a| a.attaching = true);
        let _attaching = AttachingGuard(entity);
        let _loading = self.ctx.loading.enter();

        let outcome = cache
            .groups
            .entry(entity_type.name().to_string())
            .or_insert_with(|| EntityGroup::new(Arc::clone(&entity_type)))
            .attach_entity(entity, state, strategy)?;
        match &outcome {
            AttachOutcome::Attached(e) => {
                e.write_aspect(|a| {
                    a.state = state;
                    a.context = Some(Arc::clone(&self.ctx));
                });
                RelationshipLinker::new(&self.metadata, &cache.groups, &mut cache.unattached)
                    .link(e);
            }
            AttachOutcome::Merged(e) => {
                let names: Vec<String> = entity_type
                    .data_properties()
                    .iter()
                    .map(|p| p.name.clone())
                    .collect();
                RelationshipLinker::new(&self.metadata, &cache.groups, &mut cache.unattached)
                    .relink(e, &names);
            }
            AttachOutcome::Skipped(_) => {}
        }
        self.ctx.mark_changed();
        Ok(outcome)
    }

    /// Removes `entity` from the cache.
    ///
    /// Returns false if it was already detached. Navigation references held
    /// by other entities and buffered links are left as they are.
    ///
    /// # Errors
    ///
    /// `AttachFailed` if the entity belongs to another manager.
    pub fn detach_entity(&self, entity: &Entity) -> CacheResult<bool> {
        if !entity.is_attached() {
            return Ok(false);
        }
        self.check_owned(entity)?;
        let mut cache = self.state.lock();
        self.detach_in(&mut cache, entity);
        Ok(true)
    }

    pub(crate) fn detach_in(&self, cache: &mut CacheState, entity: &Entity) {
        if let Some(group) = cache.groups.get_mut(entity.entity_type().name()) {
            group.detach_entity(entity);
        }
        entity.write_aspect(EntityAspect::reset_detached);
        debug!(key = %entity.key(), "detached");
        self.ctx.feed.publish(EntityAction::Detach, Some(entity));
        self.ctx.mark_changed();
    }

    /// Looks up a cached entity by type name and key values.
    ///
    /// Instances of subtypes of `type_name` are found too.
    pub fn get_entity_by_key(
        &self,
        type_name: &str,
        values: Vec<Value>,
    ) -> CacheResult<Option<Entity>> {
        self.metadata.entity_type(type_name)?;
        Ok(self.find_entity_by_key(&EntityKey::new(type_name, values)))
    }

    /// Looks up a cached entity by key, searching subtypes of the key's type.
    pub fn find_entity_by_key(&self, key: &EntityKey) -> Option<Entity> {
        let cache = self.state.lock();
        find_entity(&self.metadata, &cache.groups, key)
    }

    /// Cached entities of the given types (and their subtypes), optionally
    /// filtered by state. All types when `types` is `None`.
    pub fn get_entities(
        &self,
        types: Option<&[&str]>,
        states: Option<&[EntityState]>,
    ) -> CacheResult<Vec<Entity>> {
        let names = self.expand_types(types)?;
        let cache = self.state.lock();
        Ok(names
            .iter()
            .filter_map(|name| cache.groups.get(name))
            .flat_map(|group| group.get_entities(states))
            .collect())
    }

    /// Entities with pending changes.
    pub fn get_changes(&self, types: Option<&[&str]>) -> CacheResult<Vec<Entity>> {
        self.get_entities(
            types,
            Some(&[EntityState::Added, EntityState::Modified, EntityState::Deleted]),
        )
    }

    /// Returns true if any cached entity is `Added`, `Modified` or `Deleted`.
    ///
    /// The answer is cached until the next mutation.
    pub fn has_changes(&self) -> bool {
        if let Some(value) = self.ctx.cached_has_changes() {
            return value;
        }
        let value = self.state.lock().groups.values().any(EntityGroup::has_changes);
        self.ctx.store_has_changes(value);
        value
    }

    /// Number of cached entities.
    pub fn entity_count(&self) -> usize {
        self.state.lock().groups.values().map(EntityGroup::len).sum()
    }

    /// Marks an entity for deletion.
    ///
    /// An `Added` entity is simply detached. Otherwise the entity is
    /// unlinked from the parents it references and becomes `Deleted`.
    pub fn set_deleted(&self, entity: &Entity) -> CacheResult<()> {
        self.check_owned(entity)?;
        match entity.entity_state() {
            EntityState::Added => {
                self.detach_entity(entity)?;
            }
            EntityState::Deleted | EntityState::Detached => {}
            EntityState::Unchanged | EntityState::Modified => {
                let _loading = self.ctx.loading.enter();
                for nav in entity.entity_type().navigation_properties() {
                    if !nav.is_scalar {
                        continue;
                    }
                    if let Some(parent) = entity.navigation(&nav.name) {
                        entity.set_scalar_raw(&nav.name, None);
                        if let Some(inverse) = nav.inverse() {
                            parent.release_inverse(inverse, entity);
                        }
                    }
                }
                entity.set_state(EntityState::Deleted);
                debug!(key = %entity.key(), "marked deleted");
                self.ctx.feed.publish(EntityAction::EntityStateChange, Some(entity));
                self.ctx.mark_changed();
            }
        }
        Ok(())
    }

    /// Makes the current values of an entity its unchanged baseline.
    ///
    /// A `Deleted` entity is detached.
    pub fn accept_changes(&self, entity: &Entity) -> CacheResult<()> {
        self.check_owned(entity)?;
        match entity.entity_state() {
            EntityState::Deleted => {
                self.detach_entity(entity)?;
            }
            EntityState::Added | EntityState::Modified => {
                entity.write_aspect(|a| {
                    a.state = EntityState::Unchanged;
                    a.original_values.clear();
                });
                self.ctx.feed.publish(EntityAction::AcceptChanges, Some(entity));
                self.ctx.feed.publish(EntityAction::EntityStateChange, Some(entity));
                self.ctx.mark_changed();
            }
            EntityState::Unchanged | EntityState::Detached => {}
        }
        Ok(())
    }

    /// Restores an entity's original values.
    ///
    /// An `Added` entity is detached; `Modified` and `Deleted` entities get
    /// their original values back and become `Unchanged`.
    pub fn reject_changes(&self, entity: &Entity) -> CacheResult<()> {
        self.check_owned(entity)?;
        match entity.entity_state() {
            EntityState::Added => {
                self.detach_entity(entity)?;
            }
            EntityState::Modified | EntityState::Deleted => {
                {
                    let mut cache = self.state.lock();
                    let _loading = self.ctx.loading.enter();
                    let originals = entity.write_aspect(|a| {
                        a.state = EntityState::Unchanged;
                        std::mem::take(&mut a.original_values)
                    });
                    let changed = entity.replace_values_raw(&originals);
                    let cache = &mut *cache;
                    RelationshipLinker::new(&self.metadata, &cache.groups, &mut cache.unattached)
                        .relink(entity, &changed);
                }
                debug!(key = %entity.key(), "changes rejected");
                self.ctx.feed.publish(EntityAction::RejectChanges, Some(entity));
                self.ctx.feed.publish(EntityAction::EntityStateChange, Some(entity));
                self.ctx.mark_changed();
            }
            EntityState::Unchanged | EntityState::Detached => {}
        }
        Ok(())
    }

    /// Accepts the changes of every changed entity.
    pub fn accept_all_changes(&self) -> CacheResult<()> {
        for entity in self.get_changes(None)? {
            self.accept_changes(&entity)?;
        }
        Ok(())
    }

    /// Rejects the changes of every changed entity.
    pub fn reject_all_changes(&self) -> CacheResult<()> {
        for entity in self.get_changes(None)? {
            self.reject_changes(&entity)?;
        }
        Ok(())
    }

    /// Detaches everything and forgets all buffered links and temporary keys.
    pub fn clear(&self) {
        let mut cache = self.state.lock();
        let mut count = 0;
        for group in cache.groups.values_mut() {
            for entity in group.clear() {
                entity.clear_navigation_raw();
                entity.write_aspect(EntityAspect::reset_detached);
                count += 1;
            }
        }
        cache.groups.clear();
        cache.unattached.clear();
        for key in cache.key_generator.temp_keys() {
            cache.key_generator.remove(&key);
        }
        drop(cache);
        debug!(manager = %self.id(), entities = count, "cache cleared");
        self.ctx.feed.publish(EntityAction::Clear, None);
        self.ctx.mark_changed();
    }

    /// Assigns a fresh temporary key to a detached entity and returns it.
    pub fn generate_temp_key_value(&self, entity: &Entity) -> CacheResult<Value> {
        if entity.is_attached() {
            return Err(CacheError::invalid_operation(
                "temporary keys can only be generated for detached entities",
            ));
        }
        let entity_type = entity.entity_type();
        let value = self.state.lock().key_generator.generate_temp_key_value(&entity_type)?;
        if let Some(key_name) = entity_type.key_properties().first() {
            entity.set_value(key_name, value.clone())?;
        }
        entity.write_aspect(|a| a.has_temp_key = true);
        Ok(value)
    }

    /// Runs the configured validator against `entity`, replacing its
    /// client-side errors. Returns the errors found.
    pub fn validate_entity(&self, entity: &Entity) -> Vec<ValidationError> {
        match &self.ctx.validator {
            Some(validator) => validate_into_aspect(validator.as_ref(), entity),
            None => Vec::new(),
        }
    }

    fn check_owned(&self, entity: &Entity) -> CacheResult<()> {
        match entity.manager_id() {
            Some(id) if id == self.id() => Ok(()),
            Some(_) => Err(CacheError::attach_failed(format!(
                "{} belongs to another entity manager",
                entity.key()
            ))),
            None => Err(CacheError::invalid_operation(format!(
                "{} is not attached",
                entity.key()
            ))),
        }
    }

    /// Resolves type names to concrete type names, subtypes included, in
    /// metadata order.
    fn expand_types(&self, types: Option<&[&str]>) -> CacheResult<Vec<String>> {
        let Some(types) = types else {
            return Ok(self.metadata.entity_types().map(|t| t.name().to_string()).collect());
        };
        let mut names: Vec<String> = Vec::new();
        for type_name in types {
            for name in self.metadata.entity_type(type_name)?.self_and_subtypes() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }
}

/// Gives an `Added` entity with an unset key a temporary one when its type
/// generates keys.
fn prepare_added_key(
    cache: &mut CacheState,
    entity: &Entity,
    entity_type: &EntityType,
) -> CacheResult<()> {
    let key = entity.key();
    match key.fill(entity_type) {
        KeyFill::Empty if entity_type.auto_generated_key() != AutoGeneratedKeyType::None => {
            let value = cache.key_generator.generate_temp_key_value(entity_type)?;
            if let Some(key_name) = entity_type.key_properties().first() {
                entity.set_value_raw(key_name, value);
            }
            entity.write_aspect(|a| a.has_temp_key = true);
        }
        KeyFill::Partial => {
            return Err(CacheError::attach_failed(format!("key {key} is only partially set")));
        }
        KeyFill::Full => {
            if cache
                .key_generator
                .is_temp_key(&key.with_type(entity_type.root_type_name()))
            {
                entity.write_aspect(|a| a.has_temp_key = true);
            }
        }
        KeyFill::Empty => {}
    }
    Ok(())
}

/// Clears the attaching flag on every exit path.
struct AttachingGuard<'a>(&'a Entity);

impl Drop for AttachingGuard<'_> {
    fn drop(&mut self) {
        self.0.write_aspect(|a| a.attaching = false);
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("id", &self.id())
            .field("store", &self.metadata.name())
            .field("entity_count", &self.entity_count())
            .finish_non_exhaustive()
    }
}

impl Drop for EntityManager {
    fn drop(&mut self) {
        // Entities point at each other; break the cycles.
        let mut cache = self.state.lock();
        for group in cache.groups.values_mut() {
            for entity in group.clear() {
                entity.clear_navigation_raw();
                entity.write_aspect(EntityAspect::reset_detached);
            }
        }
        cache.unattached.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DataType, EntityTypeDef, NavigationDef};

    fn manager() -> EntityManager {
        let store = MetadataStore::builder("t")
            .entity_type(
                EntityTypeDef::new("Customer")
                    .auto_generated_key(AutoGeneratedKeyType::Identity)
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
            .entity_type(
                EntityTypeDef::new("Line")
                    .key("orderId", DataType::Int32)
                    .key("lineNo", DataType::Int32),
            )
            .build()
            .unwrap();
        EntityManager::new(Arc::new(store))
    }

    #[test]
    fn added_entity_gets_temp_key() {
        let m = manager();
        let c = m
            .create_attached_entity("Customer", [("name", "a")], EntityState::Added)
            .unwrap();
        assert!(c.has_temp_key());
        assert_eq!(c.get_value("id"), Some(Value::Integer(-1)));
        assert_eq!(c.manager_id(), Some(m.id()));
        assert!(m.has_changes());
    }

    #[test]
    fn partial_key_is_refused() {
        let m = manager();
        let line = m.create_entity("Line", [("orderId", 3)]).unwrap();
        let err = m
            .attach_entity(&line, EntityState::Added, MergeStrategy::Disallowed)
            .unwrap_err();
        assert!(matches!(err, CacheError::AttachFailed { .. }));
        assert!(!line.is_attached());
    }

    #[test]
    fn attaching_as_detached_fails() {
        let m = manager();
        let c = m.create_entity("Customer", [("id", 1)]).unwrap();
        assert!(m
            .attach_entity(&c, EntityState::Detached, MergeStrategy::Disallowed)
            .is_err());
    }

    #[test]
    fn foreign_manager_is_refused() {
        let a = manager();
        let b = manager();
        let c = a
            .create_attached_entity("Customer", [("id", 1)], EntityState::Unchanged)
            .unwrap();
        assert!(matches!(
            b.attach_entity(&c, EntityState::Unchanged, MergeStrategy::Disallowed),
            Err(CacheError::AttachFailed { .. })
        ));
        assert!(matches!(b.detach_entity(&c), Err(CacheError::AttachFailed { .. })));
    }

    #[test]
    fn foreign_metadata_is_refused() {
        let a = manager();
        let b = manager();
        let c = b.create_entity("Customer", [("id", 1)]).unwrap();
        assert!(matches!(
            a.attach_entity(&c, EntityState::Unchanged, MergeStrategy::Disallowed),
            Err(CacheError::AttachFailed { .. })
        ));
    }

    #[test]
    fn reject_restores_values_and_links() {
        let m = manager();
        let c1 = m
            .create_attached_entity("Customer", [("id", 1)], EntityState::Unchanged)
            .unwrap();
        let c2 = m
            .create_attached_entity("Customer", [("id", 2)], EntityState::Unchanged)
            .unwrap();
        let o = m
            .create_attached_entity(
                "Order",
                [("id", 10), ("customerId", 1)],
                EntityState::Unchanged,
            )
            .unwrap();
        assert_eq!(o.navigation("customer"), Some(c1.clone()));

        o.set_navigation("customer", Some(&c2)).unwrap();
        assert_eq!(o.entity_state(), EntityState::Modified);
        m.reject_changes(&o).unwrap();

        assert_eq!(o.entity_state(), EntityState::Unchanged);
        assert_eq!(o.get_value("customerId"), Some(Value::Integer(1)));
        assert_eq!(o.navigation("customer"), Some(c1.clone()));
        assert_eq!(c1.collection("orders"), vec![o.clone()]);
        assert!(c2.collection("orders").is_empty());
        assert!(!m.has_changes());
    }

    #[test]
    fn set_deleted_unlinks_parent() {
        let m = manager();
        let c = m
            .create_attached_entity("Customer", [("id", 1)], EntityState::Unchanged)
            .unwrap();
        let o = m
            .create_attached_entity(
                "Order",
                [("id", 10), ("customerId", 1)],
                EntityState::Unchanged,
            )
            .unwrap();
        m.set_deleted(&o).unwrap();
        assert_eq!(o.entity_state(), EntityState::Deleted);
        assert!(c.collection("orders").is_empty());
        assert_eq!(o.get_value("customerId"), Some(Value::Integer(1)));

        m.reject_changes(&o).unwrap();
        assert_eq!(o.navigation("customer"), Some(c.clone()));
        assert_eq!(c.collection("orders"), vec![o]);
    }

    #[test]
    fn accept_detaches_deleted() {
        let m = manager();
        let c = m
            .create_attached_entity("Customer", [("id", 1)], EntityState::Unchanged)
            .unwrap();
        m.set_deleted(&c).unwrap();
        m.accept_changes(&c).unwrap();
        assert_eq!(c.entity_state(), EntityState::Detached);
        assert_eq!(m.entity_count(), 0);
    }

    #[test]
    fn clear_resets_everything() {
        let m = manager();
        let events = m.subscribe();
        let c = m
            .create_attached_entity("Customer", [("name", "x")], EntityState::Added)
            .unwrap();
        m.clear();
        assert!(!c.is_attached());
        assert_eq!(c.manager_id(), None);
        assert_eq!(m.entity_count(), 0);
        assert!(!m.has_changes());
        let last = events.try_iter().last().unwrap();
        assert_eq!(last.action, EntityAction::Clear);
        assert!(last.entity.is_none());
    }

    #[test]
    fn manual_temp_key() {
        let m = manager();
        let c = m.create_entity("Customer", [("name", "x")]).unwrap();
        let value = m.generate_temp_key_value(&c).unwrap();
        assert_eq!(c.get_value("id"), Some(value));
        let c = m
            .attach_entity(&c, EntityState::Added, MergeStrategy::Disallowed)
            .unwrap();
        assert!(c.has_temp_key());
        assert!(m.generate_temp_key_value(&c).is_err());
    }
}
