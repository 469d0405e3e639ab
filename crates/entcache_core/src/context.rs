//! State shared between a manager and the entities attached to it.

use crate::cache::RelationshipLinker;
use crate::entity::Entity;
use crate::events::EntityChangedFeed;
use crate::loading::LoadingScope;
use crate::manager::CacheState;
use crate::metadata::MetadataStore;
use crate::validation::Validator;
use crate::value::Value;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// The slice of manager state an attached entity can reach.
///
/// Entity handles hold an `Arc` to this instead of to the manager, so a
/// tracked property write can publish events, check the loading scope and
/// invalidate the cached `has_changes` flag. The cache state is held weakly:
/// cached entities own this context, and the state owns the entities.
pub(crate) struct ManagerContext {
    id: Uuid,
    metadata: Arc<MetadataStore>,
    cache: Weak<Mutex<CacheState>>,
    pub(crate) loading: LoadingScope,
    pub(crate) feed: EntityChangedFeed,
    pub(crate) validator: Option<Arc<dyn Validator>>,
    pub(crate) validate_on_property_change: bool,
    has_changes: AtomicBool,
    stale: AtomicBool,
}

impl ManagerContext {
    pub(crate) fn new(
        metadata: Arc<MetadataStore>,
        cache: Weak<Mutex<CacheState>>,
        validator: Option<Arc<dyn Validator>>,
        validate_on_property_change: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            metadata,
            cache,
            loading: LoadingScope::new(),
            feed: EntityChangedFeed::new(),
            validator,
            validate_on_property_change,
            has_changes: AtomicBool::new(false),
            stale: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn is_loading(&self) -> bool {
        self.loading.is_loading()
    }

    /// Rewires `entity` after a tracked write to the foreign key `name`.
    ///
    /// Must be called without holding any entity lock. Does nothing once
    /// the manager is gone.
    pub(crate) fn relink_foreign_key(&self, entity: &Entity, name: &str, old: &Value) {
        let Some(cache) = self.cache.upgrade() else {
            return;
        };
        let mut cache = cache.lock();
        let _loading = self.loading.enter();
        let cache = &mut *cache;
        RelationshipLinker::new(&self.metadata, &cache.groups, &mut cache.unattached)
            .relink_foreign_key(entity, name, old);
    }

    /// Marks the cached `has_changes` value as needing recomputation.
    pub(crate) fn mark_changed(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    /// Returns the cached value, or `None` if it must be recomputed.
    pub(crate) fn cached_has_changes(&self) -> Option<bool> {
        if self.stale.load(Ordering::SeqCst) {
            None
        } else {
            Some(self.has_changes.load(Ordering::SeqCst))
        }
    }

    pub(crate) fn store_has_changes(&self, value: bool) {
        self.has_changes.store(value, Ordering::SeqCst);
        self.stale.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for ManagerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerContext")
            .field("id", &self.id)
            .field("loading", &self.loading.depth())
            .finish_non_exhaustive()
    }
}
