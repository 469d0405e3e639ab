//! Entity change notifications.
//!
//! Every manager owns an [`EntityChangedFeed`]. Subscribers receive
//! [`EntityChanged`] events over an `mpsc` channel.
//!
//! During bulk operations (query merges, imports, save merges) the feed is
//! put into deferred mode with [`EntityChangedFeed::defer`]. Events published
//! meanwhile are queued and delivered in publication order, exactly once,
//! when the outermost [`DeferGuard`] is dropped. Observers therefore never
//! see a half-linked graph.
//!
//! # Usage
//!
//! ```rust,ignore
//! let events = manager.subscribe();
//! manager.attach_entity(&customer, EntityState::Added, MergeStrategy::Disallowed)?;
//! while let Ok(event) = events.try_recv() {
//!     println!("{:?} {:?}", event.action, event.entity);
//! }
//! ```

use crate::entity::Entity;
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// Kind of change being notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityAction {
    /// An entity was attached.
    Attach,
    /// An entity was detached or removed after a delete was saved.
    Detach,
    /// An entity changed state.
    EntityStateChange,
    /// The whole cache was cleared (no entity).
    Clear,
    /// An imported entity merged into a cached one.
    MergeOnImport,
    /// An imported entity was attached.
    AttachOnImport,
    /// A data property changed.
    PropertyChange,
    /// Pending changes were accepted.
    AcceptChanges,
    /// Pending changes were rejected.
    RejectChanges,
    /// A query result merged into a cached entity.
    MergeOnQuery,
    /// A query result was attached.
    AttachOnQuery,
    /// A save result merged into a cached entity.
    MergeOnSave,
}

/// A single notification.
#[derive(Debug, Clone)]
pub struct EntityChanged {
    /// Publication sequence number within the manager.
    pub sequence: u64,
    /// What happened.
    pub action: EntityAction,
    /// Affected entity; `None` for cache wide events.
    pub entity: Option<Entity>,
    /// Changed property, for `PropertyChange`.
    pub property_name: Option<String>,
    /// Previous value, for `PropertyChange`.
    pub old_value: Option<Value>,
    /// New value, for `PropertyChange`.
    pub new_value: Option<Value>,
}

/// Publish/subscribe channel for one manager.
#[derive(Debug, Default)]
pub struct EntityChangedFeed {
    subscribers: RwLock<Vec<Sender<EntityChanged>>>,
    deferred: Mutex<Vec<EntityChanged>>,
    defer_depth: AtomicUsize,
    sequence: AtomicU64,
}

impl EntityChangedFeed {
    /// Creates an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<EntityChanged> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Publishes an entity level event.
    pub fn publish(&self, action: EntityAction, entity: Option<&Entity>) {
        self.emit(action, entity, None);
    }

    /// Publishes a `PropertyChange` event.
    pub fn publish_property(&self, entity: &Entity, property: &str, old: Value, new: Value) {
        self.emit(
            EntityAction::PropertyChange,
            Some(entity),
            Some((property.to_string(), old, new)),
        );
    }

    fn emit(
        &self,
        action: EntityAction,
        entity: Option<&Entity>,
        property: Option<(String, Value, Value)>,
    ) {
        let (property_name, old_value, new_value) = match property {
            Some((name, old, new)) => (Some(name), Some(old), Some(new)),
            None => (None, None, None),
        };
        let event = EntityChanged {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            action,
            entity: entity.cloned(),
            property_name,
            old_value,
            new_value,
        };
        if self.is_deferring() {
            self.deferred.lock().push(event);
        } else {
            self.deliver(event);
        }
    }

    fn deliver(&self, event: EntityChanged) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Queues events until the returned guard (and every enclosing one) is dropped.
    #[must_use = "deferred events are flushed when the guard is dropped"]
    pub fn defer(&self) -> DeferGuard<'_> {
        self.defer_depth.fetch_add(1, Ordering::SeqCst);
        DeferGuard { feed: self }
    }

    /// Returns true while events are being queued.
    pub fn is_deferring(&self) -> bool {
        self.defer_depth.load(Ordering::SeqCst) > 0
    }

    /// Number of queued events.
    pub fn pending(&self) -> usize {
        self.deferred.lock().len()
    }

    fn flush(&self) {
        let queued = std::mem::take(&mut *self.deferred.lock());
        if !queued.is_empty() {
            tracing::trace!(events = queued.len(), "flushing deferred entity events");
        }
        for event in queued {
            self.deliver(event);
        }
    }
}

/// Keeps an [`EntityChangedFeed`] in deferred mode.
#[derive(Debug)]
pub struct DeferGuard<'a> {
    feed: &'a EntityChangedFeed,
}

impl Drop for DeferGuard<'_> {
    fn drop(&mut self) {
        if self.feed.defer_depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.feed.flush();
        }
    }
}
