use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use ogr_types::{ContextId, EntityName, ObjectRef, TransactionAuthor};

/// Where a save pushed its changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitTarget {
    /// Merged into the parent context's working set.
    Parent(ContextId),
    /// Committed to the store.
    Store,
}

/// Summary of one successful save.
///
/// References are in the form valid after the save: store commits carry
/// permanent references, merges into a parent may still carry temporary ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Context that was saved.
    pub origin: ContextId,
    pub target: CommitTarget,
    pub author: Option<TransactionAuthor>,
    pub inserted: Vec<ObjectRef>,
    pub updated: Vec<ObjectRef>,
    pub deleted: Vec<ObjectRef>,
}

impl ChangeNotification {
    pub fn new(origin: ContextId, target: CommitTarget) -> Self {
        Self {
            origin,
            target,
            author: None,
            inserted: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Every reference the save touched.
    pub fn references(&self) -> impl Iterator<Item = &ObjectRef> {
        self.inserted
            .iter()
            .chain(&self.updated)
            .chain(&self.deleted)
    }

    pub fn touches(&self, reference: &ObjectRef) -> bool {
        self.references().any(|r| r == reference)
    }

    pub fn touches_entity(&self, entity: &EntityName) -> bool {
        self.references().any(|r| r.entity() == entity)
    }

    pub fn deletes(&self, reference: &ObjectRef) -> bool {
        self.deleted.contains(reference)
    }
}

/// Filter for observing a subset of change notifications.
#[derive(Clone, Debug, Default)]
pub struct ChangeFilter {
    /// If set, only saves of these contexts are delivered.
    pub origins: Option<Vec<ContextId>>,
    /// If set, only saves touching one of these entities are delivered.
    pub entities: Option<Vec<EntityName>>,
    /// If set, only saves touching one of these references are delivered.
    pub refs: Option<Vec<ObjectRef>>,
}

impl ChangeFilter {
    /// Returns `true` if the given notification matches this filter.
    pub fn matches(&self, notification: &ChangeNotification) -> bool {
        if let Some(ref origins) = self.origins {
            if !origins.contains(&notification.origin) {
                return false;
            }
        }
        if let Some(ref entities) = self.entities {
            if !entities.iter().any(|e| notification.touches_entity(e)) {
                return false;
            }
        }
        if let Some(ref refs) = self.refs {
            if !refs.iter().any(|r| notification.touches(r)) {
                return false;
            }
        }
        true
    }
}

/// A broadcast channel receiver for change notifications.
pub type ChangeStream = broadcast::Receiver<ChangeNotification>;

/// Handle used to unregister an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Internal observer: a filter paired with a broadcast sender.
struct Observer {
    id: ObserverId,
    filter: ChangeFilter,
    sender: broadcast::Sender<ChangeNotification>,
}

/// Fan-out router that delivers change notifications to matching observers.
pub struct ChangeRouter {
    observers: RwLock<Vec<Observer>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl ChangeRouter {
    /// `capacity` bounds each observer's channel; slow observers lag rather
    /// than block saves.
    pub fn new(capacity: usize) -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a new observer with the given filter.
    /// Returns its id and a broadcast receiver for the matching notifications.
    ///
    /// Merge notifications (`CommitTarget::Parent`) arrive just before the
    /// store commit that made them durable; merges that are rolled back are
    /// never delivered.
    pub fn subscribe(&self, filter: ChangeFilter) -> (ObserverId, ChangeStream) {
        let (tx, rx) = broadcast::channel(self.capacity);
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Observer {
                id,
                filter,
                sender: tx,
            });
        debug!(observer = id.0, "observer registered");
        (id, rx)
    }

    /// Remove an observer. Returns `true` if it was still registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|o| o.id != id);
        let removed = observers.len() != before;
        if removed {
            debug!(observer = id.0, "observer unregistered");
        }
        removed
    }

    /// Route a notification to all matching observers.
    /// Observers whose channels are closed are pruned.
    pub fn route(&self, notification: &ChangeNotification) -> usize {
        let mut delivered = 0;
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        observers.retain(|o| {
            if o.filter.matches(notification) {
                // If send fails (no receivers), the observer is stale.
                let ok = o.sender.send(notification.clone()).is_ok();
                delivered += usize::from(ok);
                ok
            } else {
                o.sender.receiver_count() > 0
            }
        });
        delivered
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for ChangeRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeRouter")
            .field("observers", &self.observer_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}
