use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use ogr_store::{AggregateRequest, ChangeSet, CommitReceipt, FetchRequest, Store};
use ogr_types::{
    ContextId, EntityName, Node, ObjectRef, RefKey, StoreId, TransactionAuthor, Value,
};

use crate::arena::ContextKind;
use crate::error::{ContextError, ContextResult};
use crate::notification::{ChangeNotification, ChangeRouter, CommitTarget};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EntryState {
    /// Registered snapshot, no pending change.
    Clean,
    Inserted,
    Updated,
    Deleted,
}

#[derive(Clone, Debug)]
struct Entry {
    node: Node,
    state: EntryState,
}

/// The private state of one context: registered objects and pending changes.
///
/// Only reachable through the owning context's serial queue.
#[derive(Debug)]
pub struct WorkingSet {
    owner: ContextId,
    parent: Option<ContextId>,
    kind: ContextKind,
    entries: HashMap<ObjectRef, Entry>,
    /// Pending inserts in insertion order.
    order: Vec<ObjectRef>,
    author: Option<TransactionAuthor>,
    next_temp: u64,
    /// Merge notifications from children, routed once this context's
    /// changes reach the store.
    deferred: Vec<ChangeNotification>,
}

impl WorkingSet {
    pub(crate) fn new(owner: ContextId, parent: Option<ContextId>, kind: ContextKind) -> Self {
        Self {
            owner,
            parent,
            kind,
            entries: HashMap::new(),
            order: Vec::new(),
            author: None,
            next_temp: 0,
            deferred: Vec::new(),
        }
    }

    pub fn owner(&self) -> ContextId {
        self.owner
    }

    /// Number of registered objects, pending or clean.
    pub fn registered(&self) -> usize {
        self.entries.len()
    }

    pub fn has_changes(&self) -> bool {
        self.entries.values().any(|e| e.state != EntryState::Clean)
    }

    fn pending_for(&self, entity: &EntityName) -> bool {
        self.entries
            .values()
            .any(|e| e.state != EntryState::Clean && e.node.entity() == entity)
    }

    fn lookup(&self, reference: &ObjectRef) -> Option<&Entry> {
        self.entries.get(reference)
    }

    fn register_clean(&mut self, node: &Node) {
        self.entries
            .entry(node.reference().clone())
            .or_insert_with(|| Entry {
                node: node.clone(),
                state: EntryState::Clean,
            });
    }

    fn remove(&mut self, reference: &ObjectRef) {
        if self.entries.remove(reference).is_some() {
            self.order.retain(|r| r != reference);
        }
    }

    fn take_pending(&mut self) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for reference in &self.order {
            if let Some(entry) = self.entries.get(reference) {
                if entry.state == EntryState::Inserted {
                    changes.inserted.push(entry.node.clone());
                }
            }
        }
        for entry in self.entries.values() {
            match entry.state {
                EntryState::Updated => changes.updated.push(entry.node.clone()),
                EntryState::Deleted => changes.deleted.push(entry.node.reference().clone()),
                EntryState::Clean | EntryState::Inserted => {}
            }
        }
        changes.updated.sort_by(|a, b| a.reference().cmp(b.reference()));
        changes.deleted.sort();
        changes
    }

    /// Drop every pending change, keeping clean snapshots.
    fn rollback(&mut self) {
        self.entries.retain(|_, e| e.state == EntryState::Clean);
        self.order.clear();
        self.deferred.clear();
    }

    /// Forget everything.
    fn reset(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.author = None;
        self.deferred.clear();
    }

    /// Drop clean snapshots so the next read sees the latest state below.
    fn refresh(&mut self) {
        self.entries.retain(|_, e| e.state != EntryState::Clean);
    }
}

/// Exclusive access to one context's working set, with read access to its
/// ancestors and the store.
///
/// A workspace only exists while the context's queue (and its ancestors'
/// queues) are held, so everything done through it is serialized with other
/// work on the same context. A child workspace handed out next to its
/// parent's does not see the parent layer; it reads its own entries, the
/// layers above the parent and the store.
pub struct Workspace<'a> {
    own: &'a mut WorkingSet,
    /// Nearest ancestor first.
    ancestors: Vec<&'a WorkingSet>,
    store: &'a dyn Store,
    router: &'a ChangeRouter,
}

impl<'a> Workspace<'a> {
    pub(crate) fn new(
        own: &'a mut WorkingSet,
        ancestors: Vec<&'a WorkingSet>,
        store: &'a dyn Store,
        router: &'a ChangeRouter,
    ) -> Self {
        Self {
            own,
            ancestors,
            store,
            router,
        }
    }

    pub fn id(&self) -> ContextId {
        self.own.owner
    }

    pub fn kind(&self) -> ContextKind {
        self.own.kind
    }

    pub fn store(&self) -> &dyn Store {
        self.store
    }

    pub fn store_id(&self) -> StoreId {
        self.store.store_id()
    }

    pub fn parent(&self) -> Option<ContextId> {
        self.own.parent
    }

    pub fn is_root(&self) -> bool {
        self.own.parent.is_none()
    }

    pub fn author(&self) -> Option<&TransactionAuthor> {
        self.own.author.as_ref()
    }

    /// Tag subsequent saves of this context. `None` clears the tag.
    pub fn set_author(&mut self, author: Option<TransactionAuthor>) {
        self.own.author = author;
    }

    pub fn has_changes(&self) -> bool {
        self.own.has_changes()
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    /// A fresh, unregistered node of `entity` with a temporary reference.
    pub fn new_node(&mut self, entity: EntityName) -> ContextResult<Node> {
        self.store.schema().entity(&entity)?;
        self.own.next_temp += 1;
        let reference =
            ObjectRef::temporary(self.store_id(), entity, self.own.owner, self.own.next_temp);
        Ok(Node::new(reference))
    }

    /// Register a node created with [`new_node`](Self::new_node) as a pending
    /// insert.
    pub fn insert(&mut self, node: Node) -> ContextResult<ObjectRef> {
        let reference = node.reference().clone();
        match reference.key() {
            RefKey::Temporary { context, .. } if context == self.own.owner => {}
            _ => return Err(ContextError::NotOwned(reference)),
        }
        self.own.order.push(reference.clone());
        self.own.entries.insert(
            reference.clone(),
            Entry {
                node,
                state: EntryState::Inserted,
            },
        );
        Ok(reference)
    }

    /// The current state of `reference` as seen from this context.
    ///
    /// Looks in this context, then each ancestor, then the store. Objects
    /// found below this context are registered here as clean snapshots and
    /// are not refreshed until [`refresh`](Self::refresh).
    pub fn object(&mut self, reference: &ObjectRef) -> ContextResult<Node> {
        if let Some(entry) = self.own.lookup(reference) {
            return match entry.state {
                EntryState::Deleted => Err(ContextError::FlaggedDeleted(reference.clone())),
                _ => Ok(entry.node.clone()),
            };
        }
        let inherited = self
            .ancestors
            .iter()
            .find_map(|layer| layer.lookup(reference))
            .map(|entry| (entry.state, entry.node.clone()));
        let node = match inherited {
            Some((EntryState::Deleted, _)) => {
                return Err(ContextError::FlaggedDeleted(reference.clone()))
            }
            Some((_, node)) => node,
            None if reference.is_temporary() => {
                return Err(ContextError::NotFound(reference.clone()))
            }
            None => self
                .store
                .read(reference)?
                .ok_or_else(|| ContextError::NotFound(reference.clone()))?,
        };
        self.own.register_clean(&node);
        Ok(node)
    }

    /// Stage `node` as the new state of an existing object.
    pub fn update(&mut self, node: Node) -> ContextResult<()> {
        let reference = node.reference().clone();
        if node.is_deleted() {
            return Err(ContextError::FlaggedDeleted(reference));
        }
        self.object(&reference)?;
        let state = match self.own.lookup(&reference).map(|e| e.state) {
            Some(EntryState::Inserted) => EntryState::Inserted,
            _ => EntryState::Updated,
        };
        self.own.entries.insert(reference, Entry { node, state });
        Ok(())
    }

    /// Stage the deletion of an existing object.
    pub fn delete(&mut self, reference: &ObjectRef) -> ContextResult<()> {
        let mut node = self.object(reference)?;
        if self.own.lookup(reference).map(|e| e.state) == Some(EntryState::Inserted) {
            self.own.remove(reference);
            return Ok(());
        }
        node.mark_deleted();
        self.own.entries.insert(
            reference.clone(),
            Entry {
                node,
                state: EntryState::Deleted,
            },
        );
        Ok(())
    }

    /// Execute a fetch against this context's view: the store overlaid with
    /// every ancestor's pending changes and then this context's.
    pub fn fetch(&mut self, request: &FetchRequest) -> ContextResult<Vec<Node>> {
        let base = self.store.fetch(&request.clone().without_limit())?;
        let mut merged: BTreeMap<ObjectRef, Node> = base
            .into_iter()
            .map(|node| (node.reference().clone(), node))
            .collect();

        let layers = self.ancestors.iter().rev().copied().chain(std::iter::once(&*self.own));
        for layer in layers {
            for (reference, entry) in &layer.entries {
                if entry.node.entity() != request.entity() {
                    continue;
                }
                match entry.state {
                    EntryState::Deleted => {
                        merged.remove(reference);
                    }
                    EntryState::Inserted | EntryState::Updated => {
                        merged.insert(reference.clone(), entry.node.clone());
                    }
                    EntryState::Clean => {
                        if let Some(slot) = merged.get_mut(reference) {
                            *slot = entry.node.clone();
                        }
                    }
                }
            }
        }

        let nodes = request.finish(merged.into_values().collect());
        for node in &nodes {
            self.own.register_clean(node);
        }
        Ok(nodes)
    }

    fn overlays(&self, entity: &EntityName) -> bool {
        self.own.pending_for(entity) || self.ancestors.iter().any(|a| a.pending_for(entity))
    }

    /// Number of objects `request` selects, ignoring its limit.
    pub fn count(&mut self, request: &FetchRequest) -> ContextResult<usize> {
        if !self.overlays(request.entity()) {
            return Ok(self.store.count(request)?);
        }
        Ok(self.fetch(&request.clone().without_limit())?.len())
    }

    pub fn aggregate(&mut self, request: &AggregateRequest) -> ContextResult<Value> {
        if !self.overlays(request.entity()) {
            return Ok(self.store.aggregate(request)?);
        }
        let nodes = self.fetch(request.fetch())?;
        Ok(request.evaluate(&nodes)?)
    }

    /// Evaluate a grouped aggregate, one `(key, value)` per group.
    pub fn aggregate_groups(&mut self, request: &AggregateRequest) -> ContextResult<Vec<(Value, Value)>> {
        let nodes = self.fetch(request.fetch())?;
        Ok(request.evaluate_groups(&nodes)?)
    }

    // -----------------------------------------------------------------------
    // Save, rollback, reset, refresh
    // -----------------------------------------------------------------------

    /// Merge this context's pending changes into `parent`.
    ///
    /// Saved objects stay registered here as clean snapshots. The merge
    /// notification is held by `parent` and routed only when the parent's
    /// changes are committed to the store; a parent rollback drops it.
    /// Returns the notification, or `None` if there was nothing to save.
    pub fn save_into(&mut self, parent: &mut Workspace<'_>) -> ContextResult<Option<ChangeNotification>> {
        if self.own.parent != Some(parent.id()) {
            return Err(ContextError::NoParent(self.id()));
        }
        let changes = self.own.take_pending();
        if changes.is_empty() {
            return Ok(None);
        }

        let mut notification =
            ChangeNotification::new(self.id(), CommitTarget::Parent(parent.id()));
        notification.author = self.own.author.clone();

        for node in changes.inserted {
            notification.inserted.push(node.reference().clone());
            parent.own.order.push(node.reference().clone());
            parent.own.entries.insert(
                node.reference().clone(),
                Entry {
                    node,
                    state: EntryState::Inserted,
                },
            );
        }
        for node in changes.updated {
            let reference = node.reference().clone();
            let state = match parent.own.lookup(&reference).map(|e| e.state) {
                Some(EntryState::Inserted) => EntryState::Inserted,
                _ => EntryState::Updated,
            };
            notification.updated.push(reference.clone());
            parent.own.entries.insert(reference, Entry { node, state });
        }
        for reference in changes.deleted {
            let pending_insert =
                parent.own.lookup(&reference).map(|e| e.state) == Some(EntryState::Inserted);
            if pending_insert {
                parent.own.remove(&reference);
            } else if let Some(entry) = self.own.entries.get(&reference) {
                parent.own.entries.insert(
                    reference.clone(),
                    Entry {
                        node: entry.node.clone(),
                        state: EntryState::Deleted,
                    },
                );
            }
            notification.deleted.push(reference);
        }

        self.own.entries.retain(|_, e| e.state != EntryState::Deleted);
        for entry in self.own.entries.values_mut() {
            entry.state = EntryState::Clean;
        }
        self.own.order.clear();

        parent.own.deferred.append(&mut self.own.deferred);
        parent.own.deferred.push(notification.clone());
        debug!(
            origin = %notification.origin,
            parent = %parent.id(),
            inserted = notification.inserted.len(),
            updated = notification.updated.len(),
            deleted = notification.deleted.len(),
            "context saved into parent"
        );
        Ok(Some(notification))
    }

    /// Commit this root context's pending changes to the store.
    ///
    /// On failure nothing is applied and the pending changes are left in
    /// place for the caller to roll back. On success the committed entries
    /// are dropped; later reads go to the store.
    pub fn commit_to_store(&mut self) -> ContextResult<(CommitReceipt, Option<ChangeNotification>)> {
        if !self.is_root() {
            return Err(ContextError::NotRoot(self.id()));
        }
        let changes = self.own.take_pending();
        if changes.is_empty() {
            self.own.deferred.clear();
            return Ok((CommitReceipt::default(), None));
        }

        let receipt = self.store.commit(&changes)?;
        let merges = std::mem::take(&mut self.own.deferred);
        self.own.rollback();
        for merge in &merges {
            self.router.route(merge);
        }

        let mut notification = ChangeNotification::new(self.id(), CommitTarget::Store);
        notification.author = self.own.author.clone();
        notification.inserted = receipt.inserted.clone();
        notification.updated = receipt.updated.clone();
        notification.deleted = receipt.deleted.clone();

        self.router.route(&notification);
        debug!(
            origin = %notification.origin,
            inserted = notification.inserted.len(),
            updated = notification.updated.len(),
            deleted = notification.deleted.len(),
            "context committed to store"
        );
        Ok((receipt, Some(notification)))
    }

    /// Rewrite temporary references registered here to the permanent form a
    /// store commit assigned, including references held in attributes.
    pub fn promote(&mut self, receipt: &CommitReceipt) {
        if receipt.promotions.is_empty() {
            return;
        }
        let remap = |r: &ObjectRef| receipt.promotions.get(r).cloned();
        let entries = std::mem::take(&mut self.own.entries);
        self.own.entries = entries
            .into_iter()
            .map(|(reference, mut entry)| {
                entry.node.remap_refs(remap);
                (remap(&reference).unwrap_or(reference), entry)
            })
            .collect();
        for reference in &mut self.own.order {
            if let Some(permanent) = remap(reference) {
                *reference = permanent;
            }
        }
    }

    /// Drop the given pending inserts.
    pub fn discard_inserted(&mut self, references: &[ObjectRef]) {
        for reference in references {
            if self.own.lookup(reference).map(|e| e.state) == Some(EntryState::Inserted) {
                self.own.remove(reference);
            }
        }
    }

    /// Discard every pending change in this context.
    pub fn rollback(&mut self) {
        self.own.rollback();
    }

    /// Discard all state, pending or clean, and clear the author tag.
    pub fn reset(&mut self) {
        self.own.reset();
    }

    pub fn refresh(&mut self) {
        self.own.refresh();
    }
}
