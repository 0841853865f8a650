use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock as QueueLock};
use tracing::debug;

use ogr_store::Store;
use ogr_types::ContextId;

use crate::error::{ContextError, ContextResult};
use crate::executor::Executor;
use crate::notification::{ChangeNotification, ChangeRouter};
use crate::workspace::{WorkingSet, Workspace};

/// Role of a context in the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextKind {
    /// Long-lived root the application reads through.
    Shared,
    /// Ephemeral child where one mutation is staged.
    Scratchpad,
    /// Ephemeral child used for reads and subscriptions.
    Read,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::Scratchpad => write!(f, "scratchpad"),
            Self::Read => write!(f, "read"),
        }
    }
}

struct ContextNode {
    parent: Option<ContextId>,
    /// The context's serial queue. Work on the context itself takes it
    /// exclusively; descendants reading through it share it. The tokio lock
    /// is fair, so queued work runs in submission order.
    state: Arc<QueueLock<WorkingSet>>,
}

/// Queue guards held for one operation, child first, root last.
struct LockChain {
    exclusive: Vec<OwnedRwLockWriteGuard<WorkingSet>>,
    shared: Vec<OwnedRwLockReadGuard<WorkingSet>>,
}

/// Arena of live contexts over one store.
///
/// Contexts refer to their parent by id. A context is removed from the arena
/// when its owning [`Context`] handle is dropped; descendants that outlive it
/// fail with [`ContextError::Released`] on their next operation.
pub struct ContextArena {
    store: Arc<dyn Store>,
    router: ChangeRouter,
    nodes: RwLock<HashMap<ContextId, Arc<ContextNode>>>,
}

impl ContextArena {
    /// Create an arena over `store`; `channel_capacity` bounds each change
    /// observer's channel.
    pub fn new(store: Arc<dyn Store>, channel_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            store,
            router: ChangeRouter::new(channel_capacity),
            nodes: RwLock::new(HashMap::new()),
        })
    }

    /// Create a root context whose parent is the store.
    pub fn create_root(self: &Arc<Self>, executor: Executor) -> Context {
        self.register(None, ContextKind::Shared, executor)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn router(&self) -> &ChangeRouter {
        &self.router
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.read_nodes().contains_key(&id)
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.read_nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_nodes(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ContextId, Arc<ContextNode>>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(
        self: &Arc<Self>,
        parent: Option<ContextId>,
        kind: ContextKind,
        executor: Executor,
    ) -> Context {
        let id = ContextId::next();
        let node = Arc::new(ContextNode {
            parent,
            state: Arc::new(QueueLock::new(WorkingSet::new(id, parent, kind))),
        });
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, node.clone());
        debug!(context = %id, %kind, parent = ?parent, "context created");
        Context {
            id,
            kind,
            executor,
            node,
            arena: self.clone(),
        }
    }

    fn lookup(&self, id: ContextId) -> Option<Arc<ContextNode>> {
        self.read_nodes().get(&id).cloned()
    }

    fn release(&self, id: ContextId) {
        let removed = self
            .nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            debug!(context = %id, "context released");
        }
    }
}

impl fmt::Debug for ContextArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextArena")
            .field("contexts", &self.len())
            .field("router", &self.router)
            .finish()
    }
}

/// Owning handle to a context in a [`ContextArena`].
///
/// Dropping the handle releases the context.
pub struct Context {
    id: ContextId,
    kind: ContextKind,
    executor: Executor,
    node: Arc<ContextNode>,
    arena: Arc<ContextArena>,
}

impl Context {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn parent(&self) -> Option<ContextId> {
        self.node.parent
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn arena(&self) -> &Arc<ContextArena> {
        &self.arena
    }

    /// Create a child of this context. The child inherits the executor.
    pub fn child(&self, kind: ContextKind) -> Context {
        self.arena
            .register(Some(self.id), kind, self.executor.clone())
    }

    /// This context followed by its live ancestors, root last.
    pub fn ancestry(&self) -> Vec<ContextId> {
        let mut ids = vec![self.id];
        let mut next = self.node.parent;
        while let Some(id) = next {
            ids.push(id);
            next = self.arena.lookup(id).and_then(|n| n.parent);
        }
        ids
    }

    /// Acquire this context's queue exclusively, then `exclusive_ancestors`
    /// more ancestors exclusively, then the rest up to the root shared.
    async fn lock_chain(&self, exclusive_ancestors: usize) -> ContextResult<LockChain> {
        let mut exclusive = vec![self.node.state.clone().write_owned().await];
        let mut shared = Vec::new();
        let mut next = self.node.parent;
        while let Some(id) = next {
            let node = self.arena.lookup(id).ok_or(ContextError::Released(id))?;
            if exclusive.len() <= exclusive_ancestors {
                exclusive.push(node.state.clone().write_owned().await);
            } else {
                shared.push(node.state.clone().read_owned().await);
            }
            next = node.parent;
        }
        Ok(LockChain { exclusive, shared })
    }

    /// Run `work` on this context's queue. Ancestors are only read, so
    /// sibling contexts run concurrently.
    pub async fn perform<R, E, F>(&self, work: F) -> Result<R, E>
    where
        F: FnOnce(&mut Workspace<'_>) -> Result<R, E>,
        E: From<ContextError>,
    {
        let mut chain = self.lock_chain(0).await?;
        let ancestors: Vec<&WorkingSet> = chain.shared.iter().map(|g| &**g).collect();
        let [own] = chain.exclusive.as_mut_slice() else {
            return Err(ContextError::Released(self.id).into());
        };
        let mut workspace = Workspace::new(own, ancestors, &*self.arena.store, &self.arena.router);
        work(&mut workspace)
    }

    /// Run `work` on this context's queue and its parent's, with mutable
    /// access to both. Used to save a child into its parent and carry the
    /// result further in the same parent slot.
    pub async fn perform_with_parent<R, E, F>(&self, work: F) -> Result<R, E>
    where
        F: FnOnce(&mut Workspace<'_>, &mut Workspace<'_>) -> Result<R, E>,
        E: From<ContextError>,
    {
        let mut chain = self.lock_chain(1).await?;
        let upper: Vec<&WorkingSet> = chain.shared.iter().map(|g| &**g).collect();
        let [own, parent] = chain.exclusive.as_mut_slice() else {
            return Err(ContextError::NoParent(self.id).into());
        };
        let store = &*self.arena.store;
        let router = &self.arena.router;
        let mut child = Workspace::new(own, upper.clone(), store, router);
        let mut parent = Workspace::new(parent, upper, store, router);
        work(&mut child, &mut parent)
    }

    /// Save this context: merge into the parent, or commit to the store if
    /// this is the root.
    pub async fn save(&self) -> ContextResult<Option<ChangeNotification>> {
        if self.node.parent.is_none() {
            return self
                .perform(|ws| ws.commit_to_store().map(|(_, notification)| notification))
                .await;
        }
        self.perform_with_parent(|child, parent| child.save_into(parent))
            .await
    }

    pub async fn rollback(&self) -> ContextResult<()> {
        self.perform(|ws| {
            ws.rollback();
            Ok(())
        })
        .await
    }

    pub async fn reset(&self) -> ContextResult<()> {
        self.perform(|ws| {
            ws.reset();
            Ok(())
        })
        .await
    }

    pub async fn refresh(&self) -> ContextResult<()> {
        self.perform(|ws| {
            ws.refresh();
            Ok(())
        })
        .await
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.arena.release(self.id);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("parent", &self.node.parent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{ChangeFilter, CommitTarget};
    use ogr_store::{
        AggregateFunction, AggregateRequest, EntitySchema, FetchRequest, InMemoryStore, Schema,
        SortDescriptor, StoreError,
    };
    use ogr_types::{EntityName, Node, ObjectRef, Value};

    fn item() -> EntityName {
        EntityName::new("Item").unwrap()
    }

    fn arena() -> Arc<ContextArena> {
        let schema = Schema::new().with_entity(EntitySchema::new(item()).unique(["id"]));
        ContextArena::new(Arc::new(InMemoryStore::new(schema)), 64)
    }

    fn root(arena: &Arc<ContextArena>) -> Context {
        arena.create_root(Executor::current().unwrap())
    }

    async fn stage_item(ctx: &Context, id: i64) -> ObjectRef {
        ctx.perform(|ws| {
            let mut node = ws.new_node(item())?;
            node.set("id", id);
            ws.insert(node)
        })
        .await
        .unwrap()
    }

    async fn count(ctx: &Context) -> usize {
        ctx.perform(|ws| ws.count(&FetchRequest::new(item())))
            .await
            .unwrap()
    }

    /// Save a child into the root and the root into the store.
    async fn save_through(child: &Context) -> ContextResult<ogr_store::CommitReceipt> {
        child
            .perform_with_parent(|child, parent| {
                child.save_into(parent)?;
                let (receipt, _) = parent.commit_to_store()?;
                child.promote(&receipt);
                Ok(receipt)
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Arena lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn dropping_a_handle_releases_the_context() {
        let arena = arena();
        let shared = root(&arena);
        let child = shared.child(ContextKind::Read);
        let id = child.id();
        assert!(arena.contains(id));
        assert_eq!(arena.len(), 2);
        drop(child);
        assert!(!arena.contains(id));
        assert_eq!(arena.len(), 1);
    }

    #[tokio::test]
    async fn orphaned_child_reports_released_parent() {
        let arena = arena();
        let shared = root(&arena);
        let child = shared.child(ContextKind::Read);
        let parent_id = shared.id();
        drop(shared);
        let err = child.perform(|_| Ok::<_, ContextError>(())).await.unwrap_err();
        assert!(matches!(err, ContextError::Released(id) if id == parent_id));
    }

    #[tokio::test]
    async fn ancestry_lists_self_then_ancestors() {
        let arena = arena();
        let shared = root(&arena);
        let child = shared.child(ContextKind::Scratchpad);
        let grandchild = child.child(ContextKind::Read);
        assert_eq!(grandchild.ancestry(), vec![grandchild.id(), child.id(), shared.id()]);
        assert_eq!(grandchild.parent(), Some(child.id()));
        assert_eq!(shared.parent(), None);
    }

    // -----------------------------------------------------------------------
    // Isolation and save
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn pending_changes_are_private_until_saved() {
        let arena = arena();
        let shared = root(&arena);
        let a = shared.child(ContextKind::Scratchpad);
        let b = shared.child(ContextKind::Read);

        stage_item(&a, 1).await;
        assert_eq!(count(&a).await, 1);
        assert_eq!(count(&b).await, 0);

        a.save().await.unwrap();
        assert_eq!(count(&b).await, 1, "merged into the shared parent");
        assert_eq!(arena.store().count(&FetchRequest::new(item())).unwrap(), 0);

        shared.save().await.unwrap();
        assert_eq!(arena.store().count(&FetchRequest::new(item())).unwrap(), 1);
    }

    #[tokio::test]
    async fn save_through_promotes_temporary_refs() {
        let arena = arena();
        let shared = root(&arena);
        let child = shared.child(ContextKind::Scratchpad);
        let temp = stage_item(&child, 7).await;
        assert!(temp.is_temporary());

        let receipt = save_through(&child).await.unwrap();
        let permanent = receipt.promote(&temp);
        assert!(!permanent.is_temporary());

        let node = child.perform(|ws| ws.object(&permanent)).await.unwrap();
        assert_eq!(node.get::<i64>("id").unwrap(), 7);
        assert!(child.perform(|ws| ws.object(&temp)).await.is_err());
    }

    #[tokio::test]
    async fn failed_store_commit_leaves_pending_changes_for_rollback() {
        let arena = arena();
        let shared = root(&arena);
        let first = shared.child(ContextKind::Scratchpad);
        stage_item(&first, 1).await;
        save_through(&first).await.unwrap();

        let second = shared.child(ContextKind::Scratchpad);
        stage_item(&second, 1).await;
        let err = second
            .perform_with_parent(|child, parent| {
                child.save_into(parent)?;
                match parent.commit_to_store() {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        assert!(parent.has_changes());
                        parent.rollback();
                        Err(e)
                    }
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ContextError::Store(StoreError::ConstraintViolation { .. })
        ));

        let reader = shared.child(ContextKind::Read);
        assert_eq!(count(&reader).await, 1);
        assert!(!shared.perform(|ws| Ok::<_, ContextError>(ws.has_changes())).await.unwrap());
    }

    #[tokio::test]
    async fn frozen_snapshot_until_refresh() {
        let arena = arena();
        let shared = root(&arena);
        let writer = shared.child(ContextKind::Scratchpad);
        let temp = stage_item(&writer, 1).await;
        let receipt = save_through(&writer).await.unwrap();
        let r = receipt.promote(&temp);

        let reader = shared.child(ContextKind::Read);
        reader.perform(|ws| ws.object(&r)).await.unwrap();

        let editor = shared.child(ContextKind::Scratchpad);
        editor
            .perform(|ws| {
                let mut node = ws.object(&r)?;
                node.set("id", 2i64);
                ws.update(node)
            })
            .await
            .unwrap();
        save_through(&editor).await.unwrap();

        let stale = reader.perform(|ws| ws.object(&r)).await.unwrap();
        assert_eq!(stale.get::<i64>("id").unwrap(), 1);
        reader.refresh().await.unwrap();
        let fresh = reader.perform(|ws| ws.object(&r)).await.unwrap();
        assert_eq!(fresh.get::<i64>("id").unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sibling_contexts_run_concurrently() {
        let arena = arena();
        let shared = root(&arena);
        let reader = shared.child(ContextKind::Read);
        let scratchpad = shared.child(ContextKind::Scratchpad);

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let slow = tokio::spawn(async move {
            reader
                .perform(|ws| {
                    let _ = started_tx.send(());
                    std::thread::sleep(std::time::Duration::from_millis(500));
                    ws.count(&FetchRequest::new(item()))
                })
                .await
        });
        started_rx.await.unwrap();

        let started = std::time::Instant::now();
        stage_item(&scratchpad, 1).await;
        assert_eq!(count(&scratchpad).await, 1);
        let waited = started.elapsed();
        assert!(
            waited < std::time::Duration::from_millis(200),
            "scratchpad waited {waited:?} behind a sibling read"
        );
        assert_eq!(slow.await.unwrap().unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn saving_into_the_parent_waits_for_readers() {
        let arena = arena();
        let shared = root(&arena);
        let reader = shared.child(ContextKind::Read);
        let writer = shared.child(ContextKind::Scratchpad);
        stage_item(&writer, 1).await;

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let slow = tokio::spawn(async move {
            reader
                .perform(|ws| {
                    let _ = started_tx.send(());
                    std::thread::sleep(std::time::Duration::from_millis(200));
                    ws.count(&FetchRequest::new(item()))
                })
                .await
        });
        started_rx.await.unwrap();

        writer.save().await.unwrap();
        // The read held the shared context, so it saw the state before the merge.
        assert_eq!(slow.await.unwrap().unwrap(), 0);
        let after = shared.child(ContextKind::Read);
        assert_eq!(count(&after).await, 1);
    }

    // -----------------------------------------------------------------------
    // Deletion, rollback, reset
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn deleted_objects_are_flagged_then_gone() {
        let arena = arena();
        let shared = root(&arena);
        let writer = shared.child(ContextKind::Scratchpad);
        let temp = stage_item(&writer, 1).await;
        let r = save_through(&writer).await.unwrap().promote(&temp);

        let deleter = shared.child(ContextKind::Scratchpad);
        deleter.perform(|ws| ws.delete(&r)).await.unwrap();
        let err = deleter.perform(|ws| ws.object(&r)).await.unwrap_err();
        assert!(matches!(err, ContextError::FlaggedDeleted(_)));

        deleter.save().await.unwrap();
        let reader = shared.child(ContextKind::Read);
        let err = reader.perform(|ws| ws.object(&r)).await.unwrap_err();
        assert!(matches!(err, ContextError::FlaggedDeleted(_)));

        shared.save().await.unwrap();
        let err = reader.perform(|ws| ws.object(&r)).await.unwrap_err();
        assert!(matches!(err, ContextError::NotFound(_)));
    }

    #[tokio::test]
    async fn deleting_a_pending_insert_unstages_it() {
        let arena = arena();
        let shared = root(&arena);
        let ctx = shared.child(ContextKind::Scratchpad);
        let temp = stage_item(&ctx, 1).await;
        ctx.perform(|ws| ws.delete(&temp)).await.unwrap();
        assert!(!ctx.perform(|ws| Ok::<_, ContextError>(ws.has_changes())).await.unwrap());
        assert!(ctx.save().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rollback_and_reset_discard_pending_changes() {
        let arena = arena();
        let shared = root(&arena);
        let ctx = shared.child(ContextKind::Scratchpad);
        stage_item(&ctx, 1).await;
        ctx.rollback().await.unwrap();
        assert_eq!(count(&ctx).await, 0);

        stage_item(&ctx, 2).await;
        ctx.perform(|ws| {
            ws.set_author(Some("importer".into()));
            Ok::<_, ContextError>(())
        })
        .await
        .unwrap();
        ctx.reset().await.unwrap();
        assert_eq!(count(&ctx).await, 0);
        assert!(ctx.perform(|ws| Ok::<_, ContextError>(ws.author().is_none())).await.unwrap());
    }

    // -----------------------------------------------------------------------
    // Fetch, count and aggregate overlays
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn fetch_overlays_pending_changes() {
        let arena = arena();
        let shared = root(&arena);
        let writer = shared.child(ContextKind::Scratchpad);
        let temps = vec![stage_item(&writer, 1).await, stage_item(&writer, 2).await];
        let receipt = save_through(&writer).await.unwrap();
        let first = receipt.promote(&temps[0]);

        let ctx = shared.child(ContextKind::Scratchpad);
        ctx.perform(|ws| ws.delete(&first)).await.unwrap();
        stage_item(&ctx, 3).await;

        let ids: Vec<i64> = ctx
            .perform(|ws| ws.fetch(&FetchRequest::new(item()).sorted_by(SortDescriptor::ascending("id"))))
            .await
            .unwrap()
            .iter()
            .map(|n| n.get::<i64>("id").unwrap())
            .collect();
        assert_eq!(ids, vec![2, 3]);

        let sum = AggregateRequest::new(AggregateFunction::Sum, FetchRequest::new(item()), "id");
        let total = ctx.perform(|ws| ws.aggregate(&sum)).await.unwrap();
        assert_eq!(total, Value::Int(5));
        assert_eq!(count(&ctx).await, 2);
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn saves_raise_notifications() {
        let arena = arena();
        let shared = root(&arena);
        let (_, mut all) = arena.router().subscribe(ChangeFilter::default());
        let (_, mut durable) = arena.router().subscribe(ChangeFilter {
            origins: Some(vec![shared.id()]),
            ..Default::default()
        });

        let child = shared.child(ContextKind::Scratchpad);
        child
            .perform(|ws| {
                ws.set_author(Some("tester".into()));
                Ok::<_, ContextError>(())
            })
            .await
            .unwrap();
        stage_item(&child, 1).await;
        save_through(&child).await.unwrap();

        let merge = all.try_recv().unwrap();
        assert_eq!(merge.origin, child.id());
        assert_eq!(merge.target, CommitTarget::Parent(shared.id()));
        assert_eq!(merge.author.as_ref().map(|a| a.as_str()), Some("tester"));

        let commit = all.try_recv().unwrap();
        assert_eq!(commit.target, CommitTarget::Store);
        assert!(commit.inserted.iter().all(|r| !r.is_temporary()));

        assert_eq!(durable.try_recv().unwrap().origin, shared.id());
        assert!(durable.try_recv().is_err());
    }

    #[tokio::test]
    async fn merges_are_routed_only_with_their_store_commit() {
        let arena = arena();
        let shared = root(&arena);
        let (_, mut all) = arena.router().subscribe(ChangeFilter::default());

        let child = shared.child(ContextKind::Scratchpad);
        stage_item(&child, 1).await;
        assert!(child.save().await.unwrap().is_some());
        assert!(all.try_recv().is_err(), "merge held until the store commit");

        shared.save().await.unwrap();
        assert_eq!(all.try_recv().unwrap().origin, child.id());
        assert_eq!(all.try_recv().unwrap().target, CommitTarget::Store);

        let duplicate = shared.child(ContextKind::Scratchpad);
        stage_item(&duplicate, 1).await;
        duplicate
            .perform_with_parent(|child, parent| {
                child.save_into(parent)?;
                let committed = parent.commit_to_store();
                if committed.is_err() {
                    parent.rollback();
                }
                committed.map(|_| ())
            })
            .await
            .unwrap_err();
        shared.save().await.unwrap();
        assert!(all.try_recv().is_err(), "rolled back merge is never routed");
    }

    #[tokio::test]
    async fn update_of_unknown_object_fails() {
        let arena = arena();
        let shared = root(&arena);
        let ctx = shared.child(ContextKind::Scratchpad);
        let ghost = Node::new(ObjectRef::permanent(arena.store().store_id(), item(), 404));
        let err = ctx.perform(|ws| ws.update(ghost)).await.unwrap_err();
        assert!(matches!(err, ContextError::NotFound(_)));
    }
}
