use std::fmt;
use std::sync::Arc;

use tracing::info;

use ogr_context::{Context, ContextArena, ContextKind, Executor, Workspace};
use ogr_store::{CommitReceipt, InMemoryStore, Schema, Store};
use ogr_types::{ObjectRef, TransactionAuthor};

use crate::config::RepositoryConfig;
use crate::error::{classify, RepoResult};
use crate::model::{decode, FetchableModel};
use crate::scratchpad::ScratchpadManager;

/// High-level object graph repository.
///
/// Cheap to clone; clones share the store, the context arena and the shared
/// root context.
#[derive(Clone)]
pub struct Repository {
    inner: Arc<RepoInner>,
}

struct RepoInner {
    arena: Arc<ContextArena>,
    shared: Context,
    config: RepositoryConfig,
}

impl Repository {
    /// Open a repository over `store`. Background work (subscriptions) runs
    /// on `executor`.
    pub fn new(store: Arc<dyn Store>, executor: Executor, config: RepositoryConfig) -> Self {
        let arena = ContextArena::new(store, config.change_channel_capacity);
        let shared = arena.create_root(executor);
        info!(
            store = %arena.store().store_id(),
            shared = %shared.id(),
            "repository opened"
        );
        Self {
            inner: Arc::new(RepoInner {
                arena,
                shared,
                config,
            }),
        }
    }

    /// Open a repository over a fresh in-memory store.
    pub fn in_memory(schema: Schema, executor: Executor) -> Self {
        Self::new(
            Arc::new(InMemoryStore::new(schema)),
            executor,
            RepositoryConfig::default(),
        )
    }

    // ---- Accessors ----

    pub fn store(&self) -> &Arc<dyn Store> {
        self.inner.arena.store()
    }

    pub fn arena(&self) -> &Arc<ContextArena> {
        &self.inner.arena
    }

    /// The long-lived root context every scratchpad commits through.
    pub fn shared_context(&self) -> &Context {
        &self.inner.shared
    }

    pub fn executor(&self) -> &Executor {
        self.inner.shared.executor()
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.inner.config
    }

    /// Resolve an encoded reference against this repository's store.
    pub fn object_ref(&self, encoded: &str) -> RepoResult<ObjectRef> {
        self.store().object_ref(encoded).map_err(classify)
    }

    // ---- Internals shared by the operation modules ----

    pub(crate) fn scratchpad(&self) -> ScratchpadManager<'_> {
        ScratchpadManager::new(&self.inner.shared)
    }

    pub(crate) fn author(&self, author: Option<TransactionAuthor>) -> Option<TransactionAuthor> {
        author.or_else(|| self.inner.config.default_author.clone())
    }

    /// Run `work` in a fresh read context that is released afterwards.
    pub(crate) async fn read_in<R, F>(&self, work: F) -> RepoResult<R>
    where
        F: FnOnce(&mut Workspace<'_>) -> RepoResult<R>,
    {
        let context = self.inner.shared.child(ContextKind::Read);
        context.perform(work).await
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("store", &self.store().store_id())
            .field("shared", &self.inner.shared.id())
            .field("contexts", &self.inner.arena.len())
            .finish()
    }
}

/// Decode the committed state of a reference staged in a scratchpad.
pub(crate) fn read_committed<M: FetchableModel>(
    ws: &mut Workspace<'_>,
    receipt: &CommitReceipt,
    staged: &ObjectRef,
) -> RepoResult<M> {
    let node = ws.object(&receipt.promote(staged))?;
    decode(&node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{item_schema, repository};

    #[tokio::test]
    async fn opening_creates_only_the_shared_context() {
        let repo = repository().await;
        assert_eq!(repo.arena().len(), 1);
        assert!(repo.shared_context().parent().is_none());
        assert_eq!(repo.shared_context().kind(), ContextKind::Shared);
    }

    #[tokio::test]
    async fn read_contexts_are_released() {
        let repo = repository().await;
        let id = repo
            .read_in(|ws| Ok(ws.id()))
            .await
            .unwrap();
        assert!(!repo.arena().contains(id));
        assert_eq!(repo.arena().len(), 1);
    }

    #[tokio::test]
    async fn default_author_applies_when_none_given() {
        let executor = Executor::current().unwrap();
        let repo = Repository::new(
            Arc::new(InMemoryStore::new(item_schema())),
            executor,
            RepositoryConfig::default().with_author("sync"),
        );
        assert_eq!(repo.author(None), Some(TransactionAuthor::new("sync")));
        assert_eq!(
            repo.author(Some("ui".into())),
            Some(TransactionAuthor::new("ui"))
        );
    }

    #[tokio::test]
    async fn clones_share_state() {
        let repo = repository().await;
        let clone = repo.clone();
        assert_eq!(repo.store().store_id(), clone.store().store_id());
        assert_eq!(repo.shared_context().id(), clone.shared_context().id());
    }
}
