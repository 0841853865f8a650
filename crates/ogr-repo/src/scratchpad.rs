//! Scratchpad transactions.
//!
//! A mutation is staged in a fresh child of the shared context, then merged
//! into the shared context and committed to the store while the shared
//! context's queue is held. Two scratchpads can stage concurrently, but their
//! commits never interleave. A failure at any step discards the scratchpad
//! and rolls the shared context back, so a failed mutation leaves no trace.

use tracing::debug;

use ogr_context::{Context, ContextKind, Workspace};
use ogr_store::CommitReceipt;
use ogr_types::TransactionAuthor;

use crate::error::{classify, RepoResult};

/// Runs mutations in scratchpad contexts under one parent.
#[derive(Debug)]
pub struct ScratchpadManager<'a> {
    parent: &'a Context,
}

impl<'a> ScratchpadManager<'a> {
    pub fn new(parent: &'a Context) -> Self {
        Self { parent }
    }

    /// Stage a mutation and commit it.
    ///
    /// `stage` runs on the scratchpad's queue and returns whatever it needs
    /// to hand on, usually the temporary references it created. After a
    /// successful commit those references have been promoted in the
    /// scratchpad, and `finish` receives the commit receipt to resolve
    /// them to their permanent form.
    pub async fn run<S, T, F, G>(
        &self,
        author: Option<TransactionAuthor>,
        stage: F,
        finish: G,
    ) -> RepoResult<T>
    where
        F: FnOnce(&mut Workspace<'_>) -> RepoResult<S>,
        G: FnOnce(&mut Workspace<'_>, &CommitReceipt, S) -> RepoResult<T>,
    {
        let scratchpad = self.parent.child(ContextKind::Scratchpad);
        let staged = scratchpad
            .perform(|ws| {
                ws.set_author(author.clone());
                stage(ws)
            })
            .await;
        let staged = match staged {
            Ok(staged) => staged,
            Err(error) => {
                self.abandon(&scratchpad).await;
                debug!(scratchpad = %scratchpad.id(), %error, "scratchpad rolled back");
                return Err(error);
            }
        };

        let result = scratchpad
            .perform_with_parent(|child, parent| {
                let merged = match child.save_into(parent) {
                    Ok(merged) => merged,
                    Err(error) => {
                        child.reset();
                        parent.rollback();
                        return Err(classify(error));
                    }
                };

                parent.set_author(author.clone());
                let committed = parent.commit_to_store();
                parent.set_author(None);

                match committed {
                    Ok((receipt, _)) => {
                        child.promote(&receipt);
                        finish(child, &receipt, staged)
                    }
                    Err(error) => {
                        if let Some(merged) = &merged {
                            parent.discard_inserted(&merged.inserted);
                        }
                        parent.rollback();
                        child.reset();
                        Err(classify(error))
                    }
                }
            })
            .await;

        match &result {
            Ok(_) => debug!(scratchpad = %scratchpad.id(), author = ?author, "scratchpad committed"),
            Err(error) => debug!(scratchpad = %scratchpad.id(), %error, "scratchpad commit failed"),
        }
        result
    }

    async fn abandon(&self, scratchpad: &Context) {
        let _ = scratchpad.reset().await;
        let _ = self.parent.rollback().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepositoryError;
    use crate::testing::{repository, Item};
    use crate::model::{decode, FetchableModel, WritableModel};
    use crate::repository::read_committed;
    use ogr_context::{ChangeFilter, CommitTarget};

    #[tokio::test]
    async fn committed_references_are_permanent() {
        let repo = repository().await;
        let manager = ScratchpadManager::new(repo.shared_context());
        let (temporary, item) = manager
            .run(
                None,
                |ws| Ok(Item::new(1, 10).to_node(ws)?.reference().clone()),
                |ws, receipt, temporary| {
                    let permanent = receipt.promote(&temporary);
                    let item: Item = decode(&ws.object(&permanent)?)?;
                    Ok((temporary, item))
                },
            )
            .await
            .unwrap();
        assert!(temporary.is_temporary());
        let reference = item.reference.unwrap();
        assert!(!reference.is_temporary());
        assert_eq!(repo.arena().len(), 1);
    }

    #[tokio::test]
    async fn references_to_new_nodes_are_promoted_in_attributes() {
        let repo = repository().await;
        let manager = ScratchpadManager::new(repo.shared_context());
        let child = manager
            .run(
                None,
                |ws| {
                    let parent = Item::new(1, 0).to_node(ws)?;
                    let child = Item::new(2, 0)
                        .with_parent(Some(parent.reference().clone()))
                        .to_node(ws)?;
                    Ok(child.reference().clone())
                },
                |ws, receipt, staged| read_committed::<Item>(ws, receipt, &staged),
            )
            .await
            .unwrap();
        let parent_ref = child.parent.clone().unwrap();
        assert!(!parent_ref.is_temporary());
        let parent: Item = repo.read_by_ref(&parent_ref).await.unwrap();
        assert_eq!(parent.id, 1);
    }

    #[tokio::test]
    async fn stage_failure_leaves_nothing_behind() {
        let repo = repository().await;
        let manager = ScratchpadManager::new(repo.shared_context());
        let err = manager
            .run(
                None,
                |ws| {
                    Item::new(1, 10).to_node(ws)?;
                    Err::<(), _>(RepositoryError::NotFound)
                },
                |_, _, ()| Ok(()),
            )
            .await
            .unwrap_err();
        assert_eq!(err, RepositoryError::NotFound);
        assert_eq!(repo.count(&Item::fetch_request().unwrap()).await.unwrap(), 0);
        let dirty = repo
            .shared_context()
            .perform(|ws| Ok::<_, RepositoryError>(ws.has_changes()))
            .await
            .unwrap();
        assert!(!dirty);
    }

    #[tokio::test]
    async fn commit_failure_rolls_back_the_shared_context() {
        let repo = repository().await;
        repo.create(&Item::new(1, 10), None).await.unwrap();

        let manager = ScratchpadManager::new(repo.shared_context());
        let err = manager
            .run(
                None,
                |ws| {
                    Item::new(2, 20).to_node(ws)?;
                    Item::new(1, 30).to_node(ws)?;
                    Ok(())
                },
                |_, _, ()| Ok(()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ConstraintViolation { .. }));

        let dirty = repo
            .shared_context()
            .perform(|ws| Ok::<_, RepositoryError>(ws.has_changes()))
            .await
            .unwrap();
        assert!(!dirty);
        assert_eq!(repo.count(&Item::fetch_request().unwrap()).await.unwrap(), 1);
        assert_eq!(repo.arena().len(), 1);
    }

    #[tokio::test]
    async fn author_is_carried_and_cleared() {
        let repo = repository().await;
        let (_, mut changes) = repo.arena().router().subscribe(ChangeFilter::default());
        repo.create(&Item::new(1, 10), Some("importer".into()))
            .await
            .unwrap();

        let mut seen_store_commit = false;
        while let Ok(notification) = changes.try_recv() {
            assert_eq!(notification.author, Some(TransactionAuthor::new("importer")));
            seen_store_commit |= notification.target == CommitTarget::Store;
        }
        assert!(seen_store_commit);

        let author = repo
            .shared_context()
            .perform(|ws| Ok::<_, RepositoryError>(ws.author().cloned()))
            .await
            .unwrap();
        assert!(author.is_none());
    }

    #[tokio::test]
    async fn concurrent_creates_both_land() {
        let repo = repository().await;
        let (first, second) = (Item::new(1, 1), Item::new(2, 2));
        let (a, b) = tokio::join!(repo.create(&first, None), repo.create(&second, None));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.reference, b.reference);
        assert_eq!(repo.count(&Item::fetch_request().unwrap()).await.unwrap(), 2);
    }

    async fn visible_items(manager: &ScratchpadManager<'_>) -> usize {
        manager
            .run(
                None,
                |ws| Ok(ws.count(&Item::fetch_request()?)?),
                |_, _, seen| Ok(seen),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn staged_changes_are_invisible_until_committed() {
        let repo = repository().await;
        let manager = ScratchpadManager::new(repo.shared_context());

        let pending = repo.shared_context().child(ContextKind::Scratchpad);
        pending
            .perform(|ws| Item::new(1, 10).to_node(ws).map(|_| ()))
            .await
            .unwrap();
        assert_eq!(visible_items(&manager).await, 0);

        pending
            .perform_with_parent(|child, parent| {
                child.save_into(parent)?;
                parent.commit_to_store()?;
                Ok::<_, RepositoryError>(())
            })
            .await
            .unwrap();
        assert_eq!(visible_items(&manager).await, 1);
    }
}
