//! Batch operations.
//!
//! Non-atomic batches run the single-item operation once per item, in input
//! order; a failed item is recorded and its siblings carry on. Atomic batches
//! stage every item in one scratchpad (or read every item in one read
//! context) and either commit everything or nothing. Empty input returns
//! immediately without creating a context.

use ogr_types::{ObjectRef, TransactionAuthor};

use crate::error::{BatchOutcome, RepoResult};
use crate::model::{decode, node_of, FetchableModel, ReadableModel, WritableModel};
use crate::repository::{read_committed, Repository};
use crate::update::stage_update;

impl Repository {
    // ---- Non-atomic ----

    pub async fn create_batch<M: WritableModel + Clone>(
        &self,
        items: &[M],
        author: Option<TransactionAuthor>,
    ) -> BatchOutcome<M, M> {
        let mut outcome = BatchOutcome::new();
        for item in items {
            let result = self.create(item, author.clone()).await;
            outcome.record(item.clone(), result);
        }
        outcome
    }

    pub async fn read_batch<M: ReadableModel + Clone>(&self, items: &[M]) -> BatchOutcome<M, M> {
        let mut outcome = BatchOutcome::new();
        for item in items {
            let result = self.read(item).await;
            outcome.record(item.clone(), result);
        }
        outcome
    }

    pub async fn read_batch_by_refs<M: FetchableModel>(
        &self,
        references: &[ObjectRef],
    ) -> BatchOutcome<M, ObjectRef> {
        let mut outcome = BatchOutcome::new();
        for reference in references {
            let result = self.read_by_ref(reference).await;
            outcome.record(reference.clone(), result);
        }
        outcome
    }

    pub async fn update_batch<M: ReadableModel + WritableModel + Clone>(
        &self,
        items: &[M],
        author: Option<TransactionAuthor>,
    ) -> BatchOutcome<M, M> {
        let mut outcome = BatchOutcome::new();
        for item in items {
            let result = self.update(item, author.clone()).await;
            outcome.record(item.clone(), result);
        }
        outcome
    }

    /// Successes are the deleted items as given.
    pub async fn delete_batch<M: ReadableModel + Clone>(
        &self,
        items: &[M],
        author: Option<TransactionAuthor>,
    ) -> BatchOutcome<M, M> {
        let mut outcome = BatchOutcome::new();
        for item in items {
            let result = self.delete(item, author.clone()).await.map(|()| item.clone());
            outcome.record(item.clone(), result);
        }
        outcome
    }

    pub async fn delete_batch_by_refs(
        &self,
        references: &[ObjectRef],
        author: Option<TransactionAuthor>,
    ) -> BatchOutcome<ObjectRef, ObjectRef> {
        let mut outcome = BatchOutcome::new();
        for reference in references {
            let result = self
                .delete_by_ref(reference, author.clone())
                .await
                .map(|()| reference.clone());
            outcome.record(reference.clone(), result);
        }
        outcome
    }

    // ---- Atomic ----

    pub async fn create_atomically<M: WritableModel>(
        &self,
        items: &[M],
        author: Option<TransactionAuthor>,
    ) -> RepoResult<Vec<M>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        self.scratchpad()
            .run(
                self.author(author),
                |ws| {
                    items
                        .iter()
                        .map(|item| -> RepoResult<ObjectRef> {
                            Ok(item.to_node(ws)?.reference().clone())
                        })
                        .collect::<RepoResult<Vec<_>>>()
                },
                |ws, receipt, staged| {
                    staged
                        .iter()
                        .map(|reference| read_committed::<M>(ws, receipt, reference))
                        .collect()
                },
            )
            .await
    }

    pub async fn read_atomically<M: ReadableModel>(&self, items: &[M]) -> RepoResult<Vec<M>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        self.read_in(|ws| {
            items
                .iter()
                .map(|item| decode::<M>(&item.locate(ws)?))
                .collect()
        })
        .await
    }

    pub async fn read_atomically_by_refs<M: FetchableModel>(
        &self,
        references: &[ObjectRef],
    ) -> RepoResult<Vec<M>> {
        if references.is_empty() {
            return Ok(Vec::new());
        }
        self.read_in(|ws| {
            references
                .iter()
                .map(|reference| decode::<M>(&node_of::<M>(ws, reference)?))
                .collect()
        })
        .await
    }

    pub async fn update_atomically<M: ReadableModel + WritableModel>(
        &self,
        items: &[M],
        author: Option<TransactionAuthor>,
    ) -> RepoResult<Vec<M>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        self.scratchpad()
            .run(
                self.author(author),
                |ws| {
                    items
                        .iter()
                        .map(|item| -> RepoResult<ObjectRef> {
                            let node = item.locate(ws)?;
                            stage_update(ws, item, node)
                        })
                        .collect::<RepoResult<Vec<_>>>()
                },
                |ws, receipt, staged| {
                    staged
                        .iter()
                        .map(|reference| read_committed::<M>(ws, receipt, reference))
                        .collect()
                },
            )
            .await
    }

    pub async fn delete_atomically<M: ReadableModel>(
        &self,
        items: &[M],
        author: Option<TransactionAuthor>,
    ) -> RepoResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.scratchpad()
            .run(
                self.author(author),
                |ws| {
                    for item in items {
                        let node = item.locate(ws)?;
                        ws.delete(node.reference())?;
                    }
                    Ok(())
                },
                |_, _, ()| Ok(()),
            )
            .await
    }

    pub async fn delete_atomically_by_refs(
        &self,
        references: &[ObjectRef],
        author: Option<TransactionAuthor>,
    ) -> RepoResult<()> {
        if references.is_empty() {
            return Ok(());
        }
        self.scratchpad()
            .run(
                self.author(author),
                |ws| {
                    for reference in references {
                        ws.delete(reference)?;
                    }
                    Ok(())
                },
                |_, _, ()| Ok(()),
            )
            .await
    }
}
