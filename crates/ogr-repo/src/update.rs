use ogr_context::Workspace;
use ogr_types::{Node, ObjectRef, TransactionAuthor};

use crate::error::RepoResult;
use crate::model::{node_of, ReadableModel, WritableModel};
use crate::repository::{read_committed, Repository};

/// Write `item` over `node` and stage the result.
pub(crate) fn stage_update<M: WritableModel>(
    ws: &mut Workspace<'_>,
    item: &M,
    mut node: Node,
) -> RepoResult<ObjectRef> {
    item.apply_to(&mut node)?;
    let reference = node.reference().clone();
    ws.update(node)?;
    Ok(reference)
}

impl Repository {
    /// Write `item` over the node backing it and return the committed state.
    pub async fn update<M: ReadableModel + WritableModel>(
        &self,
        item: &M,
        author: Option<TransactionAuthor>,
    ) -> RepoResult<M> {
        self.scratchpad()
            .run(
                self.author(author),
                |ws| {
                    let node = item.locate(ws)?;
                    stage_update(ws, item, node)
                },
                |ws, receipt, staged| read_committed(ws, receipt, &staged),
            )
            .await
    }

    /// Write `item` over the node at `reference`.
    pub async fn update_by_ref<M: WritableModel>(
        &self,
        reference: &ObjectRef,
        item: &M,
        author: Option<TransactionAuthor>,
    ) -> RepoResult<M> {
        self.scratchpad()
            .run(
                self.author(author),
                |ws| {
                    let node = node_of::<M>(ws, reference)?;
                    stage_update(ws, item, node)
                },
                |ws, receipt, staged| read_committed(ws, receipt, &staged),
            )
            .await
    }

    pub async fn update_by_encoded<M: WritableModel>(
        &self,
        encoded: &str,
        item: &M,
        author: Option<TransactionAuthor>,
    ) -> RepoResult<M> {
        let reference = self.object_ref(encoded)?;
        self.update_by_ref(&reference, item, author).await
    }
}
