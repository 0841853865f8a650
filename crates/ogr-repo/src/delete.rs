use ogr_types::{ObjectRef, TransactionAuthor};

use crate::error::RepoResult;
use crate::model::ReadableModel;
use crate::repository::Repository;

impl Repository {
    /// Delete the node backing `item`.
    pub async fn delete<M: ReadableModel>(
        &self,
        item: &M,
        author: Option<TransactionAuthor>,
    ) -> RepoResult<()> {
        self.scratchpad()
            .run(
                self.author(author),
                |ws| {
                    let node = item.locate(ws)?;
                    ws.delete(node.reference())?;
                    Ok(())
                },
                |_, _, ()| Ok(()),
            )
            .await
    }

    pub async fn delete_by_ref(
        &self,
        reference: &ObjectRef,
        author: Option<TransactionAuthor>,
    ) -> RepoResult<()> {
        self.scratchpad()
            .run(
                self.author(author),
                |ws| Ok(ws.delete(reference)?),
                |_, _, ()| Ok(()),
            )
            .await
    }

    pub async fn delete_by_encoded(
        &self,
        encoded: &str,
        author: Option<TransactionAuthor>,
    ) -> RepoResult<()> {
        let reference = self.object_ref(encoded)?;
        self.delete_by_ref(&reference, author).await
    }
}
