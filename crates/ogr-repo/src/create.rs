use ogr_types::TransactionAuthor;

use crate::error::RepoResult;
use crate::model::WritableModel;
use crate::repository::{read_committed, Repository};

impl Repository {
    /// Insert `item` as a new node and return it as committed, carrying its
    /// permanent reference.
    pub async fn create<M: WritableModel>(
        &self,
        item: &M,
        author: Option<TransactionAuthor>,
    ) -> RepoResult<M> {
        self.scratchpad()
            .run(
                self.author(author),
                |ws| Ok(item.to_node(ws)?.reference().clone()),
                |ws, receipt, staged| read_committed(ws, receipt, &staged),
            )
            .await
    }
}
