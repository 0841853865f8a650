use ogr_context::Workspace;
use ogr_store::{AggregateRequest, FetchRequest};
use ogr_types::Value;

use crate::error::{RepoResult, RepositoryError};
use crate::model::{decode, FetchableModel};
use crate::repository::Repository;

/// Fetch and decode as `M`. The request must select `M`'s entity.
pub(crate) fn fetch_models<M: FetchableModel>(
    ws: &mut Workspace<'_>,
    request: &FetchRequest,
) -> RepoResult<Vec<M>> {
    if request.entity().as_str() != M::ENTITY {
        return Err(RepositoryError::TypeMismatch {
            expected: M::ENTITY.to_string(),
            found: request.entity().to_string(),
        });
    }
    ws.fetch(request)?.iter().map(decode::<M>).collect()
}

impl Repository {
    pub async fn fetch<M: FetchableModel>(&self, request: &FetchRequest) -> RepoResult<Vec<M>> {
        self.read_in(|ws| fetch_models(ws, request)).await
    }

    /// Number of nodes `request` selects, ignoring its limit.
    pub async fn count(&self, request: &FetchRequest) -> RepoResult<usize> {
        self.read_in(|ws| Ok(ws.count(request)?)).await
    }

    /// Evaluate an aggregate. Empty selections give `0` for count and sum
    /// and `Null` for average, min and max.
    pub async fn aggregate(&self, request: &AggregateRequest) -> RepoResult<Value> {
        self.read_in(|ws| Ok(ws.aggregate(request)?)).await
    }

    /// Evaluate an aggregate per value of its grouping attribute, ordered by
    /// group key.
    pub async fn aggregate_groups(&self, request: &AggregateRequest) -> RepoResult<Vec<(Value, Value)>> {
        self.read_in(|ws| Ok(ws.aggregate_groups(request)?)).await
    }
}
