use ogr_types::{Node, ObjectRef, StoreId, Value};

use crate::changes::{ChangeSet, CommitReceipt};
use crate::error::StoreResult;
use crate::request::{AggregateRequest, FetchRequest};
use crate::schema::Schema;

/// Object graph store.
///
/// All implementations must satisfy these invariants:
/// - The store never holds uncommitted state. Rolling back is a context
///   concern.
/// - `commit` is atomic: either every change in the set is applied or none.
/// - Permanent references are never reused, even after deletion.
/// - References issued by another store are never resolved.
pub trait Store: Send + Sync {
    /// Identity embedded in every reference this store issues.
    fn store_id(&self) -> StoreId;

    fn schema(&self) -> &Schema;

    /// Read a node by reference.
    ///
    /// Returns `Ok(None)` if the node does not exist (including temporary
    /// references, which the store never holds).
    fn read(&self, reference: &ObjectRef) -> StoreResult<Option<Node>>;

    /// Nodes matching `request`, filtered, sorted and limited.
    fn fetch(&self, request: &FetchRequest) -> StoreResult<Vec<Node>>;

    /// Number of nodes matching `request`, ignoring its limit.
    ///
    /// Default implementation fetches. Backends may override.
    fn count(&self, request: &FetchRequest) -> StoreResult<usize> {
        let unlimited = request.clone().without_limit();
        self.fetch(&unlimited).map(|nodes| nodes.len())
    }

    /// Evaluate an aggregate over the nodes matching its fetch request.
    fn aggregate(&self, request: &AggregateRequest) -> StoreResult<Value> {
        let nodes = self.fetch(request.fetch())?;
        request.evaluate(&nodes)
    }

    /// Apply a change set atomically.
    fn commit(&self, changes: &ChangeSet) -> StoreResult<CommitReceipt>;

    /// Resolve an encoded reference issued by this store.
    ///
    /// Fails with `InvalidEncodedRef` for malformed input, temporary
    /// references, foreign stores and undeclared entities. Existence is not
    /// checked.
    fn object_ref(&self, encoded: &str) -> StoreResult<ObjectRef>;
}
