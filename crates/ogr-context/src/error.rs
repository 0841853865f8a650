use ogr_store::StoreError;
use ogr_types::{ContextId, ObjectRef, TypeError};

/// Errors produced by context operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContextError {
    /// The context (or one of its ancestors) has been released.
    #[error("context released: {0}")]
    Released(ContextId),

    /// A parent-level operation was requested on a root context.
    #[error("context {0} has no parent")]
    NoParent(ContextId),

    /// A store commit was requested on a context that is not the root.
    #[error("context {0} is not the root and cannot commit to the store")]
    NotRoot(ContextId),

    /// No tokio runtime is available to run context work on.
    #[error("no async runtime available")]
    NoRuntime,

    /// The object is not registered anywhere in the context chain or store.
    #[error("object not found: {0:?}")]
    NotFound(ObjectRef),

    /// The object exists but is flagged deleted in this context chain.
    #[error("object flagged deleted: {0:?}")]
    FlaggedDeleted(ObjectRef),

    /// A temporary reference allocated by another context was staged here.
    #[error("temporary reference not allocated by this context: {0:?}")]
    NotOwned(ObjectRef),

    /// The underlying store rejected the operation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),
}

/// Convenience alias used throughout the context crate.
pub type ContextResult<T> = std::result::Result<T, ContextError>;
