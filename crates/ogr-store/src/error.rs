use ogr_types::{EntityName, ObjectRef, TypeError};

/// Errors from store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The node addressed by a commit does not exist.
    #[error("object not found: {0}")]
    NotFound(ObjectRef),

    /// A uniqueness constraint or required attribute was violated.
    #[error("constraint violation on {entity}: {reason}")]
    ConstraintViolation { entity: EntityName, reason: String },

    /// A relationship points at a node that does not exist, or a delete
    /// would leave a dangling relationship.
    #[error("referential integrity violation: {from} -> {to}")]
    ReferentialIntegrity { from: ObjectRef, to: ObjectRef },

    /// An encoded reference cannot be resolved against this store.
    #[error("invalid encoded reference {encoded}: {reason}")]
    InvalidEncodedRef { encoded: String, reason: String },

    /// The entity is not declared in the store schema.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityName),

    /// A temporary reference reached the store outside the change set that
    /// could promote it.
    #[error("temporary reference cannot be stored: {0:?}")]
    TemporaryReference(ObjectRef),

    /// Attribute decode failure while evaluating a request.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// The backend itself failed.
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
