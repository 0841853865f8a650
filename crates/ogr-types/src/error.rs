use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid entity name {name:?}: {reason}")]
    InvalidEntityName { name: String, reason: String },

    #[error("invalid encoded reference {encoded:?}: {reason}")]
    InvalidEncodedRef { encoded: String, reason: String },

    #[error("type mismatch for {attribute}: expected {expected}, found {found}")]
    Mismatch {
        attribute: String,
        expected: String,
        found: String,
    },

    #[error("missing attribute: {0}")]
    MissingAttribute(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
