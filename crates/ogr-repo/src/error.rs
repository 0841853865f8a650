use thiserror::Error;
use tracing::trace;

use ogr_context::ContextError;
use ogr_store::StoreError;
use ogr_types::{ObjectRef, TypeError};

/// Every failure a repository caller can observe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// No matching node, or more than one where exactly one was required.
    #[error("not found")]
    NotFound,

    /// The node exists but is marked deleted.
    #[error("object flagged deleted")]
    FlaggedDeleted,

    /// The value carries no reference or encoded reference to resolve.
    #[error("value has no identity to resolve")]
    MissingIdentity,

    /// The encoded reference cannot be resolved against the store.
    #[error("invalid encoded reference: {0}")]
    InvalidEncodedReference(String),

    /// A fetched node does not have the expected shape.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("constraint violation on {entity}: {reason}")]
    ConstraintViolation { entity: String, reason: String },

    #[error("referential integrity violation: {from} -> {to}")]
    ReferentialIntegrityViolation { from: ObjectRef, to: ObjectRef },

    /// Unclassified underlying failure.
    #[error("{context}: {message}")]
    Unknown { context: String, message: String },
}

impl RepositoryError {
    pub fn unknown(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Unknown {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Map any lower-layer failure into the repository taxonomy.
pub fn classify(error: impl Into<RepositoryError>) -> RepositoryError {
    let classified = error.into();
    trace!(error = %classified, "classified error");
    classified
}

impl From<TypeError> for RepositoryError {
    fn from(error: TypeError) -> Self {
        match error {
            TypeError::Mismatch {
                attribute,
                expected,
                found,
            } => Self::TypeMismatch {
                expected: format!("{attribute}: {expected}"),
                found,
            },
            TypeError::MissingAttribute(attribute) => Self::TypeMismatch {
                expected: format!("{attribute}: present"),
                found: "missing".into(),
            },
            TypeError::InvalidEncodedRef { encoded, .. } => Self::InvalidEncodedReference(encoded),
            other => Self::unknown("type", other),
        }
    }
}

impl From<StoreError> for RepositoryError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(_) => Self::NotFound,
            StoreError::ConstraintViolation { entity, reason } => Self::ConstraintViolation {
                entity: entity.to_string(),
                reason,
            },
            StoreError::ReferentialIntegrity { from, to } => {
                Self::ReferentialIntegrityViolation { from, to }
            }
            StoreError::InvalidEncodedRef { encoded, .. } => Self::InvalidEncodedReference(encoded),
            StoreError::Type(error) => error.into(),
            other => Self::unknown("store", other),
        }
    }
}

impl From<ContextError> for RepositoryError {
    fn from(error: ContextError) -> Self {
        match error {
            ContextError::NotFound(_) => Self::NotFound,
            ContextError::FlaggedDeleted(_) => Self::FlaggedDeleted,
            ContextError::Store(error) => error.into(),
            ContextError::Type(error) => error.into(),
            other => Self::unknown("context", other),
        }
    }
}

/// One failed item of a non-atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure<I> {
    pub item: I,
    pub error: RepositoryError,
}

/// Result of a non-atomic batch: successes in input order, plus every item
/// that failed with its classified error.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome<S, I> {
    pub successes: Vec<S>,
    pub failures: Vec<BatchFailure<I>>,
}

impl<S, I> BatchOutcome<S, I> {
    pub fn new() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, item: I, result: RepoResult<S>) {
        match result {
            Ok(success) => self.successes.push(success),
            Err(error) => self.failures.push(BatchFailure { item, error }),
        }
    }

    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl<S, I> Default for BatchOutcome<S, I> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogr_types::{EntityName, StoreId};

    fn movie(row: u64) -> ObjectRef {
        ObjectRef::permanent(StoreId::new(), EntityName::new("Movie").unwrap(), row)
    }

    #[test]
    fn store_errors_classify() {
        assert_eq!(classify(StoreError::NotFound(movie(1))), RepositoryError::NotFound);
        assert!(matches!(
            classify(StoreError::ConstraintViolation {
                entity: EntityName::new("Movie").unwrap(),
                reason: "dup".into(),
            }),
            RepositoryError::ConstraintViolation { ref entity, .. } if entity == "Movie"
        ));
        assert!(matches!(
            classify(StoreError::ReferentialIntegrity {
                from: movie(1),
                to: movie(2),
            }),
            RepositoryError::ReferentialIntegrityViolation { .. }
        ));
        assert_eq!(
            classify(StoreError::InvalidEncodedRef {
                encoded: "x".into(),
                reason: "bad".into(),
            }),
            RepositoryError::InvalidEncodedReference("x".into())
        );
        assert!(matches!(
            classify(StoreError::Backend("disk".into())),
            RepositoryError::Unknown { ref context, .. } if context == "store"
        ));
    }

    #[test]
    fn context_errors_classify() {
        assert_eq!(classify(ContextError::NotFound(movie(1))), RepositoryError::NotFound);
        assert_eq!(
            classify(ContextError::FlaggedDeleted(movie(1))),
            RepositoryError::FlaggedDeleted
        );
        assert_eq!(
            classify(ContextError::Store(StoreError::NotFound(movie(1)))),
            RepositoryError::NotFound
        );
        assert!(matches!(
            classify(ContextError::NoRuntime),
            RepositoryError::Unknown { .. }
        ));
    }

    #[test]
    fn type_errors_classify() {
        let err = classify(TypeError::Mismatch {
            attribute: "n".into(),
            expected: "int".into(),
            found: "text".into(),
        });
        assert_eq!(
            err,
            RepositoryError::TypeMismatch {
                expected: "n: int".into(),
                found: "text".into(),
            }
        );
        assert!(matches!(
            classify(TypeError::MissingAttribute("n".into())),
            RepositoryError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn batch_outcome_records_in_order() {
        let mut outcome: BatchOutcome<i32, &str> = BatchOutcome::new();
        outcome.record("a", Ok(1));
        outcome.record("b", Err(RepositoryError::NotFound));
        outcome.record("c", Ok(3));
        assert_eq!(outcome.successes, vec![1, 3]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].item, "b");
        assert!(!outcome.is_complete_success());
    }

    proptest::proptest! {
        #[test]
        fn outcome_partitions_every_item(results in proptest::collection::vec(proptest::bool::ANY, 0..40)) {
            let mut outcome: BatchOutcome<usize, usize> = BatchOutcome::new();
            for (i, ok) in results.iter().enumerate() {
                let result = if *ok { Ok(i) } else { Err(RepositoryError::NotFound) };
                outcome.record(i, result);
            }
            let mut seen: Vec<usize> = outcome.successes.clone();
            seen.extend(outcome.failures.iter().map(|f| f.item));
            seen.sort_unstable();
            proptest::prop_assert_eq!(seen, (0..results.len()).collect::<Vec<_>>());
            proptest::prop_assert_eq!(outcome.is_complete_success(), results.iter().all(|ok| *ok));
        }
    }
}
