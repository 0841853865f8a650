use ogr_context::{ChangeFilter, ChangeNotification};
use ogr_types::{ContextId, EntityName, ObjectRef};

use crate::error::RepositoryError;

/// What a subscription watches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Target {
    /// One node.
    Object(ObjectRef),
    /// A fetch, count or aggregate over one entity.
    Query(EntityName),
}

/// How a change notification bears on a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Relevance {
    Irrelevant,
    Recompute,
    /// The watched node was deleted.
    Deleted,
}

impl Target {
    /// Observer filter: saves of `origins` touching the target.
    pub(crate) fn filter(&self, origins: Vec<ContextId>) -> ChangeFilter {
        let mut filter = ChangeFilter {
            origins: Some(origins),
            ..Default::default()
        };
        match self {
            Self::Object(reference) => filter.refs = Some(vec![reference.clone()]),
            Self::Query(entity) => filter.entities = Some(vec![entity.clone()]),
        }
        filter
    }

    /// Queries recompute on any change to their entity, whether or not the
    /// changed node matches the predicate.
    pub(crate) fn relevance(&self, notification: &ChangeNotification) -> Relevance {
        match self {
            Self::Object(reference) if notification.deletes(reference) => Relevance::Deleted,
            Self::Object(reference) if notification.touches(reference) => Relevance::Recompute,
            Self::Query(entity) if notification.touches_entity(entity) => Relevance::Recompute,
            _ => Relevance::Irrelevant,
        }
    }

    /// Whether `error` ends the subscription regardless of flavor.
    pub(crate) fn is_terminal(&self, error: &RepositoryError) -> bool {
        matches!(self, Self::Object(_))
            && matches!(
                error,
                RepositoryError::NotFound | RepositoryError::FlaggedDeleted
            )
    }
}
