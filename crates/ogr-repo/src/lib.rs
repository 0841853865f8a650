//! Object graph repository.
//!
//! The main entry point for applications. Every mutation is staged in an
//! isolated scratchpad context and committed through the shared context in
//! one step, or rolled back as a whole. Reads run in short-lived read
//! contexts. Live subscriptions keep a read, fetch, count or aggregate
//! current as the store changes and deliver it over a cancellable channel.
//!
//! Callers only ever see [`RepositoryError`].

mod aggregate;
mod batch;
pub mod batch_request;
pub mod config;
mod create;
mod delete;
pub mod error;
pub mod model;
mod read;
pub mod repository;
pub mod scratchpad;
pub mod subscription;
mod update;

#[cfg(test)]
mod testing;

pub use batch_request::BatchRequestOutcome;
pub use config::RepositoryConfig;
pub use error::{classify, BatchFailure, BatchOutcome, RepoResult, RepositoryError};
pub use model::{
    EncodedManagedRef, FetchableModel, IdentifiedModel, ManagedRef, ReadableModel, WritableModel,
};
pub use repository::Repository;
pub use scratchpad::ScratchpadManager;
pub use subscription::{LiveStream, LiveThrowingStream};

// Re-export key types
pub use ogr_context::{Executor, Workspace};
pub use ogr_store::{
    AggregateFunction, AggregateRequest, EntitySchema, FetchRequest, InMemoryStore, Predicate,
    Schema, SortDescriptor, Store,
};
pub use ogr_types::{EntityName, Node, ObjectRef, TransactionAuthor, TypeError, Value};
