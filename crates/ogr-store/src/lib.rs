//! Store contract and the reference in-memory object graph store.
//!
//! The store is the single source of truth beneath every context. It is only
//! ever mutated through [`Store::commit`], which applies a [`ChangeSet`]
//! atomically or not at all.
//!
//! # Descriptors
//!
//! - [`FetchRequest`] -- entity, opaque [`Predicate`], sort and limit
//! - [`AggregateRequest`] -- an [`AggregateFunction`] over one attribute of
//!   a fetch result
//!
//! # Backends
//!
//! - [`InMemoryStore`] -- `RwLock`-guarded rows with uniqueness and
//!   referential-integrity checks, for tests, benchmarks and embedding
//!
//! # Commit rules
//!
//! 1. Inserted nodes arrive with temporary references and leave with
//!    permanent ones; the mapping is reported in the [`CommitReceipt`].
//! 2. `Ref` attributes pointing at nodes inserted in the same change set are
//!    rewritten to the permanent reference.
//! 3. Any violation rejects the whole change set; nothing is applied.

pub mod changes;
pub mod error;
pub mod memory;
pub mod request;
pub mod schema;
pub mod traits;

pub use changes::{ChangeSet, CommitReceipt};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use request::{AggregateFunction, AggregateRequest, FetchRequest, Predicate, SortDescriptor};
pub use schema::{EntitySchema, Schema, UniqueConstraint};
pub use traits::Store;
