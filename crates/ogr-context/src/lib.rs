//! Context hierarchy over an object graph store.
//!
//! A context is a node in a tree rooted at the store. Each context owns a
//! private working set guarded by its own serial queue; work submitted to a
//! context runs in submission order, and work on different contexts runs
//! concurrently. Contexts live in a [`ContextArena`] keyed by
//! [`ContextId`](ogr_types::ContextId) and refer to their parent by id only.
//!
//! Saving a context merges its pending changes into its parent, or commits
//! them to the store when the context is the root. Every successful save
//! raises a [`ChangeNotification`] through the arena's [`ChangeRouter`];
//! merges into a parent are routed only once the changes reach the store.
//!
//! # Lock order
//!
//! A context's queue is acquired before its parent's, all the way to the
//! root. Work on a context holds its own queue exclusively and its
//! ancestors' shared, so siblings run concurrently; only a save into the
//! parent holds the parent exclusively. No task ever waits on a child while
//! holding a parent, so queues cannot deadlock.

pub mod arena;
pub mod error;
pub mod executor;
pub mod notification;
pub mod workspace;

pub use arena::{Context, ContextArena, ContextKind};
pub use error::{ContextError, ContextResult};
pub use executor::Executor;
pub use notification::{
    ChangeFilter, ChangeNotification, ChangeRouter, ChangeStream, CommitTarget, ObserverId,
};
pub use workspace::{WorkingSet, Workspace};
