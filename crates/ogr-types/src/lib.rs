//! Foundation types for the object graph repository (OGR).
//!
//! This crate provides the identity and value types shared by every other
//! OGR crate. It has no knowledge of contexts or stores beyond the
//! identifiers they hand out.
//!
//! # Key Types
//!
//! - [`ObjectRef`] — Store-wide identity of a graph node, temporary until first commit
//! - [`EntityName`] — Validated node type name
//! - [`Value`] — Typed attribute value, decoded through [`FromValue`]
//! - [`Node`] — A graph node: reference, attributes, deletion flag
//! - [`StoreId`] / [`ContextId`] — Identifiers for stores and contexts
//! - [`TransactionAuthor`] — Change attribution tag

pub mod entity;
pub mod error;
pub mod identity;
pub mod node;
pub mod object;
pub mod value;

pub use entity::EntityName;
pub use error::TypeError;
pub use identity::{ContextId, StoreId, TransactionAuthor};
pub use node::Node;
pub use object::{ObjectRef, RefKey, REF_SCHEME};
pub use value::{FromValue, Value};
