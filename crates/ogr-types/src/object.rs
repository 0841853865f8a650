use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::EntityName;
use crate::error::TypeError;
use crate::identity::{ContextId, StoreId};

/// URI scheme of encoded object references.
pub const REF_SCHEME: &str = "ogr";

/// Key part of an [`ObjectRef`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RefKey {
    /// Assigned by a context on insert. Valid only inside the context chain
    /// that created it, until the first successful store commit.
    Temporary { context: ContextId, seq: u64 },
    /// Assigned by the store on commit. Never changes afterwards.
    Permanent(u64),
}

/// Store-wide identity of a graph node.
///
/// A reference is independent of the context that observed it: the same
/// permanent reference names the same node in every context over the same
/// store.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    store: StoreId,
    entity: EntityName,
    key: RefKey,
}

impl ObjectRef {
    /// A permanent reference to row `row` of `entity`.
    pub fn permanent(store: StoreId, entity: EntityName, row: u64) -> Self {
        Self {
            store,
            entity,
            key: RefKey::Permanent(row),
        }
    }

    /// A temporary reference allocated by `context`.
    pub fn temporary(store: StoreId, entity: EntityName, context: ContextId, seq: u64) -> Self {
        Self {
            store,
            entity,
            key: RefKey::Temporary { context, seq },
        }
    }

    pub fn store(&self) -> StoreId {
        self.store
    }

    pub fn entity(&self) -> &EntityName {
        &self.entity
    }

    pub fn key(&self) -> RefKey {
        self.key
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self.key, RefKey::Temporary { .. })
    }

    /// The store row, if this reference is permanent.
    pub fn row(&self) -> Option<u64> {
        match self.key {
            RefKey::Permanent(row) => Some(row),
            RefKey::Temporary { .. } => None,
        }
    }

    /// URL-safe encoded form, e.g. `ogr://<store>/Movie/p42`.
    pub fn encode(&self) -> String {
        let key = match self.key {
            RefKey::Permanent(row) => format!("p{row}"),
            RefKey::Temporary { context, seq } => format!("t{}-{seq}", context.as_u64()),
        };
        format!("{REF_SCHEME}://{}/{}/{key}", self.store, self.entity)
    }

    /// Parse an encoded reference.
    ///
    /// This only checks syntax. Whether the reference belongs to a given
    /// store is the store's decision.
    pub fn decode(encoded: &str) -> Result<Self, TypeError> {
        let invalid = |reason: &str| TypeError::InvalidEncodedRef {
            encoded: encoded.to_string(),
            reason: reason.to_string(),
        };

        let rest = encoded
            .strip_prefix(REF_SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(|| invalid("missing ogr:// scheme"))?;

        let mut parts = rest.split('/');
        let (store, entity, key) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(s), Some(e), Some(k), None) => (s, e, k),
            _ => return Err(invalid("expected <store>/<entity>/<key>")),
        };

        let store = StoreId::parse(store).map_err(|_| invalid("store is not a UUID"))?;
        let entity = EntityName::new(entity).map_err(|_| invalid("invalid entity name"))?;

        let key = if let Some(row) = key.strip_prefix('p') {
            let row = row.parse::<u64>().map_err(|_| invalid("row is not a number"))?;
            RefKey::Permanent(row)
        } else if let Some(temp) = key.strip_prefix('t') {
            let (context, seq) = temp
                .split_once('-')
                .ok_or_else(|| invalid("temporary key must be t<context>-<seq>"))?;
            let context = context
                .parse::<u64>()
                .map_err(|_| invalid("context is not a number"))?;
            let seq = seq.parse::<u64>().map_err(|_| invalid("seq is not a number"))?;
            RefKey::Temporary {
                context: ContextId::from_raw(context),
                seq,
            }
        } else {
            return Err(invalid("key must start with 'p' or 't'"));
        };

        Ok(Self { store, entity, key })
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            RefKey::Permanent(row) => write!(f, "ObjectRef({}/p{row})", self.entity),
            RefKey::Temporary { context, seq } => {
                write!(f, "ObjectRef({}/t{}-{seq})", self.entity, context.as_u64())
            }
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
