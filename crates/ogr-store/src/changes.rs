use std::collections::BTreeMap;

use ogr_types::{Node, ObjectRef};

/// Everything one context save pushes into the store.
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    /// New nodes, carrying temporary references.
    pub inserted: Vec<Node>,
    /// Full replacement state of existing nodes.
    pub updated: Vec<Node>,
    /// Nodes to remove.
    pub deleted: Vec<ObjectRef>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}

/// Result of a successful commit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Temporary reference to the permanent reference the store assigned.
    pub promotions: BTreeMap<ObjectRef, ObjectRef>,
    /// Permanent references of inserted nodes, in change-set order.
    pub inserted: Vec<ObjectRef>,
    pub updated: Vec<ObjectRef>,
    pub deleted: Vec<ObjectRef>,
}

impl CommitReceipt {
    /// The permanent form of `reference`; permanent references map to
    /// themselves.
    pub fn promote(&self, reference: &ObjectRef) -> ObjectRef {
        self.promotions
            .get(reference)
            .cloned()
            .unwrap_or_else(|| reference.clone())
    }
}
