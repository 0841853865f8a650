use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::EntityName;
use crate::error::TypeError;
use crate::object::ObjectRef;
use crate::value::{FromValue, Value};

/// A record in a context's working set.
///
/// Nodes are plain data: contexts hand out clones and take them back on
/// write, so a node held by a caller is never mutated behind its back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    reference: ObjectRef,
    attributes: BTreeMap<String, Value>,
    deleted: bool,
}

impl Node {
    /// A node with no attributes.
    pub fn new(reference: ObjectRef) -> Self {
        Self {
            reference,
            attributes: BTreeMap::new(),
            deleted: false,
        }
    }

    pub fn with_attributes(reference: ObjectRef, attributes: BTreeMap<String, Value>) -> Self {
        Self {
            reference,
            attributes,
            deleted: false,
        }
    }

    pub fn reference(&self) -> &ObjectRef {
        &self.reference
    }

    pub fn entity(&self) -> &EntityName {
        self.reference.entity()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Flag the node deleted. There is no way to clear the flag.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Raw attribute value; `Value::Null` when absent.
    pub fn value(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.attributes.get(name).unwrap_or(&NULL)
    }

    /// Typed attribute read. Absent attributes decode from `Value::Null`,
    /// so only `Option<T>` targets accept them.
    pub fn get<T: FromValue>(&self, name: &str) -> Result<T, TypeError> {
        match self.attributes.get(name) {
            Some(value) => T::from_value(name, value),
            None => T::from_value(name, &Value::Null)
                .map_err(|_| TypeError::MissingAttribute(name.to_string())),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    /// Rewrite the node's own reference and every `Value::Ref` attribute
    /// through `map`. Used when temporary references become permanent.
    pub fn remap_refs(&mut self, map: impl Fn(&ObjectRef) -> Option<ObjectRef>) {
        if let Some(new) = map(&self.reference) {
            self.reference = new;
        }
        for value in self.attributes.values_mut() {
            if let Value::Ref(r) = value {
                if let Some(new) = map(r) {
                    *r = new;
                }
            }
        }
    }

    /// References held in attributes (outgoing relationships).
    pub fn outgoing_refs(&self) -> impl Iterator<Item = &ObjectRef> {
        self.attributes.values().filter_map(Value::as_object_ref)
    }
}
