use std::collections::{BTreeMap, BTreeSet};

use ogr_types::{EntityName, Node};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// A set of attributes whose combined values must be unique per entity.
///
/// Nodes with a null value in any constrained attribute are exempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub attributes: Vec<String>,
}

impl UniqueConstraint {
    pub fn new<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }

    /// Index key of `node` under this constraint, or `None` if exempt.
    pub fn key(&self, node: &Node) -> Option<String> {
        let mut parts = Vec::with_capacity(self.attributes.len());
        for attribute in &self.attributes {
            let value = node.value(attribute);
            if value.is_null() {
                return None;
            }
            parts.push(value.constraint_key());
        }
        Some(parts.join("\u{1f}"))
    }

    pub fn describe(&self) -> String {
        self.attributes.join(", ")
    }
}

/// Declared shape of one entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: EntityName,
    #[serde(default)]
    pub unique: Vec<UniqueConstraint>,
    #[serde(default)]
    pub required: BTreeSet<String>,
}

impl EntitySchema {
    pub fn new(name: EntityName) -> Self {
        Self {
            name,
            unique: Vec::new(),
            required: BTreeSet::new(),
        }
    }

    pub fn unique<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique.push(UniqueConstraint::new(attributes));
        self
    }

    pub fn required(mut self, attribute: impl Into<String>) -> Self {
        self.required.insert(attribute.into());
        self
    }

    /// Check required attributes.
    pub fn validate(&self, node: &Node) -> StoreResult<()> {
        for attribute in &self.required {
            if node.value(attribute).is_null() {
                return Err(StoreError::ConstraintViolation {
                    entity: self.name.clone(),
                    reason: format!("required attribute '{attribute}' is missing"),
                });
            }
        }
        Ok(())
    }
}

/// The set of entities a store accepts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    entities: BTreeMap<EntityName, EntitySchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntitySchema) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn entity(&self, name: &EntityName) -> StoreResult<&EntitySchema> {
        self.entities
            .get(name)
            .ok_or_else(|| StoreError::UnknownEntity(name.clone()))
    }

    pub fn contains(&self, name: &EntityName) -> bool {
        self.entities.contains_key(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntitySchema> {
        self.entities.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogr_types::{ObjectRef, StoreId, Value};

    fn item() -> EntityName {
        EntityName::new("Item").unwrap()
    }

    fn node(attrs: &[(&str, Value)]) -> Node {
        let mut node = Node::new(ObjectRef::permanent(StoreId::new(), item(), 1));
        for (k, v) in attrs {
            node.set(*k, v.clone());
        }
        node
    }

    #[test]
    fn unique_key_combines_attributes() {
        let c = UniqueConstraint::new(["a", "b"]);
        let k1 = c.key(&node(&[("a", Value::Int(1)), ("b", Value::from("x"))]));
        let k2 = c.key(&node(&[("a", Value::Int(1)), ("b", Value::from("y"))]));
        assert!(k1.is_some());
        assert_ne!(k1, k2);
    }

    #[test]
    fn null_values_are_exempt() {
        let c = UniqueConstraint::new(["a"]);
        assert_eq!(c.key(&node(&[])), None);
    }

    #[test]
    fn required_attributes() {
        let schema = EntitySchema::new(item()).required("id");
        assert!(schema.validate(&node(&[("id", Value::Int(1))])).is_ok());
        assert!(matches!(
            schema.validate(&node(&[])),
            Err(StoreError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn unknown_entity() {
        let schema = Schema::new().with_entity(EntitySchema::new(item()));
        assert!(schema.contains(&item()));
        let other = EntityName::new("Other").unwrap();
        assert!(matches!(schema.entity(&other), Err(StoreError::UnknownEntity(_))));
    }

    #[test]
    fn schema_serde_roundtrip() {
        let schema = Schema::new().with_entity(EntitySchema::new(item()).unique(["id"]));
        let json = serde_json::to_string(&schema).unwrap();
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);
    }
}
