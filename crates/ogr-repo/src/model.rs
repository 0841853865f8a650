//! Mapping between application models and graph nodes.
//!
//! A model type describes which entity it lives in and how to decode itself
//! from a node ([`FetchableModel`]), how to write itself into one
//! ([`WritableModel`]) and how to find the node that backs a given value
//! ([`ReadableModel`]). The free functions at the bottom implement the usual
//! ways of locating: by identity attribute, by reference, or by encoded
//! reference.

use std::fmt::Debug;

use ogr_context::Workspace;
use ogr_store::{FetchRequest, Predicate};
use ogr_types::{EntityName, Node, ObjectRef, TypeError, Value};

use crate::error::{classify, RepoResult, RepositoryError};

/// A model that can be decoded from nodes of one entity.
pub trait FetchableModel: Sized {
    /// Entity the model's nodes belong to.
    const ENTITY: &'static str;

    fn from_node(node: &Node) -> Result<Self, TypeError>;

    fn entity() -> RepoResult<EntityName> {
        EntityName::new(Self::ENTITY).map_err(classify)
    }

    /// A request selecting every node of the model's entity.
    fn fetch_request() -> RepoResult<FetchRequest> {
        Ok(FetchRequest::new(Self::entity()?))
    }
}

/// A model that can write its attributes into a node.
pub trait WritableModel: FetchableModel {
    fn apply_to(&self, node: &mut Node) -> Result<(), TypeError>;

    /// Stage a new node for this value in `ws` and return it.
    fn to_node(&self, ws: &mut Workspace<'_>) -> RepoResult<Node> {
        let mut node = ws.new_node(Self::entity()?)?;
        self.apply_to(&mut node)?;
        ws.insert(node.clone())?;
        Ok(node)
    }
}

/// A model with a unique identity attribute.
pub trait IdentifiedModel: FetchableModel {
    type Id: Into<Value> + Clone + Debug + Send + Sync + 'static;

    const ID_ATTRIBUTE: &'static str;

    fn id(&self) -> Self::Id;

    fn identity_request(id: Self::Id) -> RepoResult<FetchRequest> {
        Ok(Self::fetch_request()?.filter(Predicate::eq(Self::ID_ATTRIBUTE, id)))
    }
}

/// A value that may carry the reference of the node it was read from.
pub trait ManagedRef {
    fn managed_ref(&self) -> Option<&ObjectRef>;
}

/// A value that may carry an encoded reference.
pub trait EncodedManagedRef {
    fn encoded_ref(&self) -> Option<&str>;
}

/// A model that can find the node backing one of its values.
pub trait ReadableModel: FetchableModel {
    fn locate(&self, ws: &mut Workspace<'_>) -> RepoResult<Node>;
}

// ---- Decoding ----

/// Decode `node` as `M`, checking it belongs to `M`'s entity first.
pub fn decode<M: FetchableModel>(node: &Node) -> RepoResult<M> {
    if node.entity().as_str() != M::ENTITY {
        return Err(RepositoryError::TypeMismatch {
            expected: M::ENTITY.to_string(),
            found: node.entity().to_string(),
        });
    }
    M::from_node(node).map_err(classify)
}

/// Read `reference` in `ws` and check it is a node of `M`'s entity.
pub fn node_of<M: FetchableModel>(ws: &mut Workspace<'_>, reference: &ObjectRef) -> RepoResult<Node> {
    if reference.entity().as_str() != M::ENTITY {
        return Err(RepositoryError::TypeMismatch {
            expected: M::ENTITY.to_string(),
            found: reference.entity().to_string(),
        });
    }
    ws.object(reference).map_err(classify)
}

// ---- Locating ----

/// The single node whose identity attribute equals `id`. Zero or several
/// matches are both `NotFound`.
pub fn locate_by_identity<M: IdentifiedModel>(
    ws: &mut Workspace<'_>,
    id: M::Id,
) -> RepoResult<Node> {
    let mut nodes = ws.fetch(&M::identity_request(id)?.limit(2))?;
    match nodes.len() {
        1 => Ok(nodes.remove(0)),
        _ => Err(RepositoryError::NotFound),
    }
}

/// The node `item` was read from.
pub fn locate_by_ref<M: FetchableModel + ManagedRef>(
    ws: &mut Workspace<'_>,
    item: &M,
) -> RepoResult<Node> {
    let reference = item.managed_ref().ok_or(RepositoryError::MissingIdentity)?;
    node_of::<M>(ws, reference)
}

/// The node named by `item`'s encoded reference.
pub fn locate_by_encoded<M: FetchableModel + EncodedManagedRef>(
    ws: &mut Workspace<'_>,
    item: &M,
) -> RepoResult<Node> {
    let encoded = item.encoded_ref().ok_or(RepositoryError::MissingIdentity)?;
    let reference = ws.store().object_ref(encoded)?;
    node_of::<M>(ws, &reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{item_schema, Item};
    use ogr_store::InMemoryStore;
    use ogr_types::StoreId;

    fn item_node(id: i64, n: i64) -> Node {
        let reference = ObjectRef::permanent(StoreId::new(), Item::entity().unwrap(), 1);
        let mut node = Node::new(reference);
        node.set("id", id);
        node.set("n", n);
        node
    }

    #[test]
    fn decode_checks_entity() {
        let item: Item = decode(&item_node(1, 5)).unwrap();
        assert_eq!((item.id, item.n), (1, 5));
        assert!(item.reference.is_some());

        let other = ObjectRef::permanent(StoreId::new(), EntityName::new("Other").unwrap(), 1);
        let err = decode::<Item>(&Node::new(other)).unwrap_err();
        assert!(matches!(err, RepositoryError::TypeMismatch { ref found, .. } if found == "Other"));
    }

    #[test]
    fn decode_reports_wrong_attribute_type() {
        let mut node = item_node(1, 5);
        node.set("n", "five");
        assert!(matches!(
            decode::<Item>(&node),
            Err(RepositoryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn identity_request_filters_on_id() {
        let request = Item::identity_request(3).unwrap();
        assert!(request.matches(&item_node(3, 0)));
        assert!(!request.matches(&item_node(4, 0)));
    }

    #[test]
    fn schema_knows_item() {
        let store = InMemoryStore::new(item_schema());
        assert!(ogr_store::Store::schema(&store).contains(&Item::entity().unwrap()));
    }
}
