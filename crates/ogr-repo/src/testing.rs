//! Test fixtures: a sample model and seeded repositories.

use std::time::Duration;

use ogr_context::{Executor, Workspace};
use ogr_store::{EntitySchema, Schema};
use ogr_types::{EntityName, Node, ObjectRef, TypeError};

use crate::error::RepoResult;
use crate::model::{
    locate_by_identity, locate_by_ref, FetchableModel, IdentifiedModel, ManagedRef,
    ReadableModel, WritableModel,
};
use crate::repository::Repository;

/// Sample model: unique `id`, a number and an optional reference to
/// another item.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub id: i64,
    pub n: i64,
    pub parent: Option<ObjectRef>,
    pub reference: Option<ObjectRef>,
}

impl Item {
    pub fn new(id: i64, n: i64) -> Self {
        Self {
            id,
            n,
            parent: None,
            reference: None,
        }
    }

    pub fn with_parent(mut self, parent: Option<ObjectRef>) -> Self {
        self.parent = parent;
        self
    }
}

impl FetchableModel for Item {
    const ENTITY: &'static str = "Item";

    fn from_node(node: &Node) -> Result<Self, TypeError> {
        Ok(Self {
            id: node.get("id")?,
            n: node.get("n")?,
            parent: node.get("parent")?,
            reference: Some(node.reference().clone()),
        })
    }
}

impl WritableModel for Item {
    fn apply_to(&self, node: &mut Node) -> Result<(), TypeError> {
        node.set("id", self.id);
        node.set("n", self.n);
        node.set("parent", self.parent.clone());
        Ok(())
    }
}

impl IdentifiedModel for Item {
    type Id = i64;

    const ID_ATTRIBUTE: &'static str = "id";

    fn id(&self) -> i64 {
        self.id
    }
}

impl ManagedRef for Item {
    fn managed_ref(&self) -> Option<&ObjectRef> {
        self.reference.as_ref()
    }
}

impl ReadableModel for Item {
    fn locate(&self, ws: &mut Workspace<'_>) -> RepoResult<Node> {
        match self.reference {
            Some(_) => locate_by_ref(ws, self),
            None => locate_by_identity::<Self>(ws, self.id),
        }
    }
}

pub fn item_schema() -> Schema {
    let item = EntityName::new(Item::ENTITY).unwrap();
    Schema::new().with_entity(EntitySchema::new(item).unique(["id"]).required("id"))
}

/// An empty repository on the current runtime.
pub async fn repository() -> Repository {
    Repository::in_memory(item_schema(), Executor::current().unwrap())
}

/// A repository holding items `0..count`, item `i` carrying `n = 10 * i`.
pub async fn seeded(count: i64) -> (Repository, Vec<Item>) {
    let repo = repository().await;
    let items: Vec<Item> = (0..count).map(|i| Item::new(i, i * 10)).collect();
    let created = repo.create_atomically(&items, None).await.unwrap();
    (repo, created)
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
