use ogr_repo::model::{locate_by_identity, locate_by_ref};
use ogr_repo::{
    EntityName, EntitySchema, FetchableModel, IdentifiedModel, ManagedRef, Node, ObjectRef,
    ReadableModel, RepoResult, Schema, TypeError, WritableModel, Workspace,
};

/// The model the demo and benchmarks work with.
#[derive(Clone, Debug, PartialEq)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub year: i64,
    pub reference: Option<ObjectRef>,
}

impl Movie {
    pub fn new(id: i64, title: impl Into<String>, year: i64) -> Self {
        Self {
            id,
            title: title.into(),
            year,
            reference: None,
        }
    }

    /// Encoded reference, or a placeholder before the first commit.
    pub fn encoded(&self) -> String {
        self.reference
            .as_ref()
            .map(ObjectRef::encode)
            .unwrap_or_else(|| "(unsaved)".into())
    }
}

impl FetchableModel for Movie {
    const ENTITY: &'static str = "Movie";

    fn from_node(node: &Node) -> Result<Self, TypeError> {
        Ok(Self {
            id: node.get("id")?,
            title: node.get("title")?,
            year: node.get("year")?,
            reference: Some(node.reference().clone()),
        })
    }
}

impl WritableModel for Movie {
    fn apply_to(&self, node: &mut Node) -> Result<(), TypeError> {
        node.set("id", self.id);
        node.set("title", self.title.as_str());
        node.set("year", self.year);
        Ok(())
    }
}

impl IdentifiedModel for Movie {
    type Id = i64;

    const ID_ATTRIBUTE: &'static str = "id";

    fn id(&self) -> i64 {
        self.id
    }
}

impl ManagedRef for Movie {
    fn managed_ref(&self) -> Option<&ObjectRef> {
        self.reference.as_ref()
    }
}

impl ReadableModel for Movie {
    fn locate(&self, ws: &mut Workspace<'_>) -> RepoResult<Node> {
        match self.reference {
            Some(_) => locate_by_ref(ws, self),
            None => locate_by_identity::<Self>(ws, self.id),
        }
    }
}

pub fn schema() -> anyhow::Result<Schema> {
    let movie = EntitySchema::new(EntityName::new(Movie::ENTITY)?)
        .unique(["id"])
        .required("id")
        .required("title");
    Ok(Schema::new().with_entity(movie))
}

const TITLES: &[&str] = &[
    "Heat",
    "Ronin",
    "Collateral",
    "Thief",
    "Sicario",
    "Drive",
    "Insomnia",
    "Zodiac",
];

/// `count` movies with ids `0..count`.
pub fn catalogue(count: i64) -> Vec<Movie> {
    (0..count)
        .map(|id| {
            let title = TITLES[id as usize % TITLES.len()];
            Movie::new(id, format!("{title} #{id}"), 1980 + id % 40)
        })
        .collect()
}
