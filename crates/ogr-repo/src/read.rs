use ogr_types::ObjectRef;

use crate::error::RepoResult;
use crate::model::{decode, locate_by_identity, node_of, FetchableModel, IdentifiedModel, ReadableModel};
use crate::repository::Repository;

impl Repository {
    /// Read the current state of the node backing `item`.
    pub async fn read<M: ReadableModel>(&self, item: &M) -> RepoResult<M> {
        self.read_in(|ws| decode(&item.locate(ws)?)).await
    }

    /// Read the single node whose identity attribute equals `id`.
    pub async fn read_by_id<M: IdentifiedModel>(&self, id: M::Id) -> RepoResult<M> {
        self.read_in(move |ws| decode(&locate_by_identity::<M>(ws, id)?))
            .await
    }

    pub async fn read_by_ref<M: FetchableModel>(&self, reference: &ObjectRef) -> RepoResult<M> {
        self.read_in(|ws| decode(&node_of::<M>(ws, reference)?))
            .await
    }

    pub async fn read_by_encoded<M: FetchableModel>(&self, encoded: &str) -> RepoResult<M> {
        let reference = self.object_ref(encoded)?;
        self.read_by_ref(&reference).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepositoryError;
    use crate::model::{locate_by_encoded, locate_by_ref, EncodedManagedRef};
    use crate::testing::{repository, seeded, Item};
    use ogr_store::{InMemoryStore, Store};
    use ogr_types::{Node, TypeError};

    /// Item addressed only by its encoded reference.
    #[derive(Debug)]
    struct Link {
        encoded: Option<String>,
    }

    impl FetchableModel for Link {
        const ENTITY: &'static str = Item::ENTITY;

        fn from_node(node: &Node) -> Result<Self, TypeError> {
            Ok(Self {
                encoded: Some(node.reference().encode()),
            })
        }
    }

    impl EncodedManagedRef for Link {
        fn encoded_ref(&self) -> Option<&str> {
            self.encoded.as_deref()
        }
    }

    impl ReadableModel for Link {
        fn locate(&self, ws: &mut ogr_context::Workspace<'_>) -> RepoResult<Node> {
            locate_by_encoded(ws, self)
        }
    }

    #[tokio::test]
    async fn read_by_item_uses_reference_then_identity() {
        let (repo, items) = seeded(3).await;
        let by_ref = repo.read(&items[1]).await.unwrap();
        assert_eq!(by_ref, items[1]);

        let detached = Item::new(items[2].id, 0);
        let by_identity = repo.read(&detached).await.unwrap();
        assert_eq!(by_identity, items[2]);
    }

    #[tokio::test]
    async fn read_missing_identity_is_not_found() {
        let (repo, _) = seeded(2).await;
        let err = repo.read_by_id::<Item>(99).await.unwrap_err();
        assert_eq!(err, RepositoryError::NotFound);
    }

    #[tokio::test]
    async fn read_by_encoded_roundtrip() {
        let (repo, items) = seeded(2).await;
        let encoded = items[0].reference.as_ref().unwrap().encode();
        let read: Item = repo.read_by_encoded(&encoded).await.unwrap();
        assert_eq!(read, items[0]);

        let link = Link {
            encoded: Some(encoded),
        };
        assert!(repo.read(&link).await.is_ok());
    }

    #[tokio::test]
    async fn foreign_encoded_reference_is_rejected() {
        let (repo, items) = seeded(1).await;
        let other = InMemoryStore::new(crate::testing::item_schema());
        let foreign = ObjectRef::permanent(
            other.store_id(),
            Item::entity().unwrap(),
            items[0].reference.as_ref().unwrap().row().unwrap(),
        );
        let err = repo.read_by_encoded::<Item>(&foreign.encode()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidEncodedReference(_)));

        let err = repo.read_by_encoded::<Item>("not a reference").await.unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidEncodedReference(_)));
    }

    #[tokio::test]
    async fn values_without_identity_cannot_be_located() {
        let repo = repository().await;
        let err = repo
            .read_in(|ws| locate_by_ref(ws, &Item::new(1, 1)))
            .await
            .unwrap_err();
        assert_eq!(err, RepositoryError::MissingIdentity);

        let err = repo.read(&Link { encoded: None }).await.unwrap_err();
        assert_eq!(err, RepositoryError::MissingIdentity);
    }

    #[tokio::test]
    async fn reference_of_another_entity_is_a_type_mismatch() {
        let (repo, items) = seeded(1).await;
        let reference = items[0].reference.clone().unwrap();
        let err = repo.read_by_ref::<Other>(&reference).await.unwrap_err();
        assert!(matches!(err, RepositoryError::TypeMismatch { .. }));
    }

    #[derive(Debug)]
    struct Other;

    impl FetchableModel for Other {
        const ENTITY: &'static str = "Other";

        fn from_node(_: &Node) -> Result<Self, TypeError> {
            Ok(Self)
        }
    }
}
