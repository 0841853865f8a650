//! Live subscriptions.
//!
//! A subscription owns a dedicated read context under the shared context and
//! an observer on the change router. Every store commit made through the
//! shared context that could affect the target triggers a refresh of the
//! read context and a re-evaluation, delivered over a bounded channel.
//!
//! Single-object subscriptions end with `NotFound` when the object is gone
//! and with `FlaggedDeleted` when a commit deletes it. Read subscriptions by
//! value or identity resolve the object once, when the subscription starts,
//! and then follow that reference.

mod engine;
mod stream;
mod target;

pub use stream::{LiveStream, LiveThrowingStream};

use ogr_context::Workspace;
use ogr_store::{AggregateRequest, FetchRequest};
use ogr_types::{ObjectRef, Value};

use crate::aggregate::fetch_models;
use crate::error::{RepoResult, RepositoryError};
use crate::model::{
    decode, locate_by_identity, node_of, FetchableModel, IdentifiedModel, ReadableModel,
};
use crate::repository::Repository;

use engine::{Evaluator, Flavor};
use target::Target;

type Source<T> = RepoResult<(Target, Evaluator<T>)>;

impl Repository {
    // ---- Plumbing ----

    fn live<T: Send + 'static>(&self, source: Source<T>) -> LiveStream<T> {
        match source {
            Ok((target, evaluate)) => {
                LiveStream::new(engine::start(self, target, Flavor::Result, evaluate))
            }
            Err(error) => LiveStream::failed(error),
        }
    }

    fn live_throwing<T: Send + 'static>(&self, source: Source<T>) -> LiveThrowingStream<T> {
        match source {
            Ok((target, evaluate)) => {
                LiveThrowingStream::new(engine::start(self, target, Flavor::Throwing, evaluate))
            }
            Err(error) => LiveThrowingStream::failed(error),
        }
    }

    fn object_source<M>(reference: ObjectRef) -> Source<M>
    where
        M: FetchableModel + Send + 'static,
    {
        let watched = reference.clone();
        let evaluate: Evaluator<M> = Box::new(move |ws: &mut Workspace<'_>| -> RepoResult<M> {
            decode(&node_of::<M>(ws, &watched)?)
        });
        Ok((Target::Object(reference), evaluate))
    }

    async fn item_source<M>(&self, item: &M) -> Source<M>
    where
        M: ReadableModel + Send + 'static,
    {
        let reference = self
            .read_in(|ws| Ok(item.locate(ws)?.reference().clone()))
            .await?;
        Self::object_source(reference)
    }

    async fn identity_source<M>(&self, id: M::Id) -> Source<M>
    where
        M: IdentifiedModel + Send + 'static,
    {
        let reference = self
            .read_in(move |ws| Ok(locate_by_identity::<M>(ws, id)?.reference().clone()))
            .await?;
        Self::object_source(reference)
    }

    fn encoded_source<M>(&self, encoded: &str) -> Source<M>
    where
        M: FetchableModel + Send + 'static,
    {
        Self::object_source(self.object_ref(encoded)?)
    }

    fn fetch_source<M>(request: FetchRequest) -> Source<Vec<M>>
    where
        M: FetchableModel + Send + 'static,
    {
        if request.entity().as_str() != M::ENTITY {
            return Err(RepositoryError::TypeMismatch {
                expected: M::ENTITY.to_string(),
                found: request.entity().to_string(),
            });
        }
        let target = Target::Query(request.entity().clone());
        let evaluate: Evaluator<Vec<M>> = Box::new(move |ws: &mut Workspace<'_>| -> RepoResult<Vec<M>> {
            fetch_models(ws, &request)
        });
        Ok((target, evaluate))
    }

    fn count_source(request: FetchRequest) -> Source<usize> {
        let target = Target::Query(request.entity().clone());
        let evaluate: Evaluator<usize> = Box::new(move |ws: &mut Workspace<'_>| -> RepoResult<usize> {
            Ok(ws.count(&request)?)
        });
        Ok((target, evaluate))
    }

    fn aggregate_source(request: AggregateRequest) -> Source<Value> {
        let target = Target::Query(request.entity().clone());
        let evaluate: Evaluator<Value> = Box::new(move |ws: &mut Workspace<'_>| -> RepoResult<Value> {
            Ok(ws.aggregate(&request)?)
        });
        Ok((target, evaluate))
    }

    // ---- Read ----

    /// Follow the node backing `item`.
    pub async fn read_subscription<M>(&self, item: &M) -> LiveStream<M>
    where
        M: ReadableModel + Send + 'static,
    {
        let source = self.item_source(item).await;
        self.live(source)
    }

    pub async fn read_subscription_by_id<M>(&self, id: M::Id) -> LiveStream<M>
    where
        M: IdentifiedModel + Send + 'static,
    {
        let source = self.identity_source::<M>(id).await;
        self.live(source)
    }

    pub fn read_subscription_by_ref<M>(&self, reference: &ObjectRef) -> LiveStream<M>
    where
        M: FetchableModel + Send + 'static,
    {
        self.live(Self::object_source(reference.clone()))
    }

    pub fn read_subscription_by_encoded<M>(&self, encoded: &str) -> LiveStream<M>
    where
        M: FetchableModel + Send + 'static,
    {
        self.live(self.encoded_source(encoded))
    }

    pub async fn read_throwing_subscription<M>(&self, item: &M) -> LiveThrowingStream<M>
    where
        M: ReadableModel + Send + 'static,
    {
        let source = self.item_source(item).await;
        self.live_throwing(source)
    }

    pub async fn read_throwing_subscription_by_id<M>(&self, id: M::Id) -> LiveThrowingStream<M>
    where
        M: IdentifiedModel + Send + 'static,
    {
        let source = self.identity_source::<M>(id).await;
        self.live_throwing(source)
    }

    pub fn read_throwing_subscription_by_ref<M>(&self, reference: &ObjectRef) -> LiveThrowingStream<M>
    where
        M: FetchableModel + Send + 'static,
    {
        self.live_throwing(Self::object_source(reference.clone()))
    }

    pub fn read_throwing_subscription_by_encoded<M>(&self, encoded: &str) -> LiveThrowingStream<M>
    where
        M: FetchableModel + Send + 'static,
    {
        self.live_throwing(self.encoded_source(encoded))
    }

    // ---- Queries ----

    pub fn fetch_subscription<M>(&self, request: FetchRequest) -> LiveStream<Vec<M>>
    where
        M: FetchableModel + Send + 'static,
    {
        self.live(Self::fetch_source(request))
    }

    pub fn fetch_throwing_subscription<M>(&self, request: FetchRequest) -> LiveThrowingStream<Vec<M>>
    where
        M: FetchableModel + Send + 'static,
    {
        self.live_throwing(Self::fetch_source(request))
    }

    pub fn count_subscription(&self, request: FetchRequest) -> LiveStream<usize> {
        self.live(Self::count_source(request))
    }

    pub fn count_throwing_subscription(&self, request: FetchRequest) -> LiveThrowingStream<usize> {
        self.live_throwing(Self::count_source(request))
    }

    /// Follow a sum, average, min, max or count over one attribute.
    pub fn aggregate_subscription(&self, request: AggregateRequest) -> LiveStream<Value> {
        self.live(Self::aggregate_source(request))
    }

    pub fn aggregate_throwing_subscription(
        &self,
        request: AggregateRequest,
    ) -> LiveThrowingStream<Value> {
        self.live_throwing(Self::aggregate_source(request))
    }
}
