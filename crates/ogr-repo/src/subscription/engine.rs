use std::ops::ControlFlow;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use ogr_context::{ChangeStream, Context, ContextKind, ObserverId, Workspace};

use crate::error::{RepoResult, RepositoryError};
use crate::repository::Repository;
use crate::subscription::target::{Relevance, Target};

/// Re-evaluates a subscription's target inside its read context.
pub(crate) type Evaluator<T> = Box<dyn Fn(&mut Workspace<'_>) -> RepoResult<T> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Flavor {
    /// Errors are delivered and the subscription continues.
    Result,
    /// The first error ends the subscription.
    Throwing,
}

/// Start a subscription and return the receiving end of its channel.
///
/// The change observer is registered before the task is spawned, so no
/// commit that lands after this call returns can be missed.
pub(crate) fn start<T: Send + 'static>(
    repo: &Repository,
    target: Target,
    flavor: Flavor,
    evaluate: Evaluator<T>,
) -> mpsc::Receiver<RepoResult<T>> {
    let (tx, rx) = mpsc::channel(repo.config().subscription_buffer.max(1));
    let context = repo.shared_context().child(ContextKind::Read);
    let filter = target.filter(context.ancestry()[1..].to_vec());
    let (observer, changes) = context.arena().router().subscribe(filter);
    debug!(
        subscription = %context.id(),
        target = ?target,
        flavor = ?flavor,
        "subscription started"
    );

    let task = Subscription {
        context,
        observer,
        changes,
        target,
        flavor,
        evaluate,
        tx,
    };
    repo.executor().spawn(task.run());
    rx
}

struct Subscription<T> {
    context: Context,
    observer: ObserverId,
    changes: ChangeStream,
    target: Target,
    flavor: Flavor,
    evaluate: Evaluator<T>,
    tx: mpsc::Sender<RepoResult<T>>,
}

impl<T: Send + 'static> Subscription<T> {
    async fn run(mut self) {
        if self.emit().await.is_continue() {
            self.watch().await;
        }
        self.context.arena().router().unsubscribe(self.observer);
        debug!(subscription = %self.context.id(), "subscription terminated");
    }

    async fn watch(&mut self) {
        loop {
            let relevance = tokio::select! {
                _ = self.tx.closed() => return,
                received = self.changes.recv() => match received {
                    Ok(notification) => self.target.relevance(&notification),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(subscription = %self.context.id(), skipped, "subscription lagged");
                        Relevance::Recompute
                    }
                    Err(RecvError::Closed) => return,
                },
            };

            match relevance {
                Relevance::Irrelevant => continue,
                Relevance::Deleted => {
                    let _ = self.tx.send(Err(RepositoryError::FlaggedDeleted)).await;
                    return;
                }
                Relevance::Recompute => {}
            }

            if self.tx.is_closed() {
                return;
            }
            if let Err(error) = self.context.refresh().await {
                let _ = self.tx.send(Err(error.into())).await;
                return;
            }
            if self.emit().await.is_break() {
                return;
            }
        }
    }

    /// Evaluate the target and deliver the result.
    async fn emit(&mut self) -> ControlFlow<()> {
        let evaluate = &self.evaluate;
        let result = self.context.perform(|ws| evaluate(ws)).await;
        let terminal = match &result {
            Ok(_) => false,
            Err(error) => self.flavor == Flavor::Throwing || self.target.is_terminal(error),
        };
        trace!(subscription = %self.context.id(), ok = result.is_ok(), "subscription evaluated");
        if self.tx.send(result).await.is_err() || terminal {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}
