use tokio::sync::mpsc;

use crate::error::{RepoResult, RepositoryError};

/// Stream of re-evaluations of a live query.
///
/// Each item is the latest evaluation; errors that do not end the
/// subscription are delivered and the stream keeps going. Dropping the
/// stream, or calling [`cancel`](Self::cancel), stops the subscription and
/// releases its read context.
#[derive(Debug)]
pub struct LiveStream<T> {
    rx: mpsc::Receiver<RepoResult<T>>,
}

impl<T> LiveStream<T> {
    pub(crate) fn new(rx: mpsc::Receiver<RepoResult<T>>) -> Self {
        Self { rx }
    }

    /// A stream that yields `error` once and ends.
    pub(crate) fn failed(error: RepositoryError) -> Self {
        Self::new(failed_channel(error))
    }

    /// The next evaluation, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<RepoResult<T>> {
        self.rx.recv().await
    }

    /// An evaluation that is already buffered, if any.
    pub fn try_next(&mut self) -> Option<RepoResult<T>> {
        self.rx.try_recv().ok()
    }

    /// Stop the subscription. Evaluations already buffered can still be
    /// drained with [`next`](Self::next).
    pub fn cancel(&mut self) {
        self.rx.close();
    }
}

/// Stream of re-evaluations that ends right after the first error.
#[derive(Debug)]
pub struct LiveThrowingStream<T> {
    rx: mpsc::Receiver<RepoResult<T>>,
    done: bool,
}

impl<T> LiveThrowingStream<T> {
    pub(crate) fn new(rx: mpsc::Receiver<RepoResult<T>>) -> Self {
        Self { rx, done: false }
    }

    pub(crate) fn failed(error: RepositoryError) -> Self {
        Self::new(failed_channel(error))
    }

    /// The next evaluation. After an error has been returned this is
    /// always `None`.
    pub async fn next(&mut self) -> Option<RepoResult<T>> {
        if self.done {
            return None;
        }
        let item = self.rx.recv().await;
        if matches!(item, Some(Err(_)) | None) {
            self.finish();
        }
        item
    }

    pub fn cancel(&mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        self.done = true;
        self.rx.close();
    }
}

fn failed_channel<T>(error: RepositoryError) -> mpsc::Receiver<RepoResult<T>> {
    let (tx, rx) = mpsc::channel(1);
    // A fresh channel with capacity one always has room.
    let _ = tx.try_send(Err(error));
    rx
}
