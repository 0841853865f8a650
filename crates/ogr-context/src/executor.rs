use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{ContextError, ContextResult};

/// Where a context's background work runs.
///
/// Passed explicitly when a root context is created and inherited by every
/// child; there is no ambient default.
#[derive(Clone, Debug)]
pub struct Executor {
    handle: Handle,
}

impl Executor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// The runtime the caller is running on.
    pub fn current() -> ContextResult<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| ContextError::NoRuntime)
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}
