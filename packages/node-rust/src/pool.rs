//! Shared worker pool handed to every provider.
//!
//! Wraps the node's tokio runtime handle so that listener tasks and request
//! handlers all run on the same runtime, whichever task started them.

use std::future::Future;

use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::JoinHandle;

/// Cheaply clonable handle to the node's runtime.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
}

impl WorkerPool {
    #[must_use]
    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    /// Pool backed by the runtime of the calling task.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a tokio runtime.
    pub fn try_current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::from_handle)
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}
