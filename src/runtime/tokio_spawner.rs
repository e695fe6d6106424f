//! Tokio runtime spawner used for the queue worker and job timers.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::core::OrchestratorError;

/// Spawns background tasks on a tokio runtime.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: Arc<Handle>,
}

impl TokioSpawner {
    /// Spawner for an explicit runtime handle.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Spawner for the runtime the caller is running on.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Backend`] when called outside a tokio runtime.
    pub fn current() -> Result<Self, OrchestratorError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| OrchestratorError::Backend(format!("no tokio runtime: {e}")))
    }

    /// Spawn `fut`, returning a handle that can abort it.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(fut)
    }
}
