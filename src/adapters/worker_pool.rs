//! Bounded pool for blocking agent calls.

use std::sync::Arc;

use tokio::sync::Semaphore;

use super::panic_message;
use crate::error::ExecutionError;

/// Runs blocking closures on tokio's blocking threads, at most `size` at a
/// time. Callers beyond the limit wait for a permit on the runtime.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stop accepting work. Calls already running finish normally.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Run `f` on a worker thread and wait for its result.
    ///
    /// A panic inside `f` comes back as `ExecutionError::Panicked`.
    pub async fn run<F, R>(&self, f: F) -> Result<R, ExecutionError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ExecutionError::WorkerPoolClosed)?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| {
            if e.is_panic() {
                ExecutionError::Panicked(panic_message(e.into_panic().as_ref()))
            } else {
                ExecutionError::WorkerPoolClosed
            }
        })
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("available", &self.available())
            .finish()
    }
}
