//! Fixed-size worker pool for work that must not run on the request path.
//!
//! Key properties:
//! - At most `size` units of work run at once; the rest wait for a slot in
//!   FIFO order (tokio's semaphore is fair).
//! - Work submitted through [`WorkerPool::run`] runs on its own task, so
//!   dropping the caller's future (e.g. a client disconnect) does not stop it.
//! - CPU-bound closures go through [`WorkerPool::run_blocking`] and never
//!   block a runtime worker thread.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("worker task panicked: {0}")]
    Panicked(String),
    #[error("worker task was cancelled")]
    Cancelled,
}

impl From<tokio::task::JoinError> for PoolError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            PoolError::Panicked(err.to_string())
        } else {
            PoolError::Cancelled
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name,
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots not currently held by running work.
    pub fn idle_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `work` on a detached task once a slot is free and wait for it.
    pub async fn run<F>(&self, work: F) -> Result<F::Output, PoolError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let name = self.name;
        let handle = tokio::spawn(async move {
            // The semaphore is never closed, so acquisition only waits.
            let _slot = permits.acquire_owned().await.ok();
            debug!(pool = name, "worker slot acquired");
            work.await
        });

        handle.await.map_err(|err| {
            error!(pool = name, "worker task failed: {err}");
            PoolError::from(err)
        })
    }

    /// Run a CPU-bound closure on the blocking thread pool once a slot is
    /// free.
    pub async fn run_blocking<F, R>(&self, work: F) -> Result<R, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let slot = Arc::clone(&self.permits).acquire_owned().await.ok();
        let handle = tokio::task::spawn_blocking(move || {
            let _slot = slot;
            work()
        });

        handle.await.map_err(|err| {
            error!(pool = self.name, "blocking task failed: {err}");
            PoolError::from(err)
        })
    }
}
