//! Bounded executor for codec work.
//!
//! Decoding and encoding are CPU-bound and would stall the async runtime if
//! run inline. Jobs run on tokio's blocking threads, and a semaphore caps how
//! many run at once so a burst of large uploads cannot oversubscribe the
//! machine.
//!
//! Dropping the future returned by [`WorkerPool::run`] abandons a job that is
//! still waiting for a permit. A job already running completes and its output
//! is discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::{ServiceError, TransformError};

/// Pool size used when none is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Semaphore-bounded pool over `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    timeout: Option<Duration>,
}

impl WorkerPool {
    /// Create a pool running at most `size` jobs at once (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            timeout: None,
        }
    }

    /// Fail jobs that take longer than `timeout`, including time spent
    /// waiting for a permit.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Stop accepting jobs. Waiting and future jobs fail with
    /// [`ServiceError::Unavailable`].
    pub fn close(&self) {
        self.permits.close();
    }

    /// Run `job` on a blocking thread once a permit is free.
    pub async fn run<F, T>(&self, job: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Result<T, TransformError> + Send + 'static,
        T: Send + 'static,
    {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.execute(job)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(timeout_ms = limit.as_millis() as u64, "Transform timed out");
                    Err(ServiceError::Timeout { after: limit })
                }
            },
            None => self.execute(job).await,
        }
    }

    fn execute<F, T>(&self, job: F) -> impl Future<Output = Result<T, ServiceError>> + Send
    where
        F: FnOnce() -> Result<T, TransformError> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ServiceError::Unavailable {
                    message: "worker pool is shut down".to_string(),
                })?;

            let joined = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job()
            })
            .await;

            match joined {
                Ok(result) => result.map_err(ServiceError::from),
                Err(e) => {
                    tracing::error!(error = %e, "Transform worker panicked");
                    Err(ServiceError::Internal {
                        message: format!("transform worker failed: {}", e),
                    })
                }
            }
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(default_workers())
    }
}
