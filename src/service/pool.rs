//! Bounded CPU worker pool.
//!
//! Decode, window and encode work runs on a fixed-size rayon pool. Async
//! callers submit a closure and await its result through a oneshot channel,
//! so request-handling tasks never perform pixel arithmetic themselves.
//!
//! A caller that stops awaiting does not cancel the job: it runs to
//! completion and its result is dropped.

use std::future::Future;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::sync::oneshot;
use tracing::error;

use crate::error::PoolError;

/// Fixed-size pool for CPU-bound work.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    /// Create a pool with `num_threads` workers.
    ///
    /// Zero means one worker per CPU core.
    pub fn new(num_threads: usize) -> Result<Self, PoolError> {
        let num_threads = if num_threads == 0 {
            num_cpus::get()
        } else {
            num_threads
        };

        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("dicom-worker-{}", i))
            // Without a handler a panicking job aborts the process
            .panic_handler(|_| error!("Worker task panicked"))
            .build()
            .map_err(|e| PoolError::Build(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Submit `job` to the pool and return a future for its result.
    ///
    /// The job is queued immediately, before the future is first polled.
    ///
    /// # Errors
    ///
    /// The future yields [`PoolError::TaskAborted`] if the job panicked.
    pub fn run<F, T>(&self, job: F) -> impl Future<Output = Result<T, PoolError>> + Send + 'static
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            // Receiver may be gone if the caller gave up
            let _ = tx.send(job());
        });
        async move { rx.await.map_err(|_| PoolError::TaskAborted) }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size())
            .finish()
    }
}
