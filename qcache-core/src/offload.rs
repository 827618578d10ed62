//! Bounded pool for blocking storage work.
//!
//! Remote stores are reached through blocking clients. [`BlockingPool`] moves
//! that work off the session workers onto tokio's blocking threads, and keeps
//! the number of jobs running at once under a fixed limit. Jobs over the limit
//! wait for a permit without occupying a thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use smol_str::SmolStr;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug_span, error, trace};

use crate::StorageError;

/// Default number of jobs that may run concurrently.
pub const DEFAULT_POOL_THREADS: usize = 8;

#[derive(Debug)]
struct BlockingPoolInner {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_threads: usize,
    submitted: AtomicU64,
}

/// Cloneable handle to a bounded blocking pool.
///
/// Clones share the same limit.
#[derive(Clone, Debug)]
pub struct BlockingPool {
    inner: Arc<BlockingPoolInner>,
}

impl BlockingPool {
    /// Creates a pool running jobs on the runtime behind `handle`.
    ///
    /// A `max_threads` of zero is treated as one.
    pub fn new(handle: Handle, max_threads: usize) -> Self {
        let max_threads = max_threads.max(1);
        Self {
            inner: Arc::new(BlockingPoolInner {
                handle,
                permits: Arc::new(Semaphore::new(max_threads)),
                max_threads,
                submitted: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a pool on the runtime the caller is running in.
    pub fn current(max_threads: usize) -> Result<Self, StorageError> {
        let handle = Handle::try_current().map_err(|_| StorageError::NoRuntime)?;
        Ok(Self::new(handle, max_threads))
    }

    /// Maximum number of jobs running at once.
    pub fn max_threads(&self) -> usize {
        self.inner.max_threads
    }

    /// Number of jobs currently holding a permit.
    pub fn active(&self) -> usize {
        self.inner.max_threads - self.inner.permits.available_permits()
    }

    /// Total number of jobs submitted so far.
    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Relaxed)
    }

    /// Submits a blocking job.
    ///
    /// `kind` labels the job in traces. The call never blocks; the job runs
    /// once a permit is free.
    pub fn execute<F>(&self, kind: impl Into<SmolStr>, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let kind = kind.into();
        let id = self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        let permits = self.inner.permits.clone();
        let handle = self.inner.handle.clone();
        let span = debug_span!("qcache.offload", kind = %kind, id);

        self.inner.handle.spawn(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    error!("blocking pool is closed, job dropped");
                    return;
                };
                trace!("job started");
                if let Err(err) = handle.spawn_blocking(job).await {
                    error!(error = %err, "blocking job failed");
                }
            }
            .instrument(span),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn jobs_run_off_the_calling_thread() {
        let pool = BlockingPool::current(2).unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let caller = std::thread::current().id();

        pool.execute("probe", move || {
            let _ = tx.send(std::thread::current().id());
        });

        assert_ne!(rx.await.unwrap(), caller);
        assert_eq!(pool.submitted(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrency_never_exceeds_the_limit() {
        let pool = BlockingPool::current(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            let tx = tx.clone();
            pool.execute("probe", move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                let _ = tx.send(());
            });
        }
        drop(tx);

        let mut done = 0;
        while rx.recv().await.is_some() {
            done += 1;
        }
        assert_eq!(done, 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn zero_threads_is_clamped() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let pool = BlockingPool::new(runtime.handle().clone(), 0);
        assert_eq!(pool.max_threads(), 1);
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn current_requires_a_runtime() {
        assert!(matches!(
            BlockingPool::current(1),
            Err(StorageError::NoRuntime)
        ));
    }
}
