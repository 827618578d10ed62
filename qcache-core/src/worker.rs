//! Posting work back to the session that issued an operation.
//!
//! The proxy runs every session on a single-threaded, cooperative worker.
//! Storage operations leave that worker to do blocking I/O, and their
//! completion must come back to it before the session's callback runs.
//!
//! [`Worker`] is the seam to the proxy's event loop. [`channel`] provides an
//! implementation on top of a tokio channel: the session side owns the
//! [`WorkerQueue`] and drives it on its own task, while the cloneable
//! [`WorkerHandle`] travels with the operations.
//!
//! ```
//! use qcache_core::worker::{self, Worker};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (handle, mut queue) = worker::channel();
//! let (tx, rx) = tokio::sync::oneshot::channel();
//!
//! std::thread::spawn(move || {
//!     handle.execute(Box::new(move || {
//!         let _ = tx.send(std::thread::current().id());
//!     }));
//! });
//!
//! assert!(queue.turn().await);
//! assert_eq!(rx.await.unwrap(), std::thread::current().id());
//! # }
//! ```

use tokio::sync::mpsc;
use tracing::debug;

/// A unit of work posted back to a worker.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Execution context that owns a session.
///
/// Tasks passed to [`Worker::execute`] must run on the worker's own thread,
/// in the order they were posted.
pub trait Worker: Send + Sync {
    /// Queues `task` for execution on the worker.
    ///
    /// If the worker is gone, the task is dropped without running.
    fn execute(&self, task: Task);
}

/// Creates a connected worker handle and queue.
pub fn channel() -> (WorkerHandle, WorkerQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WorkerHandle { tx }, WorkerQueue { rx })
}

/// Sending half of a worker channel.
#[derive(Clone, Debug)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<Task>,
}

impl WorkerHandle {
    /// Returns `true` while the queue side is still alive.
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl Worker for WorkerHandle {
    fn execute(&self, task: Task) {
        if self.tx.send(task).is_err() {
            debug!("worker queue is gone, dropping posted task");
        }
    }
}

/// Receiving half of a worker channel, driven by the session's task.
#[derive(Debug)]
pub struct WorkerQueue {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl WorkerQueue {
    /// Runs tasks until every [`WorkerHandle`] has been dropped.
    pub async fn run(mut self) {
        while self.turn().await {}
    }

    /// Waits for the next task and runs it.
    ///
    /// Returns `false` once every handle is dropped and the queue is drained.
    pub async fn turn(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs the tasks that are already queued without waiting for more.
    ///
    /// Returns the number of tasks run.
    pub fn run_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[tokio::test]
    async fn tasks_run_in_posting_order() {
        let (handle, mut queue) = channel();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = seen.clone();
            handle.execute(Box::new(move || seen.lock().unwrap().push(i)));
        }

        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn run_finishes_when_handles_are_dropped() {
        let (handle, queue) = channel();
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        handle.execute(Box::new(move || *flag.lock().unwrap() = true));
        drop(handle);

        queue.run().await;
        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn task_posted_to_dead_worker_is_dropped() {
        let (handle, queue) = channel();
        drop(queue);
        assert!(!handle.is_alive());

        let payload = Arc::new(());
        let captured = payload.clone();
        handle.execute(Box::new(move || drop(captured)));
        assert_eq!(Arc::strong_count(&payload), 1);
    }
}
