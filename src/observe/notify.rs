//! Asynchronous notification worker pool.
//!
//! When a pool is configured on the tree root, `changed()` hands its
//! notification pass to the pool and returns immediately; without one,
//! delivery runs synchronously on the caller's thread under the per-node
//! recursion guard.
//!
//! Each worker owns its own bounded queue. Keyed submission pins a key to
//! one worker, so all tasks for that key execute in submission order; nodes
//! key their passes by identity to keep per-subscriber sequence numbers
//! monotonic.

use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::NotifyError;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct NotifyPoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Max queued notification tasks per worker before hand-off fails.
    pub queue_capacity: usize,
}

impl Default for NotifyPoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 1024,
        }
    }
}

/// Bounded worker pool for notification hand-off.
///
/// `execute` and `execute_keyed` never block the triggering thread: a full
/// queue fails the hand-off and is counted. Dropping the pool closes the
/// queues and joins the workers after they drain them.
pub struct NotifyPool {
    queues: Vec<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    dropped: AtomicU64,
    next: AtomicUsize,
}

impl NotifyPool {
    /// Starts the pool.
    #[must_use]
    pub fn new(cfg: NotifyPoolConfig) -> Arc<Self> {
        let workers = cfg.workers.max(1);
        let queue_capacity = cfg.queue_capacity.max(1);

        let mut queues = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let (tx, rx): (Sender<Task>, Receiver<Task>) = bounded(queue_capacity);
            let thread_name = format!("coaptree-notify-{idx}");
            let handle = thread::Builder::new()
                .name(thread_name)
                .spawn(move || {
                    while let Ok(task) = rx.recv() {
                        task();
                    }
                })
                .expect("failed to spawn coaptree notify worker");
            queues.push(tx);
            handles.push(handle);
        }

        Arc::new(Self {
            queues,
            workers: handles,
            dropped: AtomicU64::new(0),
            next: AtomicUsize::new(0),
        })
    }

    /// Non-blocking hand-off of a unit of notification work, spread over the
    /// workers round-robin.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<(), NotifyError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        self.submit(idx, Box::new(task))
    }

    /// Non-blocking hand-off pinned to the worker the key hashes onto.
    ///
    /// Tasks submitted under the same key execute one at a time, in
    /// submission order.
    pub fn execute_keyed(
        &self,
        key: usize,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<(), NotifyError> {
        self.submit(key % self.queues.len(), Box::new(task))
    }

    fn submit(&self, idx: usize, task: Task) -> Result<(), NotifyError> {
        match self.queues[idx].try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(NotifyError::QueueFull {
                    path: "notify_pool".to_string(),
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(NotifyError::Disconnected {
                path: "notify_pool".to_string(),
            }),
        }
    }

    /// Hands off a task and blocks until it completes.
    ///
    /// Implemented as hand-off plus a single-count wait signal; used
    /// sparingly, e.g. for shutdown quiescence.
    pub fn execute_and_wait(&self, task: impl FnOnce() + Send + 'static) -> Result<(), NotifyError> {
        let (done_tx, done_rx) = bounded::<()>(1);
        self.execute(move || {
            task();
            let _ = done_tx.send(());
        })?;
        done_rx.recv().map_err(|_| NotifyError::Disconnected {
            path: "notify_wait".to_string(),
        })
    }

    /// Blocks until every task queued so far, on every worker, has
    /// completed. Unlike `execute`, the markers are enqueued blocking.
    pub fn quiesce(&self) -> Result<(), NotifyError> {
        let (done_tx, done_rx) = bounded::<()>(self.queues.len());
        for queue in &self.queues {
            let done_tx = done_tx.clone();
            let marker: Task = Box::new(move || {
                let _ = done_tx.send(());
            });
            queue.send(marker).map_err(|_| NotifyError::Disconnected {
                path: "notify_pool".to_string(),
            })?;
        }
        for _ in &self.queues {
            done_rx.recv().map_err(|_| NotifyError::Disconnected {
                path: "notify_wait".to_string(),
            })?;
        }
        Ok(())
    }

    /// Number of tasks rejected because a queue was full.
    #[must_use]
    pub fn dropped_tasks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for NotifyPool {
    fn drop(&mut self) {
        // Close the queues first so workers drain and exit, then join.
        for queue in &mut self.queues {
            let (dummy_tx, _) = bounded::<Task>(1);
            drop(mem::replace(queue, dummy_tx));
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for NotifyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyPool")
            .field("workers", &self.workers.len())
            .field("dropped", &self.dropped_tasks())
            .finish()
    }
}
