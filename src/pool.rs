//! Bounded worker pool
//!
//! A fixed number of workers drain a bounded queue. [`WorkerPool::try_submit`]
//! refuses work when the queue is full instead of growing without limit.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

type Work = BoxFuture<'static, ()>;

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Queue full
    #[error("worker pool saturated ({capacity} queued)")]
    Saturated {
        /// Queue capacity
        capacity: usize,
    },

    /// Pool shut down
    #[error("worker pool is closed")]
    Closed,
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Worker count
    pub workers: usize,
    /// Submitted, not yet picked up
    pub queued: u64,
    /// Currently executing
    pub running: u64,
    /// Finished (including panicked)
    pub completed: u64,
    /// Refused because the queue was full
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    running: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
}

/// Fixed-size pool of async workers.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Work>>>,
    counters: Arc<Counters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    capacity: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stats", &self.stats())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `workers` workers sharing a queue of `queue_capacity` slots.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel::<Work>(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers)
            .map(|worker| {
                let receiver = receiver.clone();
                let counters = counters.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(work) = next else { break };

                        counters.queued.fetch_sub(1, Ordering::SeqCst);
                        counters.running.fetch_add(1, Ordering::SeqCst);
                        crate::metrics::record_pool_depth(counters.queued.load(Ordering::SeqCst));

                        if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
                            error!(worker, panic = %panic_message(panic.as_ref()), "Pool task panicked");
                        }

                        counters.running.fetch_sub(1, Ordering::SeqCst);
                        counters.completed.fetch_add(1, Ordering::SeqCst);
                    }
                    debug!(worker, "Pool worker exiting");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            counters,
            workers: Mutex::new(handles),
            worker_count: workers,
            capacity,
        }
    }

    /// Pool sized from settings
    pub fn from_config(config: &crate::config::PoolConfig) -> Self {
        Self::new(config.workers, config.queue_capacity)
    }

    /// Queue work without waiting; fails with [`PoolError::Saturated`] when full.
    pub fn try_submit<F>(&self, work: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender()?;
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(work.boxed()) {
            Ok(()) => {
                crate::metrics::record_pool_depth(self.counters.queued.load(Ordering::SeqCst));
                Ok(())
            }
            Err(e) => {
                self.counters.queued.fetch_sub(1, Ordering::SeqCst);
                match e {
                    mpsc::error::TrySendError::Full(_) => {
                        self.counters.rejected.fetch_add(1, Ordering::SeqCst);
                        crate::metrics::record_pool_rejection();
                        Err(PoolError::Saturated {
                            capacity: self.capacity,
                        })
                    }
                    mpsc::error::TrySendError::Closed(_) => Err(PoolError::Closed),
                }
            }
        }
    }

    /// Queue work, waiting for a free slot
    pub async fn submit<F>(&self, work: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender()?;
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if sender.send(work.boxed()).await.is_err() {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(PoolError::Closed);
        }
        crate::metrics::record_pool_depth(self.counters.queued.load(Ordering::SeqCst));
        Ok(())
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.worker_count,
            queued: self.counters.queued.load(Ordering::SeqCst),
            running: self.counters.running.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting work, let queued work finish, and join the workers
    pub async fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<Work>, PoolError> {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(PoolError::Closed)
    }
}
