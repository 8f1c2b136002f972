//! Interval-based background scheduler
//!
//! A driver task wakes every tick, and each due task is handed to the
//! shared [`WorkerPool`]. The driver never waits for a run. After every
//! run, whether it succeeded, failed or panicked, the task is rescheduled
//! one interval after the run ended.

pub mod defaults;
pub mod task;

pub use defaults::{register_defaults, CHECKPOINT_AUDIT_TASK, STALE_LOCK_SWEEP_TASK};
pub use task::{ScheduledTask, TaskArgs, TaskCallable, TaskFuture, TaskStatus};

use crate::pool::{panic_message, WorkerPool};
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Scheduler errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// No task with this name
    #[error("unknown scheduled task: {0}")]
    UnknownTask(String),

    /// A task with this name already exists
    #[error("scheduled task already registered: {0}")]
    DuplicateTask(String),

    /// The task has a run in flight
    #[error("scheduled task is already running: {0}")]
    AlreadyRunning(String),

    /// Run finished with an error or panicked
    #[error("scheduled task {name} failed: {message}")]
    TaskFailed {
        /// Task name
        name: String,
        /// Error or panic message
        message: String,
    },

    /// Interval is zero or too large
    #[error("invalid interval for {name}: {reason}")]
    InvalidInterval {
        /// Task name
        name: String,
        /// What is wrong
        reason: String,
    },
}

/// Interval scheduler. Clones share the task registry and driver.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    tasks: Mutex<HashMap<String, ScheduledTask>>,
    pool: Arc<WorkerPool>,
    tick: Duration,
    driver: Mutex<Option<(SharedShutdown, JoinHandle<()>)>>,
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("tick", &self.inner.tick)
            .field("tasks", &self.inner.lock_tasks().len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Inner {
    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<String, ScheduledTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Await one invocation and record it on the task
    async fn run_and_record(&self, name: &str, invocation: TaskFuture) -> Result<Value, String> {
        let started = Instant::now();
        let outcome = match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(panic) => Err(format!("panicked: {}", panic_message(panic.as_ref()))),
        };
        let elapsed = started.elapsed();
        crate::metrics::record_scheduler_run(name, outcome.is_ok(), elapsed);

        match &outcome {
            Ok(_) => info!(task = name, elapsed_ms = elapsed.as_millis() as u64, "Scheduled task completed"),
            Err(e) => error!(task = name, error = %e, "Scheduled task failed"),
        }

        if let Some(task) = self.lock_tasks().get_mut(name) {
            task.finish(&outcome, Utc::now());
        }
        outcome
    }
}

impl JobScheduler {
    /// Scheduler running its tasks on `pool`, waking every `tick`
    pub fn new(pool: Arc<WorkerPool>, tick: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(HashMap::new()),
                pool,
                tick: tick.max(Duration::from_millis(1)),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Register a task, first due one interval from now
    pub fn register<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        callable: F,
        args: TaskArgs,
    ) -> Result<(), SchedulerError>
    where
        F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let name = name.into();
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval {
                name,
                reason: "must be greater than zero".to_string(),
            });
        }
        let interval = chrono::Duration::from_std(interval).map_err(|e| SchedulerError::InvalidInterval {
            name: name.clone(),
            reason: e.to_string(),
        })?;

        let mut tasks = self.inner.lock_tasks();
        if tasks.contains_key(&name) {
            return Err(SchedulerError::DuplicateTask(name));
        }
        let callable: TaskCallable = Arc::new(move |args| callable(args).boxed());
        let task = ScheduledTask::new(name.clone(), interval, callable, args, Utc::now());
        info!(task = %name, interval_secs = interval.num_seconds(), "Scheduled task registered");
        tasks.insert(name, task);
        Ok(())
    }

    /// Remove a task. An in-flight run finishes but is not recorded.
    pub fn unregister(&self, name: &str) -> Result<(), SchedulerError> {
        self.inner
            .lock_tasks()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))
    }

    /// Resume firing a task
    pub fn enable(&self, name: &str) -> Result<(), SchedulerError> {
        self.set_enabled(name, true)
    }

    /// Stop firing a task. An in-flight run is not canceled.
    pub fn disable(&self, name: &str) -> Result<(), SchedulerError> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), SchedulerError> {
        let mut tasks = self.inner.lock_tasks();
        let task = tasks
            .get_mut(name)
            .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))?;
        task.set_enabled(enabled);
        Ok(())
    }

    /// Status of one task
    pub fn status(&self, name: &str) -> Result<TaskStatus, SchedulerError> {
        self.inner
            .lock_tasks()
            .get(name)
            .map(ScheduledTask::status)
            .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))
    }

    /// Status of every task, sorted by name
    pub fn list(&self) -> Vec<TaskStatus> {
        let mut all: Vec<TaskStatus> = self.inner.lock_tasks().values().map(ScheduledTask::status).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Queue every task due at `now` on the pool.
    ///
    /// # Returns
    /// Names of the tasks queued
    pub fn tick_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let due: Vec<(String, TaskFuture)> = self
            .inner
            .lock_tasks()
            .values_mut()
            .filter(|task| task.is_due(now))
            .map(|task| (task.name().to_string(), task.begin()))
            .collect();

        let mut fired = Vec::with_capacity(due.len());
        for (name, invocation) in due {
            let inner = self.inner.clone();
            let task_name = name.clone();
            let submitted = self.inner.pool.try_submit(async move {
                let _ = inner.run_and_record(&task_name, invocation).await;
            });
            match submitted {
                Ok(()) => {
                    debug!(task = %name, "Scheduled task queued");
                    fired.push(name);
                }
                Err(e) => {
                    warn!(task = %name, error = %e, "Could not queue scheduled task, will retry next tick");
                    if let Some(task) = self.inner.lock_tasks().get_mut(&name) {
                        task.abort();
                    }
                }
            }
        }
        fired
    }

    /// Run a task now on the caller's task, outside the schedule
    pub async fn run_now(&self, name: &str) -> Result<Value, SchedulerError> {
        let invocation = {
            let mut tasks = self.inner.lock_tasks();
            let task = tasks
                .get_mut(name)
                .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))?;
            if task.is_running() {
                return Err(SchedulerError::AlreadyRunning(name.to_string()));
            }
            task.begin()
        };
        self.inner
            .run_and_record(name, invocation)
            .await
            .map_err(|message| SchedulerError::TaskFailed {
                name: name.to_string(),
                message,
            })
    }

    /// Spawn the driver. Returns `false` if it is already running.
    pub fn start(&self) -> bool {
        let mut driver = self.inner.driver.lock().unwrap_or_else(|e| e.into_inner());
        if driver.is_some() {
            return false;
        }

        let signal = ShutdownCoordinator::shared();
        let stop = signal.clone();
        let scheduler = self.clone();
        let tick = self.inner.tick;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop.wait_for_shutdown() => break,
                    _ = ticker.tick() => {
                        scheduler.tick_at(Utc::now());
                    }
                }
            }
            debug!("Scheduler driver exiting");
        });

        info!(tick_ms = tick.as_millis() as u64, "Scheduler started");
        *driver = Some((signal, handle));
        true
    }

    /// Stop the driver and wait for it. In-flight runs finish on the pool.
    pub async fn stop(&self) {
        let driver = self.inner.driver.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some((signal, handle)) = driver {
            signal.request_shutdown();
            let _ = handle.await;
            info!("Scheduler stopped");
        }
    }

    /// Whether the driver is running
    pub fn is_running(&self) -> bool {
        self.inner.driver.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}
