//! Scheduled task records

use crate::pool::panic_message;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Future returned by a task callable
pub type TaskFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// Callable invoked on every run
pub type TaskCallable = Arc<dyn Fn(TaskArgs) -> TaskFuture + Send + Sync>;

/// Arguments handed to the callable on each run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskArgs {
    /// Positional arguments
    pub args: Vec<Value>,
    /// Named arguments
    pub kwargs: Map<String, Value>,
}

impl TaskArgs {
    /// Named argument, if present
    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }
}

/// A recurring task and its bookkeeping.
pub struct ScheduledTask {
    name: String,
    callable: TaskCallable,
    interval: chrono::Duration,
    args: TaskArgs,
    enabled: bool,
    running: bool,
    last_run: Option<DateTime<Utc>>,
    next_run: DateTime<Utc>,
    last_error: Option<String>,
    last_result: Option<Value>,
    run_count: u64,
    failure_count: u64,
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("enabled", &self.enabled)
            .field("running", &self.running)
            .field("next_run", &self.next_run)
            .finish_non_exhaustive()
    }
}

impl ScheduledTask {
    /// New enabled task, first due one interval after `now`
    pub fn new(
        name: impl Into<String>,
        interval: chrono::Duration,
        callable: TaskCallable,
        args: TaskArgs,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            callable,
            interval,
            args,
            enabled: true,
            running: false,
            last_run: None,
            next_run: now + interval,
            last_error: None,
            last_result: None,
            run_count: 0,
            failure_count: 0,
        }
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a run should start at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && !self.running && now >= self.next_run
    }

    /// Whether a run is in flight
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Mark running and build the invocation.
    ///
    /// A callable that panics before handing back its future yields a future
    /// that fails at once, so the panic is recorded like any other failure.
    pub(crate) fn begin(&mut self) -> TaskFuture {
        self.running = true;
        let callable = &self.callable;
        let args = self.args.clone();
        match std::panic::catch_unwind(AssertUnwindSafe(|| callable(args))) {
            Ok(invocation) => invocation,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                Box::pin(async move { Err::<Value, _>(anyhow::anyhow!("panicked: {message}")) })
            }
        }
    }

    /// Undo [`Self::begin`] when the run could not be queued
    pub(crate) fn abort(&mut self) {
        self.running = false;
    }

    /// Record a finished run. The next run is one interval after this one,
    /// whatever the outcome.
    pub(crate) fn finish(&mut self, outcome: &Result<Value, String>, finished_at: DateTime<Utc>) {
        self.running = false;
        self.run_count += 1;
        self.last_run = Some(finished_at);
        self.next_run = finished_at + self.interval;
        match outcome {
            Ok(value) => {
                self.last_result = Some(value.clone());
                self.last_error = None;
            }
            Err(e) => {
                self.failure_count += 1;
                self.last_error = Some(e.clone());
            }
        }
    }

    /// Snapshot for reporting
    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            name: self.name.clone(),
            interval_secs: self.interval.num_seconds(),
            enabled: self.enabled,
            running: self.running,
            last_run: self.last_run,
            next_run: self.next_run,
            last_error: self.last_error.clone(),
            last_result: self.last_result.clone(),
            run_count: self.run_count,
            failure_count: self.failure_count,
        }
    }
}

/// Reportable view of a [`ScheduledTask`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Task name
    pub name: String,
    /// Seconds between runs
    pub interval_secs: i64,
    /// Whether the task fires
    pub enabled: bool,
    /// Whether a run is in flight
    pub running: bool,
    /// End of the last run
    pub last_run: Option<DateTime<Utc>>,
    /// When the task is next due
    pub next_run: DateTime<Utc>,
    /// Error of the last run, if it failed
    pub last_error: Option<String>,
    /// Result of the last successful run
    pub last_result: Option<Value>,
    /// Runs finished
    pub run_count: u64,
    /// Runs that failed
    pub failure_count: u64,
}
