//! Completion monitor for collaborator sub-tasks
//!
//! Polls every pending handle on a fixed cadence and folds item counts
//! into the job's progress, including partial counts from sub-tasks that
//! are still running. Collaborators that publish completion events wake
//! the monitor early; polling remains the fallback.

use crate::collaborator::{SubTaskStatus, SubTaskSystem, TaskId};
use crate::config::MonitorConfig;
use crate::job::{ProgressReporter, ProgressSnapshot};
use crate::shutdown::ShutdownCoordinator;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Final view of a monitored batch
#[derive(Debug, Clone, Default)]
pub struct MonitorReport {
    /// Terminal status of every handle
    pub statuses: BTreeMap<TaskId, SubTaskStatus>,
    /// Handles that completed
    pub succeeded: usize,
    /// Handles that failed or were canceled
    pub failed: usize,
    /// Time spent waiting
    pub elapsed: Duration,
}

impl MonitorReport {
    /// Item-level failures across all sub-tasks, in handle order
    pub fn failed_items(&self) -> Vec<String> {
        self.statuses
            .values()
            .flat_map(|s| s.failed_items.iter().cloned())
            .collect()
    }

    /// Sub-task level errors, keyed by handle
    pub fn errors(&self) -> Vec<(TaskId, String)> {
        self.statuses
            .iter()
            .filter_map(|(id, s)| s.error.clone().map(|e| (id.clone(), e)))
            .collect()
    }

    /// Whether every monitored handle failed
    pub fn all_failed(&self) -> bool {
        !self.statuses.is_empty() && self.succeeded == 0
    }
}

/// Monitor errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum MonitorError {
    /// Ceiling reached with handles still pending
    #[error("timed out after {elapsed:?} with {pending} sub-task(s) still pending")]
    TimedOut {
        /// Handles not yet terminal
        pending: usize,
        /// Time waited
        elapsed: Duration,
    },

    /// Owning job was canceled
    #[error("monitoring canceled")]
    Canceled,
}

/// Waits for a batch of sub-tasks to finish.
#[derive(Debug, Clone, Copy)]
pub struct CompletionMonitor {
    poll_interval: Duration,
    timeout: Duration,
}

impl CompletionMonitor {
    /// Create a monitor
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// Create a monitor from settings
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.poll_interval(), config.timeout())
    }

    /// Poll interval
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wall-clock ceiling
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait until every handle is terminal.
    ///
    /// Each handle counts as one expected item until it reports item
    /// counts of its own.
    pub async fn wait<S>(
        &self,
        system: &S,
        handles: &[TaskId],
        progress: &ProgressReporter,
        cancel: &ShutdownCoordinator,
    ) -> Result<MonitorReport, MonitorError>
    where
        S: SubTaskSystem + ?Sized,
    {
        self.wait_expecting(system, handles, 0, progress, cancel).await
    }

    /// Wait until every handle is terminal, with a known item total.
    ///
    /// `expected_items` is added to the job total up front; counts reported
    /// by the sub-tasks raise it further if they exceed it. Progress is
    /// refreshed after every poll cycle and never moves backwards.
    pub async fn wait_expecting<S>(
        &self,
        system: &S,
        handles: &[TaskId],
        expected_items: u64,
        progress: &ProgressReporter,
        cancel: &ShutdownCoordinator,
    ) -> Result<MonitorReport, MonitorError>
    where
        S: SubTaskSystem + ?Sized,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut events = system.completion_events();

        let baseline = progress.snapshot();
        let mut tallies: HashMap<TaskId, ItemTally> = handles
            .iter()
            .map(|id| (id.clone(), ItemTally::unreported()))
            .collect();
        fold_progress(progress, &baseline, &tallies, expected_items);

        let mut pending: Vec<TaskId> = handles.to_vec();
        let mut report = MonitorReport::default();

        loop {
            let mut still_pending = Vec::with_capacity(pending.len());
            for id in pending {
                let polled = system.task_status(&id).await;
                if let (Ok(status), Some(tally)) = (&polled, tallies.get_mut(&id)) {
                    tally.raise(ItemTally::from_status(status));
                }
                match polled {
                    Ok(status) if status.state.is_terminal() => {
                        debug!(task_id = %id, state = ?status.state, "Sub-task finished");
                        if status.state.is_success() {
                            report.succeeded += 1;
                        } else {
                            report.failed += 1;
                        }
                        report.statuses.insert(id, status);
                    }
                    Ok(_) => still_pending.push(id),
                    Err(e) => {
                        warn!(task_id = %id, error = %e, "Sub-task status poll failed");
                        still_pending.push(id);
                    }
                }
            }
            pending = still_pending;

            fold_progress(progress, &baseline, &tallies, expected_items);

            if pending.is_empty() {
                report.elapsed = start.elapsed();
                info!(
                    succeeded = report.succeeded,
                    failed = report.failed,
                    elapsed_secs = report.elapsed.as_secs_f64(),
                    "All sub-tasks finished"
                );
                return Ok(report);
            }
            if cancel.is_shutdown_requested() {
                return Err(MonitorError::Canceled);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(pending = pending.len(), "Completion monitor timed out");
                return Err(MonitorError::TimedOut {
                    pending: pending.len(),
                    elapsed: now - start,
                });
            }

            let wake_at = (now + self.poll_interval).min(deadline);
            tokio::select! {
                _ = tokio::time::sleep_until(wake_at) => {}
                _ = cancel.wait_for_shutdown() => {}
                id = next_event(&mut events) => {
                    debug!(task_id = %id, "Completion event received");
                }
            }
        }
    }
}

/// Item counts attributed to one handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ItemTally {
    succeeded: u64,
    failed: u64,
    expected: u64,
}

impl ItemTally {
    /// A handle that has not reported anything yet stands for one item
    fn unreported() -> Self {
        Self {
            succeeded: 0,
            failed: 0,
            expected: 1,
        }
    }

    fn from_status(status: &SubTaskStatus) -> Self {
        let failed = status.items_failed;
        let succeeded = status
            .items_succeeded
            .max(status.items_processed.saturating_sub(failed));
        let counted = succeeded.saturating_add(failed);
        let terminal = status.state.is_terminal();

        if counted == 0 {
            return match (terminal, status.state.is_success()) {
                (false, _) => Self::unreported(),
                (true, true) => Self {
                    succeeded: 1,
                    failed: 0,
                    expected: 1,
                },
                (true, false) => Self {
                    succeeded: 0,
                    failed: 1,
                    expected: 1,
                },
            };
        }
        // A running sub-task has at least one item still outstanding
        let expected = if terminal { counted } else { counted.saturating_add(1) };
        Self {
            succeeded,
            failed,
            expected,
        }
    }

    fn raise(&mut self, other: ItemTally) {
        self.succeeded = self.succeeded.max(other.succeeded);
        self.failed = self.failed.max(other.failed);
        self.expected = self.expected.max(other.expected);
    }
}

fn fold_progress(
    progress: &ProgressReporter,
    baseline: &ProgressSnapshot,
    tallies: &HashMap<TaskId, ItemTally>,
    expected_items: u64,
) {
    let (succeeded, failed, expected) = tallies.values().fold((0u64, 0u64, 0u64), |acc, t| {
        (
            acc.0.saturating_add(t.succeeded),
            acc.1.saturating_add(t.failed),
            acc.2.saturating_add(t.expected),
        )
    });
    progress.set_item_counts(
        baseline.total_items.saturating_add(expected.max(expected_items)),
        baseline.succeeded_items.saturating_add(succeeded),
        baseline.failed_items.saturating_add(failed),
    );
}

/// Next completion event, or never if the collaborator has none.
async fn next_event(events: &mut Option<broadcast::Receiver<TaskId>>) -> TaskId {
    loop {
        let Some(rx) = events.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Ok(id) => return id,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Completion events lagged, polling will catch up");
                return TaskId(String::new());
            }
            Err(broadcast::error::RecvError::Closed) => *events = None,
        }
    }
}
