//! Progress counters shared between a running job and its readers.
//!
//! Counters live behind one lock so a reader never sees
//! `processed != succeeded + failed`. Counters and the percentage only
//! move forward while a job runs.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Point-in-time copy of a job's progress
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Items the job will handle (0 until known)
    pub total_items: u64,
    /// Items handled so far
    pub processed_items: u64,
    /// Items handled successfully
    pub succeeded_items: u64,
    /// Items that failed
    pub failed_items: u64,
    /// Completion percentage, 0-100
    pub progress_percent: f64,
}

impl ProgressSnapshot {
    /// Human-readable one-liner
    pub fn format(&self) -> String {
        format!(
            "{:.1}% ({}/{} items, {} failed)",
            self.progress_percent, self.processed_items, self.total_items, self.failed_items
        )
    }
}

/// Cloneable handle used to update a job's progress.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    inner: Arc<RwLock<ProgressSnapshot>>,
}

impl ProgressReporter {
    /// Fresh reporter with zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current counters
    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Grow the expected item count
    pub fn add_total(&self, items: u64) {
        self.update(|p| p.total_items = p.total_items.saturating_add(items));
    }

    /// Count handled items
    pub fn record(&self, succeeded: u64, failed: u64) {
        self.update(|p| {
            p.succeeded_items = p.succeeded_items.saturating_add(succeeded);
            p.failed_items = p.failed_items.saturating_add(failed);
        });
    }

    /// Raise the counters to absolute item-level figures.
    ///
    /// Values lower than the current ones are ignored, so a late or partial
    /// report never moves progress backwards.
    pub fn set_item_counts(&self, total: u64, succeeded: u64, failed: u64) {
        self.update(|p| {
            p.total_items = total;
            p.succeeded_items = succeeded;
            p.failed_items = failed;
        });
    }

    /// Raise the percentage directly (ignored if lower than the current value)
    pub fn set_percent(&self, percent: f64) {
        self.update(|p| p.progress_percent = percent);
    }

    /// Mark everything done
    pub fn complete(&self) {
        self.update(|p| p.progress_percent = 100.0);
    }

    fn update(&self, apply: impl FnOnce(&mut ProgressSnapshot)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let previous = *guard;
        let previous_percent = previous.progress_percent;
        apply(&mut guard);

        guard.succeeded_items = guard.succeeded_items.max(previous.succeeded_items);
        guard.failed_items = guard.failed_items.max(previous.failed_items);
        guard.total_items = guard.total_items.max(previous.total_items);
        guard.processed_items = guard.succeeded_items + guard.failed_items;
        if guard.total_items < guard.processed_items {
            guard.total_items = guard.processed_items;
        }

        let derived = if guard.total_items == 0 {
            0.0
        } else {
            guard.processed_items as f64 / guard.total_items as f64 * 100.0
        };
        let requested = if guard.progress_percent.is_finite() {
            guard.progress_percent
        } else {
            previous_percent
        };
        guard.progress_percent = previous_percent.max(requested).max(derived).clamp(0.0, 100.0);
    }
}
