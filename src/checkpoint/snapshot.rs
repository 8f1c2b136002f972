//! Checkpoint contents
//!
//! A [`Checkpoint`] records which items of one (source, period) pair have
//! been checked, which of those produced artifacts, and where the
//! artifacts were written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Current checkpoint schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Identity of a download sub-task: one source over one period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Source identifier
    pub source_id: String,
    /// Period label, e.g. `"2024"`
    pub period: String,
}

impl Fingerprint {
    /// Create a fingerprint
    pub fn new(source_id: impl Into<String>, period: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            period: period.into(),
        }
    }

    /// File-name-safe stem: `"{source_id}_{period}"`
    pub fn file_stem(&self) -> String {
        format!("{}_{}", path_component(&self.source_id), path_component(&self.period))
    }
}

/// `s` as a single path component: anything outside `[A-Za-z0-9.-]`
/// becomes `-`, and a dots-only name cannot climb out of its directory.
pub fn path_component(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        "-".repeat(cleaned.len().max(1))
    } else {
        cleaned
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.period)
    }
}

/// Persisted progress of one download sub-task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    schema_version: String,
    fingerprint: Fingerprint,
    items_checked: BTreeSet<String>,
    items_succeeded: BTreeSet<String>,
    files_by_item: BTreeMap<String, Vec<PathBuf>>,
    total_files_written: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_request_at: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Fresh checkpoint with nothing checked
    pub fn new(fingerprint: Fingerprint) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            fingerprint,
            items_checked: BTreeSet::new(),
            items_succeeded: BTreeSet::new(),
            files_by_item: BTreeMap::new(),
            total_files_written: 0,
            last_request_at: None,
            started_at: now,
            last_updated_at: now,
        }
    }

    /// Format version the file was written with
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Owning fingerprint
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Items with a definitive answer (found or absent)
    pub fn items_checked(&self) -> &BTreeSet<String> {
        &self.items_checked
    }

    /// Items that produced at least one artifact
    pub fn items_succeeded(&self) -> &BTreeSet<String> {
        &self.items_succeeded
    }

    /// Artifacts written per item, in write order
    pub fn files_by_item(&self) -> &BTreeMap<String, Vec<PathBuf>> {
        &self.files_by_item
    }

    /// Total artifacts written across all runs
    pub fn total_files_written(&self) -> u64 {
        self.total_files_written
    }

    /// Time of the most recent network request
    pub fn last_request_at(&self) -> Option<DateTime<Utc>> {
        self.last_request_at
    }

    /// When the checkpoint was first created
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the checkpoint was last mutated
    pub fn last_updated_at(&self) -> DateTime<Utc> {
        self.last_updated_at
    }

    /// Whether the item already has a definitive answer
    pub fn is_checked(&self, item: &str) -> bool {
        self.items_checked.contains(item)
    }

    /// Record an item as checked but absent at the source
    pub fn mark_absent(&mut self, item: impl Into<String>) {
        self.items_checked.insert(item.into());
        self.touch();
    }

    /// Record an item as checked with its artifacts.
    ///
    /// Keeps `items_succeeded ⊆ items_checked` by inserting into both.
    pub fn mark_succeeded(&mut self, item: impl Into<String>, files: Vec<PathBuf>) {
        let item = item.into();
        self.total_files_written += files.len() as u64;
        self.files_by_item.entry(item.clone()).or_default().extend(files);
        self.items_checked.insert(item.clone());
        self.items_succeeded.insert(item);
        self.touch();
    }

    /// Note that a request was just sent
    pub fn record_request(&mut self) {
        let now = Utc::now();
        self.last_request_at = Some(now);
        self.last_updated_at = now;
    }

    /// Items checked but absent at the source
    pub fn absent_count(&self) -> usize {
        self.items_checked.len().saturating_sub(self.items_succeeded.len())
    }

    /// First succeeded item that was never recorded as checked
    pub fn unchecked_success(&self) -> Option<&str> {
        self.items_succeeded
            .difference(&self.items_checked)
            .next()
            .map(String::as_str)
    }

    /// Human-readable summary
    pub fn summary(&self) -> CheckpointSummary {
        let elapsed = self.last_updated_at - self.started_at;
        CheckpointSummary {
            fingerprint: self.fingerprint.to_string(),
            items_checked: self.items_checked.len(),
            items_succeeded: self.items_succeeded.len(),
            items_absent: self.absent_count(),
            total_files_written: self.total_files_written,
            elapsed_secs: elapsed.num_milliseconds().max(0) as f64 / 1000.0,
            started_at: self.started_at,
            last_updated_at: self.last_updated_at,
        }
    }

    fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }
}

/// Summary written next to each checkpoint for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    /// `"{source_id}:{period}"`
    pub fingerprint: String,
    /// Items with a definitive answer
    pub items_checked: usize,
    /// Items that produced artifacts
    pub items_succeeded: usize,
    /// Items confirmed absent
    pub items_absent: usize,
    /// Artifacts written
    pub total_files_written: u64,
    /// Seconds between creation and last update
    pub elapsed_secs: f64,
    /// Creation time
    pub started_at: DateTime<Utc>,
    /// Last update time
    pub last_updated_at: DateTime<Utc>,
}

impl fmt::Display for CheckpointSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} checked ({} with files, {} absent), {} files, {:.0}s elapsed, updated {}",
            self.fingerprint,
            self.items_checked,
            self.items_succeeded,
            self.items_absent,
            self.total_files_written,
            self.elapsed_secs,
            self.last_updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}
