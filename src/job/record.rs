//! Persisted job records

use super::kind::{JobKind, JobParameters};
use super::status::JobStatus;
use super::JobError;
use crate::checkpoint::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Current job record format version
pub const RECORD_FORMAT_VERSION: &str = "1";

/// Everything needed to display or restore a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Record format version
    pub format_version: String,
    /// Job identifier
    pub id: String,
    /// Job kind
    pub kind: JobKind,
    /// Job parameters
    pub parameters: JobParameters,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Status at the time of the snapshot
    pub status: JobStatus,
    /// Completion percentage
    pub progress_percent: f64,
    /// Expected items
    pub total_items: u64,
    /// Items handled
    pub processed_items: u64,
    /// Items handled successfully
    pub succeeded_items: u64,
    /// Items that failed
    pub failed_items: u64,
    /// Execution start
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal state time
    pub ended_at: Option<DateTime<Utc>>,
    /// Failure message
    pub last_error: Option<String>,
    /// Kind-specific result summary
    pub result: Option<Value>,
}

impl JobRecord {
    /// Write the record atomically as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), JobError> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| JobError::Record(e.to_string()))?;
        write_atomic(path, &json).map_err(|e| JobError::Record(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), job_id = %self.id, "Job record saved");
        Ok(())
    }

    /// Read a record
    pub fn load(path: &Path) -> Result<Self, JobError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| JobError::Record(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&contents).map_err(|e| JobError::Record(format!("{}: {e}", path.display())))
    }

    /// Multi-line human-readable rendering
    pub fn format_human(&self) -> String {
        let mut lines = vec![
            format!("Job:         {}", self.id),
            format!("Kind:        {}", self.kind),
            format!("Status:      {}", self.status),
            format!(
                "Progress:    {:.1}% ({}/{} items, {} succeeded, {} failed)",
                self.progress_percent,
                self.processed_items,
                self.total_items,
                self.succeeded_items,
                self.failed_items
            ),
        ];
        if !self.description.is_empty() {
            lines.insert(1, format!("Description: {}", self.description));
        }
        if let Some(started) = self.started_at {
            lines.push(format!("Started:     {}", started.to_rfc3339()));
        }
        if let Some(ended) = self.ended_at {
            lines.push(format!("Ended:       {}", ended.to_rfc3339()));
            if let Some(started) = self.started_at {
                let secs = (ended - started).num_milliseconds().max(0) as f64 / 1000.0;
                lines.push(format!("Duration:    {secs:.1}s"));
            }
        }
        if let Some(error) = &self.last_error {
            lines.push(format!("Error:       {error}"));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record() -> JobRecord {
        JobRecord {
            format_version: RECORD_FORMAT_VERSION.to_string(),
            id: "import-20240101T000000-abcdef01".to_string(),
            kind: JobKind::Import,
            parameters: JobParameters::new()
                .with("source_type", "csv")
                .with("source_path", "/data/refs.csv"),
            description: "nightly import".to_string(),
            status: JobStatus::Failed,
            progress_percent: 40.0,
            total_items: 10,
            processed_items: 4,
            succeeded_items: 3,
            failed_items: 1,
            started_at: Some(Utc::now()),
            ended_at: Some(Utc::now()),
            last_error: Some("importer crashed".to_string()),
            result: Some(json!({ "imported": 3 })),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records").join("job.json");
        let original = record();

        original.save(&path).unwrap();
        assert_eq!(JobRecord::load(&path).unwrap(), original);
    }

    #[test]
    fn test_wire_names() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(value["kind"], "import");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["parameters"]["source_type"], "csv");
    }

    #[test]
    fn test_human_format() {
        let text = record().format_human();
        assert!(text.contains("Status:      failed"));
        assert!(text.contains("Description: nightly import"));
        assert!(text.contains("Error:       importer crashed"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            JobRecord::load(&dir.path().join("nope.json")),
            Err(JobError::Record(_))
        ));
    }
}
