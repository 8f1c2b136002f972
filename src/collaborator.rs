//! Contracts for the systems that do the actual work
//!
//! Strategies create sub-tasks in these collaborators and hand the
//! returned [`TaskId`]s to the completion monitor. The monitor only reads
//! sub-task status; collaborators own their records.

use crate::job::{JobParameters, ProgressReporter};
use crate::shutdown::SharedShutdown;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Opaque sub-task handle issued by a collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    /// Fresh random handle with a readable prefix
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Handle as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Sub-task lifecycle as reported by a collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskState {
    /// Accepted, not started
    #[default]
    Pending,
    /// Being worked on
    Running,
    /// Finished; individual items may still have failed
    Completed,
    /// Finished without doing its work
    Failed,
    /// Stopped before finishing
    Canceled,
}

impl SubTaskState {
    /// Whether the sub-task will not change any more
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Whether the monitor counts it as a success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Point-in-time view of one sub-task
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubTaskStatus {
    /// Lifecycle state
    pub state: SubTaskState,
    /// Items handled so far
    pub items_processed: u64,
    /// Items handled successfully
    pub items_succeeded: u64,
    /// Items that failed
    pub items_failed: u64,
    /// Identifiers of the failed items
    pub failed_items: Vec<String>,
    /// Sub-task level error, if any
    pub error: Option<String>,
}

impl SubTaskStatus {
    /// Status in the given state with zeroed counters
    pub fn with_state(state: SubTaskState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }
}

/// Errors raised by collaborators
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    /// Handle was never issued by this collaborator
    #[error("unknown sub-task: {0}")]
    UnknownTask(TaskId),

    /// Request refused (bad input, not started, queue full)
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Work failed
    #[error("{0}")]
    Failed(String),
}

/// Anything whose sub-tasks can be monitored
#[async_trait]
pub trait SubTaskSystem: Send + Sync {
    /// Current status of a sub-task
    async fn task_status(&self, id: &TaskId) -> Result<SubTaskStatus, CollaboratorError>;

    /// Completion notifications, when the collaborator can push them.
    ///
    /// The monitor still polls; events only shorten the wait.
    fn completion_events(&self) -> Option<broadcast::Receiver<TaskId>> {
        None
    }
}

/// Download of dated items for one source over one period
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Source identifier
    pub source_id: String,
    /// Period label, part of the checkpoint fingerprint
    pub period: String,
    /// Dates to fetch, in order
    pub dates: Vec<NaiveDate>,
    /// Job-level cancel signal checked between items
    pub cancel: Option<SharedShutdown>,
}

/// OCR of one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrRequest {
    /// Document identifier
    pub document_id: String,
    /// OCR language hint
    pub language: Option<String>,
}

/// Entity extraction over one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    /// Document identifier
    pub document_id: String,
    /// Entity types to extract; empty means all
    pub entity_types: Vec<String>,
}

/// Bulk import from an external source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Importer-defined source kind (e.g. `csv`, `zotero`)
    pub source_type: String,
    /// Where to read from
    pub source_path: String,
    /// Importer-specific options
    pub options: serde_json::Map<String, Value>,
}

/// Bulk export to a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Output format (e.g. `json`, `csv`)
    pub format: String,
    /// Destination path
    pub output_path: String,
    /// Optional record filter
    pub filter: Option<Value>,
}

/// Downloader of dated, paginated sources
#[async_trait]
pub trait Downloader: SubTaskSystem {
    /// Register a download sub-task
    async fn add_task(&self, request: DownloadRequest) -> Result<TaskId, CollaboratorError>;
    /// Begin accepting and running sub-tasks. Idempotent.
    async fn start(&self) -> Result<(), CollaboratorError>;
    /// Stop accepting sub-tasks; running ones end at the next item boundary
    async fn stop(&self);
}

/// OCR engine
#[async_trait]
pub trait OcrProcessor: SubTaskSystem {
    /// Queue one document
    async fn add_task(&self, request: OcrRequest) -> Result<TaskId, CollaboratorError>;
}

/// Named-entity extractor
#[async_trait]
pub trait EntityExtractor: SubTaskSystem {
    /// Queue one document
    async fn add_task(&self, request: ExtractionRequest) -> Result<TaskId, CollaboratorError>;
}

/// Bulk importer
#[async_trait]
pub trait Importer: SubTaskSystem {
    /// Queue one import
    async fn add_task(&self, request: ImportRequest) -> Result<TaskId, CollaboratorError>;
}

/// Bulk exporter
#[async_trait]
pub trait Exporter: SubTaskSystem {
    /// Queue one export
    async fn add_task(&self, request: ExportRequest) -> Result<TaskId, CollaboratorError>;
}

/// Database maintenance operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceOperation {
    /// Reclaim free pages
    Vacuum,
    /// Rebuild indexes
    Reindex,
    /// Rebuild the full-text index
    RebuildSearchIndex,
    /// Remove rows with dangling references
    PurgeOrphans,
    /// Copy the database aside
    Backup,
}

impl MaintenanceOperation {
    /// All operations, in display order
    pub const ALL: [Self; 5] = [
        Self::Vacuum,
        Self::Reindex,
        Self::RebuildSearchIndex,
        Self::PurgeOrphans,
        Self::Backup,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vacuum => "vacuum",
            Self::Reindex => "reindex",
            Self::RebuildSearchIndex => "rebuild_search_index",
            Self::PurgeOrphans => "purge_orphans",
            Self::Backup => "backup",
        }
    }
}

impl fmt::Display for MaintenanceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaintenanceOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|op| op.as_str()).collect();
                format!("unknown maintenance operation '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

/// Database maintenance runner. Runs to completion before returning.
#[async_trait]
pub trait DatabaseMaintenance: Send + Sync {
    /// Run one operation and return its report
    async fn run_operation(&self, operation: MaintenanceOperation) -> Result<Value, CollaboratorError>;
}

/// Handler for a custom job kind
#[async_trait]
pub trait CustomHandler: Send + Sync {
    /// Run the job, reporting progress as it goes
    async fn run(
        &self,
        parameters: &JobParameters,
        progress: &ProgressReporter,
    ) -> Result<Value, CollaboratorError>;
}

/// The set of collaborators available to jobs
#[derive(Clone, Default)]
pub struct Collaborators {
    /// Download collaborator
    pub downloader: Option<Arc<dyn Downloader>>,
    /// OCR collaborator
    pub ocr: Option<Arc<dyn OcrProcessor>>,
    /// Entity extraction collaborator
    pub extractor: Option<Arc<dyn EntityExtractor>>,
    /// Import collaborator
    pub importer: Option<Arc<dyn Importer>>,
    /// Export collaborator
    pub exporter: Option<Arc<dyn Exporter>>,
    /// Maintenance collaborator
    pub maintenance: Option<Arc<dyn DatabaseMaintenance>>,
    /// Custom handlers by kind name
    pub custom: HashMap<String, Arc<dyn CustomHandler>>,
}

impl Collaborators {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the downloader
    pub fn with_downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Set the OCR processor
    pub fn with_ocr(mut self, ocr: Arc<dyn OcrProcessor>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Set the entity extractor
    pub fn with_extractor(mut self, extractor: Arc<dyn EntityExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Set the importer
    pub fn with_importer(mut self, importer: Arc<dyn Importer>) -> Self {
        self.importer = Some(importer);
        self
    }

    /// Set the exporter
    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Set the maintenance runner
    pub fn with_maintenance(mut self, maintenance: Arc<dyn DatabaseMaintenance>) -> Self {
        self.maintenance = Some(maintenance);
        self
    }

    /// Register a custom handler
    pub fn with_custom(mut self, name: impl Into<String>, handler: Arc<dyn CustomHandler>) -> Self {
        self.custom.insert(name.into(), handler);
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut custom: Vec<_> = self.custom.keys().collect();
        custom.sort();
        f.debug_struct("Collaborators")
            .field("downloader", &self.downloader.is_some())
            .field("ocr", &self.ocr.is_some())
            .field("extractor", &self.extractor.is_some())
            .field("importer", &self.importer.is_some())
            .field("exporter", &self.exporter.is_some())
            .field("maintenance", &self.maintenance.is_some())
            .field("custom", &custom)
            .finish()
    }
}
