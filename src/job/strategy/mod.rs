//! One execution strategy per [`JobKind`]

mod custom;
mod download;
mod export;
mod extraction;
mod import;
mod maintenance;
mod ocr;

pub use custom::CustomStrategy;
pub use download::{plan_periods, DownloadStrategy};
pub use export::ExportStrategy;
pub use extraction::EntityExtractionStrategy;
pub use import::ImportStrategy;
pub use maintenance::MaintenanceStrategy;
pub use ocr::OcrStrategy;

use super::kind::{JobKind, JobParameters};
use super::progress::ProgressReporter;
use crate::collaborator::{CollaboratorError, Collaborators, TaskId};
use crate::config::EngineConfig;
use crate::monitor::{CompletionMonitor, MonitorError, MonitorReport};
use crate::shutdown::SharedShutdown;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Failed item identifiers kept in a result payload
pub const FAILURE_SAMPLE_SIZE: usize = 10;

/// Everything a strategy may touch while running
pub struct StrategyContext<'a> {
    /// Owning job identifier
    pub job_id: &'a str,
    /// Validated parameters
    pub parameters: &'a JobParameters,
    /// Available collaborators
    pub collaborators: &'a Collaborators,
    /// Engine settings
    pub config: &'a EngineConfig,
    /// The job's progress counters
    pub progress: &'a ProgressReporter,
    /// The job's cancel signal
    pub cancel: &'a SharedShutdown,
    /// Monitor configured for this engine
    pub monitor: CompletionMonitor,
}

/// Executes one kind of job
#[async_trait]
pub trait JobStrategy: Send + Sync {
    /// Run to completion and return the result summary
    async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<Value, StrategyError>;
}

/// Strategy failures
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    /// The job needs a collaborator that is not configured
    #[error("no {0} collaborator configured")]
    MissingCollaborator(&'static str),

    /// No handler registered for a custom kind
    #[error("no handler registered for job kind '{0}'")]
    UnknownHandler(String),

    /// Parameter problem found at execution time
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Collaborator call failed
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// Completion monitoring failed
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    /// Every sub-task failed
    #[error("all {count} sub-task(s) failed: {first_error}")]
    AllSubTasksFailed {
        /// Sub-tasks created
        count: usize,
        /// Error of the first failed sub-task
        first_error: String,
    },
}

/// Strategy for a kind
pub fn strategy_for(kind: &JobKind) -> Box<dyn JobStrategy> {
    match kind {
        JobKind::Download => Box::new(DownloadStrategy),
        JobKind::Ocr => Box::new(OcrStrategy),
        JobKind::EntityExtraction => Box::new(EntityExtractionStrategy),
        JobKind::Import => Box::new(ImportStrategy),
        JobKind::Export => Box::new(ExportStrategy),
        JobKind::Maintenance => Box::new(MaintenanceStrategy),
        JobKind::Custom(name) => Box::new(CustomStrategy::new(name.clone())),
    }
}

/// `{ "sample": [first 10], "remaining": n }`
pub fn failure_payload(failed: &[String]) -> Value {
    let sample: Vec<&String> = failed.iter().take(FAILURE_SAMPLE_SIZE).collect();
    json!({
        "sample": sample,
        "remaining": failed.len().saturating_sub(FAILURE_SAMPLE_SIZE),
    })
}

/// Keys whose sub-task did not complete, in submission order
fn failed_keys(report: &MonitorReport, handles: &[(String, TaskId)]) -> Vec<String> {
    handles
        .iter()
        .filter(|(_, id)| {
            report
                .statuses
                .get(id)
                .map(|s| !s.state.is_success())
                .unwrap_or(true)
        })
        .map(|(key, _)| key.clone())
        .collect()
}

/// Fail when every monitored sub-task failed
fn ensure_not_all_failed(report: &MonitorReport) -> Result<(), StrategyError> {
    if !report.all_failed() {
        return Ok(());
    }
    let first_error = report
        .errors()
        .into_iter()
        .next()
        .map(|(id, e)| format!("{id}: {e}"))
        .unwrap_or_else(|| "no error reported".to_string());
    Err(StrategyError::AllSubTasksFailed {
        count: report.statuses.len(),
        first_error,
    })
}
