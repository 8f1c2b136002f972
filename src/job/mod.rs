//! Typed bulk jobs
//!
//! A [`BulkJob`] validates its parameters at construction, then
//! `execute` moves it through the status machine while the strategy
//! for its [`JobKind`] drives collaborators and reports progress.

pub mod bulk;
pub mod kind;
pub mod progress;
pub mod record;
pub mod status;
pub mod strategy;

pub use bulk::BulkJob;
pub use kind::{JobKind, JobParameters};
pub use progress::{ProgressReporter, ProgressSnapshot};
pub use record::{JobRecord, RECORD_FORMAT_VERSION};
pub use status::JobStatus;
pub use strategy::{JobStrategy, StrategyContext, StrategyError};

/// Job errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Parameters rejected at construction
    #[error("invalid {kind} job: {message}")]
    Validation {
        /// Job kind
        kind: String,
        /// What is wrong
        message: String,
    },

    /// The strategy failed
    #[error("job {job_id} failed: {source}")]
    Execution {
        /// Job identifier
        job_id: String,
        /// Underlying failure
        #[source]
        source: StrategyError,
    },

    /// Status change not allowed from the current state
    #[error("job {job_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        /// Job identifier
        job_id: String,
        /// Current status
        from: JobStatus,
        /// Requested status
        to: JobStatus,
    },

    /// The job was canceled
    #[error("job {job_id} was canceled")]
    Canceled {
        /// Job identifier
        job_id: String,
    },

    /// Job record could not be read or written
    #[error("job record error: {0}")]
    Record(String),
}
