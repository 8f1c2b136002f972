//! CLI error types and conversions

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::downloader::DownloaderError;
use crate::fetcher::FetchError;
use crate::job::JobError;
use crate::metrics::MetricsError;
use crate::scheduler::SchedulerError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Job error
    #[error("{0}")]
    Job(#[from] JobError),

    /// Checkpoint error
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Scheduler error
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Downloader setup error
    #[error("downloader error: {0}")]
    Downloader(#[from] DownloaderError),

    /// HTTP client setup error
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Output could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
