//! # Ingest Orchestrator Library
//!
//! Bulk task orchestration with checkpointed, resumable execution for
//! document ingestion pipelines.
//!
//! ## Features
//!
//! - **Typed Bulk Jobs**: Download, OCR, entity extraction, import, export,
//!   maintenance and custom kinds, validated at construction
//! - **Completion Monitoring**: Sub-tasks in external systems are polled (and
//!   optionally event-driven) until terminal, under a wall-clock ceiling
//! - **Resumable Downloads**: Per-source, per-period checkpoints with atomic
//!   writes and exclusive file locks
//! - **Polite Fetching**: Jittered request pacing and capped exponential backoff
//! - **Background Scheduler**: Interval tasks on a bounded worker pool
//!
//! ## Quick Start
//!
//! ```no_run
//! use ingest_orchestrator::collaborator::Collaborators;
//! use ingest_orchestrator::config::EngineConfig;
//! use ingest_orchestrator::job::{BulkJob, JobKind, JobParameters};
//!
//! # async fn example(collaborators: Collaborators) -> Result<(), Box<dyn std::error::Error>> {
//! let job = BulkJob::new(
//!     JobKind::Ocr,
//!     JobParameters::new().with("document_ids", serde_json::json!(["doc-1", "doc-2"])),
//!     "nightly OCR",
//! )?;
//! let result = job.execute(&collaborators, &EngineConfig::default()).await?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`job`] - Bulk job lifecycle, parameters, progress and strategies
//! - [`monitor`] - Sub-task completion monitor
//! - [`collaborator`] - Contracts for the systems doing the actual work
//! - [`downloader`] - Built-in date-range downloader
//! - [`fetcher`] - Rate-limited, retrying fetch primitive
//! - [`checkpoint`] - Durable download progress
//! - [`scheduler`] - Interval-based background scheduler
//! - [`pool`] - Bounded worker pool

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Durable, versioned download checkpoints
pub mod checkpoint;

/// CLI command implementations
pub mod cli;

/// Collaborator contracts
pub mod collaborator;

/// Engine configuration
pub mod config;

/// Built-in date-range downloader
pub mod downloader;

/// Rate-limited, retrying fetcher
pub mod fetcher;

/// Bulk jobs and their strategies
pub mod job;

/// Observability metrics
pub mod metrics;

/// Completion monitoring of sub-tasks
pub mod monitor;

/// Bounded worker pool
pub mod pool;

/// Interval-based background scheduler
pub mod scheduler;

/// Graceful shutdown and cancellation signals
pub mod shutdown;

pub use collaborator::{Collaborators, SubTaskState, SubTaskStatus, TaskId};
pub use config::EngineConfig;
pub use job::{BulkJob, JobError, JobKind, JobParameters, JobStatus};
pub use scheduler::JobScheduler;
