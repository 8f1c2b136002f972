//! Bulk job lifecycle

use super::kind::{JobKind, JobParameters};
use super::progress::{ProgressReporter, ProgressSnapshot};
use super::record::{JobRecord, RECORD_FORMAT_VERSION};
use super::status::JobStatus;
use super::strategy::{strategy_for, StrategyContext};
use super::JobError;
use crate::collaborator::Collaborators;
use crate::config::EngineConfig;
use crate::monitor::CompletionMonitor;
use crate::shutdown::{ShutdownCoordinator, SharedShutdown};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn, Instrument};

/// Mutable lifecycle fields, guarded together
#[derive(Debug, Clone, Default)]
struct JobState {
    status: JobStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    result: Option<Value>,
}

/// A long-running unit of work of one [`JobKind`].
///
/// Clones share state, so a clone handed to another task observes live
/// status and progress.
#[derive(Debug, Clone)]
pub struct BulkJob {
    id: String,
    kind: JobKind,
    parameters: JobParameters,
    description: String,
    state: Arc<RwLock<JobState>>,
    progress: ProgressReporter,
    cancel: SharedShutdown,
}

impl BulkJob {
    /// Create a job, validating parameters for its kind.
    pub fn new(
        kind: JobKind,
        parameters: JobParameters,
        description: impl Into<String>,
    ) -> Result<Self, JobError> {
        kind.validate(&parameters)?;
        let id = generate_job_id(&kind, Utc::now());
        Ok(Self {
            id,
            kind,
            parameters,
            description: description.into(),
            state: Arc::new(RwLock::new(JobState::default())),
            progress: ProgressReporter::new(),
            cancel: ShutdownCoordinator::shared(),
        })
    }

    /// Job identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Job kind
    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    /// Validated parameters
    pub fn parameters(&self) -> &JobParameters {
        &self.parameters
    }

    /// Free-form description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Current status
    pub fn status(&self) -> JobStatus {
        self.read().status
    }

    /// Current progress counters
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// When execution began
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.read().started_at
    }

    /// When the job reached a terminal state
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.read().ended_at
    }

    /// Error that failed the job
    pub fn last_error(&self) -> Option<String> {
        self.read().last_error.clone()
    }

    /// Kind-specific result summary
    pub fn result(&self) -> Option<Value> {
        self.read().result.clone()
    }

    /// Whether `cancel` has been called successfully
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_shutdown_requested()
    }

    /// Run the job to a terminal state.
    ///
    /// # Returns
    /// The result summary on success
    pub async fn execute(
        &self,
        collaborators: &Collaborators,
        config: &EngineConfig,
    ) -> Result<Value, JobError> {
        {
            let mut state = self.write();
            if state.status == JobStatus::Canceled {
                return Err(JobError::Canceled {
                    job_id: self.id.clone(),
                });
            }
            if !state.status.can_transition_to(JobStatus::Running) {
                return Err(JobError::InvalidTransition {
                    job_id: self.id.clone(),
                    from: state.status,
                    to: JobStatus::Running,
                });
            }
            state.status = JobStatus::Running;
            state.started_at = Some(Utc::now());
        }

        let span = tracing::info_span!("job", job_id = %self.id, kind = %self.kind);
        let started = std::time::Instant::now();
        crate::metrics::record_job_started(self.kind.as_str());

        let outcome = async {
            info!(description = %self.description, "Starting job");
            let ctx = StrategyContext {
                job_id: &self.id,
                parameters: &self.parameters,
                collaborators,
                config,
                progress: &self.progress,
                cancel: &self.cancel,
                monitor: CompletionMonitor::from_config(&config.monitor),
            };
            strategy_for(&self.kind).execute(&ctx).await
        }
        .instrument(span)
        .await;

        let mut state = self.write();
        state.ended_at.get_or_insert_with(Utc::now);

        if state.status == JobStatus::Canceled {
            warn!(job_id = %self.id, "Job canceled");
            crate::metrics::record_job_finished(self.kind.as_str(), "canceled", started.elapsed());
            return Err(JobError::Canceled {
                job_id: self.id.clone(),
            });
        }

        match outcome {
            Ok(result) => {
                state.status = JobStatus::Completed;
                state.result = Some(result.clone());
                self.progress.complete();
                let progress = self.progress.snapshot();
                info!(
                    job_id = %self.id,
                    processed = progress.processed_items,
                    failed = progress.failed_items,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Job completed"
                );
                crate::metrics::record_job_finished(self.kind.as_str(), "completed", started.elapsed());
                Ok(result)
            }
            Err(e) => {
                error!(job_id = %self.id, error = %e, "Job failed");
                state.status = JobStatus::Failed;
                state.last_error = Some(e.to_string());
                crate::metrics::record_job_finished(self.kind.as_str(), "failed", started.elapsed());
                Err(JobError::Execution {
                    job_id: self.id.clone(),
                    source: e,
                })
            }
        }
    }

    /// Cancel a running job.
    ///
    /// Cooperative: the strategy stops at its next check, in-flight
    /// requests are not interrupted.
    pub fn cancel(&self) -> Result<(), JobError> {
        let mut state = self.write();
        if !state.status.can_transition_to(JobStatus::Canceled) {
            return Err(JobError::InvalidTransition {
                job_id: self.id.clone(),
                from: state.status,
                to: JobStatus::Canceled,
            });
        }
        state.status = JobStatus::Canceled;
        state.ended_at = Some(Utc::now());
        drop(state);

        self.cancel.request_shutdown();
        info!(job_id = %self.id, "Job cancel requested");
        Ok(())
    }

    /// Serializable copy of the job
    pub fn to_record(&self) -> JobRecord {
        let state = self.read();
        let progress = self.progress.snapshot();
        JobRecord {
            format_version: RECORD_FORMAT_VERSION.to_string(),
            id: self.id.clone(),
            kind: self.kind.clone(),
            parameters: self.parameters.clone(),
            description: self.description.clone(),
            status: state.status,
            progress_percent: progress.progress_percent,
            total_items: progress.total_items,
            processed_items: progress.processed_items,
            succeeded_items: progress.succeeded_items,
            failed_items: progress.failed_items,
            started_at: state.started_at,
            ended_at: state.ended_at,
            last_error: state.last_error.clone(),
            result: state.result.clone(),
        }
    }

    /// Rebuild a job from a record
    pub fn from_record(record: JobRecord) -> Result<Self, JobError> {
        if record.format_version != RECORD_FORMAT_VERSION {
            return Err(JobError::Record(format!(
                "unsupported record format {} (expected {RECORD_FORMAT_VERSION})",
                record.format_version
            )));
        }
        if record.processed_items != record.succeeded_items + record.failed_items {
            return Err(JobError::Record(format!(
                "inconsistent counters in record {}: processed {} != succeeded {} + failed {}",
                record.id, record.processed_items, record.succeeded_items, record.failed_items
            )));
        }

        let progress = ProgressReporter::new();
        progress.set_item_counts(record.total_items, record.succeeded_items, record.failed_items);
        progress.set_percent(record.progress_percent);

        let cancel = ShutdownCoordinator::shared();
        if record.status == JobStatus::Canceled {
            cancel.request_shutdown();
        }

        Ok(Self {
            id: record.id,
            kind: record.kind,
            parameters: record.parameters,
            description: record.description,
            state: Arc::new(RwLock::new(JobState {
                status: record.status,
                started_at: record.started_at,
                ended_at: record.ended_at,
                last_error: record.last_error,
                result: record.result,
            })),
            progress,
            cancel,
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, JobState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, JobState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// `"{kind}-{yyyymmddThhmmss}-{8 hex}"`
fn generate_job_id(kind: &JobKind, now: DateTime<Utc>) -> String {
    let kind: String = kind
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{kind}-{}-{}", now.format("%Y%m%dT%H%M%S"), &suffix[..8])
}
