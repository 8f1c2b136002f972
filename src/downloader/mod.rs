//! Built-in downloader for dated, paginated sources
//!
//! [`DateRangeDownloader`] implements the [`Downloader`] collaborator
//! contract on top of the fetcher, the checkpoint store and the worker
//! pool.
//!
//! # Overview
//!
//! Each sub-task covers one source over one period (normally a calendar
//! year):
//!
//! 1. **Lock**: take the exclusive checkpoint lock for `source_id` + `period`
//! 2. **Resume**: load the checkpoint; dates already checked are skipped
//!    without a network call
//! 3. **Fetch**: walk `{page}` = 1..=max_pages until the first miss
//! 4. **Record**: a miss on page 1 marks the date checked but absent;
//!    found pages are written to disk and the date is marked succeeded
//! 5. **Persist**: save after every date (throttled), force-save at the end
//!
//! A date whose fetch fails after retries stays unchecked so the next run
//! picks it up again, and is listed in the sub-task's `failed_items`.
//!
//! # Components
//!
//! - [`registry`] - Source definitions and URL templates
//!
//! # Error Handling
//!
//! Sub-task level problems (lock held elsewhere, a panic inside the
//! sub-task) end the sub-task in [`SubTaskState::Failed`]. Per-date
//! problems are counted and the sub-task carries on with the next date.
//!
//! Statuses of finished sub-tasks are kept for the most recent
//! [`DownloaderSettings::retained_statuses`] handles; older ones are
//! forgotten and report [`CollaboratorError::UnknownTask`].
//!
//! # Cancellation
//!
//! The request's cancel token, the engine shutdown and [`Downloader::stop`]
//! are checked between dates. An in-flight fetch is never interrupted.

use crate::checkpoint::{
    path_component, Checkpoint, CheckpointError, CheckpointLock, CheckpointStore, Fingerprint,
};
use crate::collaborator::{
    CollaboratorError, DownloadRequest, Downloader, SubTaskState, SubTaskStatus, SubTaskSystem,
    TaskId,
};
use crate::config::{EngineConfig, SourceSpec};
use crate::fetcher::{
    FetchError, FetchOutcome, FetchStatsSnapshot, RateLimiter, RetryPolicy, RetryingFetcher,
    Transport,
};
use crate::pool::{panic_message, WorkerPool};
use crate::shutdown::SharedShutdown;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn, Instrument};

pub mod registry;

pub use registry::{is_paginated, render_url, RegistryError, SourceRegistry};

/// Capacity of the completion event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Downloader errors
#[derive(Debug, thiserror::Error)]
pub enum DownloaderError {
    /// Source registry problem
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Fetch failed after retries or permanently
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Writing an artifact failed
    #[error("IO error: {0}")]
    Io(String),

    /// Checkpoint lock or load problem
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Filesystem layout and persistence settings
#[derive(Debug, Clone)]
pub struct DownloaderSettings {
    /// Checkpoint directory
    pub checkpoint_dir: PathBuf,
    /// Minimum interval between unforced checkpoint writes
    pub flush_interval: Duration,
    /// Artifact root
    pub output_dir: PathBuf,
    /// Finished sub-task statuses kept for polling
    pub retained_statuses: usize,
}

impl DownloaderSettings {
    /// Settings from the engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            checkpoint_dir: config.checkpoint.dir.clone(),
            flush_interval: config.checkpoint.flush_interval(),
            output_dir: config.download.output_dir.clone(),
            retained_statuses: config.download.retained_statuses,
        }
    }
}

/// Where one downloaded page is written:
/// `{output_dir}/{source_id}/{yyyy}/{date}_p{page}.{ext}`
///
/// The source id and extension are cleaned the same way checkpoint file
/// names are, so neither can leave `output_dir`.
pub fn artifact_path(output_dir: &Path, spec: &SourceSpec, date: NaiveDate, page: u32) -> PathBuf {
    output_dir
        .join(path_component(&spec.id))
        .join(format!("{:04}", date.year()))
        .join(format!(
            "{}_p{}.{}",
            date.format("%Y-%m-%d"),
            page,
            path_component(&spec.file_extension)
        ))
}

/// Split an inclusive date range into calendar years, in order.
///
/// Returns an empty list when `start > end`.
pub fn split_by_year(start: NaiveDate, end: NaiveDate) -> Vec<(i32, Vec<NaiveDate>)> {
    let mut periods: Vec<(i32, Vec<NaiveDate>)> = Vec::new();
    for date in start.iter_days().take_while(|d| *d <= end) {
        match periods.last_mut() {
            Some((year, dates)) if *year == date.year() => dates.push(date),
            _ => periods.push((date.year(), vec![date])),
        }
    }
    periods
}

/// Checkpoint key of a date
fn item_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Date-range downloader collaborator.
///
/// Cheap to clone; clones share sub-task records and the worker pool.
#[derive(Clone)]
pub struct DateRangeDownloader {
    inner: Arc<Inner>,
}

struct Inner {
    registry: SourceRegistry,
    fetcher: RetryingFetcher,
    pool: Arc<WorkerPool>,
    settings: DownloaderSettings,
    tasks: Mutex<TaskTable>,
    events: broadcast::Sender<TaskId>,
    running: AtomicBool,
    shutdown: SharedShutdown,
}

impl std::fmt::Debug for DateRangeDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DateRangeDownloader")
            .field("sources", &self.inner.registry.ids())
            .field("settings", &self.inner.settings)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Sub-task statuses, with finished handles in completion order
#[derive(Default)]
struct TaskTable {
    statuses: HashMap<TaskId, SubTaskStatus>,
    finished: VecDeque<TaskId>,
}

impl TaskTable {
    fn mark_finished(&mut self, id: &TaskId, retained: usize) {
        self.finished.push_back(id.clone());
        while self.finished.len() > retained {
            if let Some(oldest) = self.finished.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
    }
}

/// How one date ended
enum DateOutcome {
    Written(Vec<PathBuf>),
    Absent,
}

impl DateRangeDownloader {
    /// Assemble a downloader from its parts
    pub fn new(
        registry: SourceRegistry,
        fetcher: RetryingFetcher,
        pool: Arc<WorkerPool>,
        settings: DownloaderSettings,
        shutdown: SharedShutdown,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                registry,
                fetcher,
                pool,
                settings,
                tasks: Mutex::new(TaskTable::default()),
                events,
                running: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    /// Build from engine configuration over the given transport
    pub fn from_config(
        config: &EngineConfig,
        transport: Arc<dyn Transport>,
        pool: Arc<WorkerPool>,
        shutdown: SharedShutdown,
    ) -> Result<Self, DownloaderError> {
        let registry = SourceRegistry::from_specs(&config.sources)?;
        let fetcher = RetryingFetcher::new(
            transport,
            Arc::new(RateLimiter::from_config(&config.fetch)),
            RetryPolicy::from_config(&config.fetch),
        );
        Ok(Self::new(
            registry,
            fetcher,
            pool,
            DownloaderSettings::from_config(config),
            shutdown,
        ))
    }

    /// Registered sources
    pub fn registry(&self) -> &SourceRegistry {
        &self.inner.registry
    }

    /// Fetch counters across all sub-tasks
    pub fn fetch_stats(&self) -> FetchStatsSnapshot {
        self.inner.fetcher.stats()
    }

    /// Whether sub-tasks are being accepted
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Drain the worker pool. Queued sub-tasks still run to completion.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.inner.pool.shutdown().await;
    }
}

impl Inner {
    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, TaskTable> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, id: &TaskId, f: impl FnOnce(&mut SubTaskStatus)) {
        if let Some(status) = self.lock_tasks().statuses.get_mut(id) {
            f(status);
        }
    }

    fn finish(&self, id: &TaskId, state: SubTaskState, error: Option<String>) {
        {
            let mut tasks = self.lock_tasks();
            let Some(status) = tasks.statuses.get_mut(id) else {
                return;
            };
            if status.state.is_terminal() {
                return;
            }
            status.state = state;
            status.error = error;
            tasks.mark_finished(id, self.settings.retained_statuses.max(1));
        }
        // No subscribers is fine; the monitor falls back to polling
        let _ = self.events.send(id.clone());
    }

    /// Run a sub-task; a panic inside it fails the sub-task instead of
    /// leaving it running.
    async fn run_guarded(self: Arc<Self>, id: TaskId, request: DownloadRequest, spec: SourceSpec) {
        let run = self.clone().run_task(id.clone(), request, spec);
        if let Err(panic) = AssertUnwindSafe(run).catch_unwind().await {
            let message = panic_message(panic.as_ref());
            error!(task_id = %id, panic = %message, "Download sub-task panicked");
            self.finish(&id, SubTaskState::Failed, Some(format!("panicked: {message}")));
        }
    }

    fn stop_requested(&self, request: &DownloadRequest) -> bool {
        request
            .cancel
            .as_ref()
            .is_some_and(|c| c.is_shutdown_requested())
            || self.shutdown.is_shutdown_requested()
            || !self.running.load(Ordering::SeqCst)
    }

    async fn run_task(self: Arc<Self>, id: TaskId, request: DownloadRequest, spec: SourceSpec) {
        let span = tracing::info_span!(
            "download_task",
            task_id = %id,
            source_id = %request.source_id,
            period = %request.period,
        );
        async move {
            self.update(&id, |s| s.state = SubTaskState::Running);

            let fingerprint = Fingerprint::new(&request.source_id, &request.period);
            let store = CheckpointStore::for_fingerprint(
                &self.settings.checkpoint_dir,
                &fingerprint,
                self.settings.flush_interval,
            );

            let _lock = match CheckpointLock::try_acquire(store.path()) {
                Ok(lock) => lock,
                Err(e) => {
                    warn!(error = %e, "Could not lock checkpoint");
                    self.finish(&id, SubTaskState::Failed, Some(e.to_string()));
                    return;
                }
            };

            let mut checkpoint = store
                .load(&fingerprint)
                .unwrap_or_else(|| Checkpoint::new(fingerprint.clone()));

            info!(dates = request.dates.len(), "Starting download sub-task");

            let mut canceled = false;
            for date in &request.dates {
                if self.stop_requested(&request) {
                    info!("Stop requested, ending sub-task at date boundary");
                    canceled = true;
                    break;
                }

                let key = item_key(*date);
                if checkpoint.is_checked(&key) {
                    debug!(date = %key, "Already checked, skipping");
                    self.update(&id, |s| {
                        s.items_processed += 1;
                        s.items_succeeded += 1;
                    });
                    continue;
                }

                match self.download_date(&spec, *date, &mut checkpoint).await {
                    Ok(DateOutcome::Written(files)) => {
                        debug!(date = %key, files = files.len(), "Date downloaded");
                        checkpoint.mark_succeeded(key, files);
                        self.update(&id, |s| {
                            s.items_processed += 1;
                            s.items_succeeded += 1;
                        });
                    }
                    Ok(DateOutcome::Absent) => {
                        debug!(date = %key, "Date not present at source");
                        checkpoint.mark_absent(key);
                        self.update(&id, |s| {
                            s.items_processed += 1;
                            s.items_succeeded += 1;
                        });
                    }
                    Err(e) => {
                        warn!(date = %key, error = %e, "Date failed, will be retried on next run");
                        self.update(&id, |s| {
                            s.items_processed += 1;
                            s.items_failed += 1;
                            s.failed_items.push(key);
                        });
                    }
                }

                store.save(&checkpoint, false);
            }

            store.save(&checkpoint, true);

            let summary = checkpoint.summary();
            info!(
                items_checked = summary.items_checked,
                items_succeeded = summary.items_succeeded,
                files = summary.total_files_written,
                canceled,
                "Download sub-task finished"
            );

            let state = if canceled {
                SubTaskState::Canceled
            } else {
                SubTaskState::Completed
            };
            self.finish(&id, state, None);
        }
        .instrument(span)
        .await
    }

    async fn download_date(
        &self,
        spec: &SourceSpec,
        date: NaiveDate,
        checkpoint: &mut Checkpoint,
    ) -> Result<DateOutcome, DownloaderError> {
        let pages = if is_paginated(spec) { spec.max_pages } else { 1 };
        let mut files = Vec::new();

        for page in 1..=pages {
            let url = render_url(spec, date, page);
            checkpoint.record_request();
            match self.fetcher.fetch(&url).await? {
                FetchOutcome::Found(body) => {
                    let path = artifact_path(&self.settings.output_dir, spec, date, page);
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| DownloaderError::Io(format!("{}: {e}", parent.display())))?;
                    }
                    tokio::fs::write(&path, &body)
                        .await
                        .map_err(|e| DownloaderError::Io(format!("{}: {e}", path.display())))?;
                    files.push(path);
                }
                FetchOutcome::Missing => break,
            }
        }

        if files.is_empty() {
            Ok(DateOutcome::Absent)
        } else {
            Ok(DateOutcome::Written(files))
        }
    }
}

#[async_trait]
impl SubTaskSystem for DateRangeDownloader {
    async fn task_status(&self, id: &TaskId) -> Result<SubTaskStatus, CollaboratorError> {
        self.inner
            .lock_tasks()
            .statuses
            .get(id)
            .cloned()
            .ok_or_else(|| CollaboratorError::UnknownTask(id.clone()))
    }

    fn completion_events(&self) -> Option<broadcast::Receiver<TaskId>> {
        Some(self.inner.events.subscribe())
    }
}

#[async_trait]
impl Downloader for DateRangeDownloader {
    async fn add_task(&self, request: DownloadRequest) -> Result<TaskId, CollaboratorError> {
        if !self.is_running() {
            return Err(CollaboratorError::Rejected("downloader is not started".to_string()));
        }
        if request.period.trim().is_empty() {
            return Err(CollaboratorError::Rejected("period must not be empty".to_string()));
        }
        let spec = self
            .inner
            .registry
            .require(&request.source_id)
            .map_err(|e| CollaboratorError::Rejected(e.to_string()))?
            .clone();

        let id = TaskId::generate("download");
        self.inner
            .lock_tasks()
            .statuses
            .insert(id.clone(), SubTaskStatus::default());

        let inner = self.inner.clone();
        let task_id = id.clone();
        if let Err(e) = self
            .inner
            .pool
            .submit(inner.run_guarded(task_id, request, spec))
            .await
        {
            self.inner.lock_tasks().statuses.remove(&id);
            return Err(CollaboratorError::Rejected(e.to_string()));
        }

        debug!(task_id = %id, "Download sub-task queued");
        Ok(id)
    }

    async fn start(&self) -> Result<(), CollaboratorError> {
        if !self.inner.running.swap(true, Ordering::SeqCst) {
            info!(sources = self.inner.registry.len(), "Downloader started");
        }
        Ok(())
    }

    async fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            info!("Downloader stopped");
        }
    }
}
