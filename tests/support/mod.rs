//! Shared fakes for the integration suite

#![allow(dead_code)]

use async_trait::async_trait;
use ingest_orchestrator::collaborator::{
    CollaboratorError, Importer, ImportRequest, OcrProcessor, OcrRequest, SubTaskState, SubTaskStatus,
    SubTaskSystem, TaskId,
};
use ingest_orchestrator::config::{EngineConfig, SourceSpec};
use ingest_orchestrator::downloader::{DateRangeDownloader, DownloaderSettings, SourceRegistry};
use ingest_orchestrator::fetcher::{
    RateLimiter, RawResponse, RetryPolicy, RetryingFetcher, Transport, TransportError,
};
use ingest_orchestrator::pool::WorkerPool;
use ingest_orchestrator::shutdown::ShutdownCoordinator;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source id used throughout the suite
pub const SOURCE: &str = "gazette";

/// Remote site serving a fixed set of URLs; everything else is a 404.
#[derive(Default)]
pub struct RecordingSite {
    pages: HashSet<String>,
    statuses: HashMap<String, u16>,
    calls: Mutex<Vec<String>>,
}

impl RecordingSite {
    pub fn serving(urls: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            pages: urls.iter().map(|u| u.to_string()).collect(),
            ..Self::default()
        })
    }

    pub fn answering(url: &str, status: u16) -> Arc<Self> {
        Arc::new(Self {
            statuses: [(url.to_string(), status)].into_iter().collect(),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingSite {
    async fn get(&self, url: &str) -> Result<RawResponse, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());
        let status = match self.statuses.get(url) {
            Some(status) => *status,
            None if self.pages.contains(url) => 200,
            None => 404,
        };
        Ok(RawResponse {
            status,
            body: format!("body of {url}").into_bytes(),
        })
    }
}

/// Daily, unpaginated source at `https://gazette.test/{date}`
pub fn gazette() -> SourceSpec {
    SourceSpec {
        id: SOURCE.to_string(),
        url_template: "https://gazette.test/{date}".to_string(),
        file_extension: "pdf".to_string(),
        max_pages: 1,
    }
}

/// No sleeps anywhere
pub fn no_wait_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        backoff_base: Duration::ZERO,
        jitter: Duration::ZERO,
        max_backoff: Duration::ZERO,
    }
}

pub fn fetcher(site: Arc<RecordingSite>, max_retries: u32) -> RetryingFetcher {
    RetryingFetcher::new(
        site,
        Arc::new(RateLimiter::new(Duration::ZERO)),
        no_wait_policy(max_retries),
    )
}

/// Downloader writing under `root/checkpoints` and `root/out`
pub fn downloader(root: &Path, site: Arc<RecordingSite>) -> DateRangeDownloader {
    let registry = SourceRegistry::from_specs(&[gazette()]).unwrap();
    DateRangeDownloader::new(
        registry,
        fetcher(site, 2),
        Arc::new(WorkerPool::new(2, 16)),
        DownloaderSettings {
            checkpoint_dir: root.join("checkpoints"),
            flush_interval: Duration::from_secs(300),
            output_dir: root.join("out"),
            retained_statuses: 64,
        },
        ShutdownCoordinator::shared(),
    )
}

/// Engine settings with a short monitor ceiling
pub fn engine_config(root: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.checkpoint.dir = root.join("checkpoints");
    config.download.output_dir = root.join("out");
    config.monitor.poll_interval_secs = 1;
    config.monitor.timeout_secs = 30;
    config.sources = vec![gazette()];
    config
}

/// OCR collaborator whose sub-tasks finish after a number of status polls.
///
/// The n-th submitted document needs `finish_after + n` polls, so a batch
/// finishes one document at a time. Documents listed in `failing` end
/// FAILED; `finish_after == u32::MAX` never finishes.
pub struct GradualOcr {
    finish_after: u32,
    failing: HashSet<String>,
    tasks: Mutex<HashMap<TaskId, (String, u32, u32)>>,
}

impl GradualOcr {
    pub fn new(finish_after: u32, failing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            finish_after,
            failing: failing.iter().map(|s| s.to_string()).collect(),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    pub fn never_finishing() -> Arc<Self> {
        Self::new(u32::MAX, &[])
    }

    pub fn submitted(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

#[async_trait]
impl SubTaskSystem for GradualOcr {
    async fn task_status(&self, id: &TaskId) -> Result<SubTaskStatus, CollaboratorError> {
        let mut tasks = self.tasks.lock().unwrap();
        let (document, polls, needed) = tasks
            .get_mut(id)
            .ok_or_else(|| CollaboratorError::UnknownTask(id.clone()))?;
        *polls = polls.saturating_add(1);
        if *polls < *needed {
            return Ok(SubTaskStatus::with_state(SubTaskState::Running));
        }
        if self.failing.contains(document.as_str()) {
            Ok(SubTaskStatus {
                state: SubTaskState::Failed,
                items_processed: 1,
                items_failed: 1,
                failed_items: vec![document.clone()],
                error: Some(format!("{document} is unreadable")),
                ..SubTaskStatus::default()
            })
        } else {
            Ok(SubTaskStatus {
                state: SubTaskState::Completed,
                items_processed: 1,
                items_succeeded: 1,
                ..SubTaskStatus::default()
            })
        }
    }
}

#[async_trait]
impl OcrProcessor for GradualOcr {
    async fn add_task(&self, request: OcrRequest) -> Result<TaskId, CollaboratorError> {
        let id = TaskId::generate("ocr");
        let mut tasks = self.tasks.lock().unwrap();
        let needed = self.finish_after.saturating_add(tasks.len() as u32);
        tasks.insert(id.clone(), (request.document_id, 0, needed));
        Ok(id)
    }
}

/// Importer that only counts calls
#[derive(Default)]
pub struct CountingImporter {
    pub calls: AtomicUsize,
}

impl CountingImporter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubTaskSystem for CountingImporter {
    async fn task_status(&self, _id: &TaskId) -> Result<SubTaskStatus, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SubTaskStatus::with_state(SubTaskState::Completed))
    }
}

#[async_trait]
impl Importer for CountingImporter {
    async fn add_task(&self, _request: ImportRequest) -> Result<TaskId, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TaskId::generate("import"))
    }
}
