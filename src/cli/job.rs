//! Job subcommands

use super::{CliError, OutputFormat};
use crate::collaborator::Collaborators;
use crate::config::EngineConfig;
use crate::downloader::DateRangeDownloader;
use crate::fetcher::HttpTransport;
use crate::job::{BulkJob, JobKind, JobParameters, JobRecord};
use crate::pool::WorkerPool;
use crate::shutdown::SharedShutdown;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How often the progress bar is refreshed
const PROGRESS_REFRESH: Duration = Duration::from_millis(250);

/// Job command
#[derive(Parser, Debug)]
pub struct JobCommand {
    /// Job action
    #[command(subcommand)]
    pub action: JobAction,
}

/// Job actions
#[derive(Subcommand, Debug)]
pub enum JobAction {
    /// Run a job with the built-in collaborators
    Run {
        /// Job kind (download, ocr, entity_extraction, import, export, maintenance, or a custom name)
        #[arg(long)]
        kind: String,

        /// Job parameter as key=value; JSON values are parsed, anything else is a string
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Free-form description
        #[arg(long, default_value = "")]
        description: String,

        /// Write the final job record to this file
        #[arg(long)]
        record: Option<PathBuf>,

        /// Disable the progress bar
        #[arg(long, default_value_t = false)]
        no_progress: bool,
    },

    /// Print a saved job record
    Show {
        /// Record file
        record: PathBuf,
    },
}

/// Parse `key=value`, reading the value as JSON when it is valid JSON
fn parse_param(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{s}'"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

impl JobCommand {
    /// Execute the job command
    pub async fn execute(
        &self,
        config: &EngineConfig,
        format: OutputFormat,
        shutdown: SharedShutdown,
    ) -> Result<(), CliError> {
        match &self.action {
            JobAction::Run {
                kind,
                params,
                description,
                record,
                no_progress,
            } => {
                let mut parameters = JobParameters::new();
                for (key, value) in params {
                    parameters.insert(key.clone(), value.clone());
                }
                let job = BulkJob::new(JobKind::from(kind.as_str()), parameters, description.clone())?;
                run_job(job, config, format, record.as_deref(), !no_progress, shutdown).await
            }
            JobAction::Show { record } => {
                let record = JobRecord::load(record)?;
                print_record(&record, format)
            }
        }
    }
}

async fn run_job(
    job: BulkJob,
    config: &EngineConfig,
    format: OutputFormat,
    record_path: Option<&Path>,
    show_progress: bool,
    shutdown: SharedShutdown,
) -> Result<(), CliError> {
    let pool = Arc::new(WorkerPool::from_config(&config.pool));
    let transport = Arc::new(HttpTransport::new(&config.fetch)?);
    let downloader = DateRangeDownloader::from_config(config, transport, pool, shutdown.clone())?;
    let collaborators = Collaborators::new().with_downloader(Arc::new(downloader.clone()));

    info!(job_id = job.id(), kind = %job.kind(), "Running job");

    // Ctrl+C cancels the job; sub-tasks stop at the next item boundary
    let canceller = tokio::spawn({
        let job = job.clone();
        let shutdown = shutdown.clone();
        async move {
            shutdown.wait_for_shutdown().await;
            if job.cancel().is_ok() {
                warn!(job_id = job.id(), "Job canceled");
            }
        }
    });

    let progress = show_progress.then(|| spawn_progress_bar(job.clone()));

    let result = job.execute(&collaborators, config).await;

    canceller.abort();
    if let Some((bar, poller)) = progress {
        poller.abort();
        bar.finish_and_clear();
    }
    downloader.shutdown().await;

    let record = job.to_record();
    if let Some(path) = record_path {
        record.save(path)?;
        info!(path = %path.display(), "Job record written");
    }
    print_record(&record, format)?;

    result.map(|_| ()).map_err(CliError::from)
}

/// Progress bar fed from the job's live counters
fn spawn_progress_bar(job: BulkJob) -> (ProgressBar, tokio::task::JoinHandle<()>) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar.set_message(format!("{} {}", job.kind(), job.id()));

    let handle = tokio::spawn({
        let bar = bar.clone();
        async move {
            let mut ticker = tokio::time::interval(PROGRESS_REFRESH);
            loop {
                ticker.tick().await;
                let snapshot = job.progress();
                bar.set_length(snapshot.total_items);
                bar.set_position(snapshot.processed_items);
                if snapshot.failed_items > 0 {
                    bar.set_message(format!("{} ({} failed)", job.kind(), snapshot.failed_items));
                }
            }
        }
    });
    (bar, handle)
}

fn print_record(record: &JobRecord, format: OutputFormat) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(record)?),
        OutputFormat::Human => println!("{}", record.format_human()),
    }
    Ok(())
}
