//! Observability metrics for the orchestration engine
//!
//! Emits through the `metrics` facade. Without an installed recorder every
//! call is a no-op, so library users pay nothing unless they opt in.
//!
//! ## Architecture
//!
//! - `metrics` crate for low-overhead collection
//! - Prometheus exporter for a scrape endpoint (enabled by `--metrics-addr`)
//! - Helpers are plain functions called at the point of the event

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Metrics setup errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be installed (port in use, recorder already set)
    #[error("failed to install Prometheus exporter: {0}")]
    Install(String),
}

/// Initialize metrics with a Prometheus scrape endpoint.
///
/// Idempotent: later calls return `Ok(())` without rebinding.
///
/// # Arguments
/// * `addr` - Socket address for the scrape endpoint (e.g. "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    describe_counter!("jobs_started_total", Unit::Count, "Bulk jobs started, by kind");
    describe_counter!(
        "jobs_finished_total",
        Unit::Count,
        "Bulk jobs finished, by kind and outcome"
    );
    describe_histogram!(
        "job_duration_seconds",
        Unit::Seconds,
        "Wall-clock duration of bulk jobs"
    );
    describe_counter!(
        "fetch_attempts_total",
        Unit::Count,
        "Fetch attempts, by response classification"
    );
    describe_counter!("fetch_retries_total", Unit::Count, "Retry backoffs taken");
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_histogram!(
        "rate_limit_wait_seconds",
        Unit::Seconds,
        "Time spent waiting on the request pacer"
    );
    describe_counter!(
        "checkpoint_writes_total",
        Unit::Count,
        "Checkpoint writes, by result"
    );
    describe_counter!(
        "scheduler_runs_total",
        Unit::Count,
        "Scheduled task runs, by task and outcome"
    );
    describe_histogram!(
        "scheduler_run_duration_seconds",
        Unit::Seconds,
        "Duration of scheduled task runs"
    );
    describe_gauge!("pool_queue_depth", Unit::Count, "Work waiting in the worker pool");
    describe_counter!(
        "pool_rejections_total",
        Unit::Count,
        "Submissions refused because the pool queue was full"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if the exporter has been installed
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Record a job entering RUNNING
pub fn record_job_started(kind: &str) {
    counter!("jobs_started_total", "kind" => kind.to_string()).increment(1);
}

/// Record a job reaching a terminal state
pub fn record_job_finished(kind: &str, outcome: &'static str, duration: Duration) {
    counter!(
        "jobs_finished_total",
        "kind" => kind.to_string(),
        "outcome" => outcome,
    )
    .increment(1);
    histogram!("job_duration_seconds", "kind" => kind.to_string()).record(duration.as_secs_f64());
}

/// Record one fetch attempt by classification label
pub fn record_fetch_attempt(class: &'static str) {
    counter!("fetch_attempts_total", "class" => class).increment(1);
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("fetch_retries_total", "attempt" => attempt.to_string()).increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Record time spent in the request pacer
pub fn record_rate_limit_wait(waited: Duration) {
    histogram!("rate_limit_wait_seconds").record(waited.as_secs_f64());
}

/// Record a checkpoint write attempt
pub fn record_checkpoint_write(success: bool) {
    let result = if success { "ok" } else { "error" };
    counter!("checkpoint_writes_total", "result" => result).increment(1);
}

/// Record a finished scheduled task run
pub fn record_scheduler_run(task: &str, success: bool, duration: Duration) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        "scheduler_runs_total",
        "task" => task.to_string(),
        "outcome" => outcome,
    )
    .increment(1);
    histogram!("scheduler_run_duration_seconds", "task" => task.to_string())
        .record(duration.as_secs_f64());
}

/// Update the pool queue gauge
pub fn record_pool_depth(queued: u64) {
    gauge!("pool_queue_depth").set(queued as f64);
}

/// Record a refused pool submission
pub fn record_pool_rejection() {
    counter!("pool_rejections_total").increment(1);
}
