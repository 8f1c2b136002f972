//! Engine configuration
//!
//! Every component takes its settings from an explicit [`EngineConfig`]
//! value. Nothing reads process-wide state, so tests can run several
//! engines with isolated settings side by side.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Minimum delay between two requests to the same source, in seconds.
/// One second keeps well-behaved scrapers under most public archive limits.
pub const DEFAULT_REQUEST_DELAY_SECS: f64 = 1.0;

/// Base of the exponential retry backoff, in seconds.
pub const DEFAULT_BACKOFF_BASE_SECS: f64 = 1.0;

/// Upper bound of the uniform jitter added to every backoff, in seconds.
pub const DEFAULT_BACKOFF_JITTER_SECS: f64 = 3.0;

/// Hard cap for a single backoff sleep, in seconds.
pub const DEFAULT_MAX_BACKOFF_SECS: f64 = 60.0;

/// Attempts per fetch (initial attempt included).
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// HTTP connect timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP request timeout (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Checkpoint flush interval: 5 minutes between unforced writes.
pub const DEFAULT_CHECKPOINT_FLUSH_SECS: u64 = 300;

/// Completion monitor poll interval (seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Completion monitor wall-clock ceiling: 30 minutes.
pub const DEFAULT_MONITOR_TIMEOUT_SECS: u64 = 30 * 60;

/// Scheduler driver wake-up interval (seconds)
pub const DEFAULT_SCHEDULER_TICK_SECS: u64 = 1;

/// Worker pool size
pub const DEFAULT_POOL_WORKERS: usize = 4;

/// Worker pool queue capacity
pub const DEFAULT_POOL_QUEUE_CAPACITY: usize = 64;

/// Pages tried per dated item before giving up on pagination.
pub const DEFAULT_MAX_PAGES: u32 = 50;

/// Finished download sub-task statuses kept for polling
pub const DEFAULT_RETAINED_STATUSES: usize = 1024;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rate limiting and retry settings
    pub fetch: FetchConfig,
    /// Checkpoint persistence settings
    pub checkpoint: CheckpointConfig,
    /// Completion monitor settings
    pub monitor: MonitorConfig,
    /// Background scheduler settings
    pub scheduler: SchedulerConfig,
    /// Bounded worker pool settings
    pub pool: PoolConfig,
    /// Built-in downloader settings
    pub download: DownloadConfig,
    /// Known download sources
    pub sources: Vec<SourceSpec>,
}

/// Rate limiting and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Minimum delay between requests to one source (before jitter)
    pub request_delay_secs: f64,
    /// Exponential backoff base
    pub backoff_base_secs: f64,
    /// Uniform jitter added to each backoff
    pub backoff_jitter_secs: f64,
    /// Cap for one backoff sleep
    pub max_backoff_secs: f64,
    /// Attempts per fetch, initial attempt included
    pub max_retries: u32,
    /// HTTP connect timeout
    pub connect_timeout_secs: u64,
    /// HTTP request timeout
    pub request_timeout_secs: u64,
    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_delay_secs: DEFAULT_REQUEST_DELAY_SECS,
            backoff_base_secs: DEFAULT_BACKOFF_BASE_SECS,
            backoff_jitter_secs: DEFAULT_BACKOFF_JITTER_SECS,
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            user_agent: concat!("ingest-orchestrator/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    /// Base delay between requests
    pub fn request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.request_delay_secs)
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Checkpoint persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory holding checkpoint and summary files
    pub dir: PathBuf,
    /// Minimum interval between unforced writes
    pub flush_interval_secs: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".checkpoints"),
            flush_interval_secs: DEFAULT_CHECKPOINT_FLUSH_SECS,
        }
    }
}

impl CheckpointConfig {
    /// Flush interval as a [`Duration`]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

/// Completion monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between poll cycles
    pub poll_interval_secs: u64,
    /// Wall-clock ceiling before giving up
    pub timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            timeout_secs: DEFAULT_MONITOR_TIMEOUT_SECS,
        }
    }
}

impl MonitorConfig {
    /// Poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Monitor ceiling
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Driver loop wake-up interval
    pub tick_secs: u64,
    /// Register the built-in maintenance tasks on start
    pub default_tasks: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_SCHEDULER_TICK_SECS,
            default_tasks: true,
        }
    }
}

impl SchedulerConfig {
    /// Tick as a [`Duration`]
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

/// Bounded worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Concurrent workers
    pub workers: usize,
    /// Pending submissions allowed before `Saturated`
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_POOL_WORKERS,
            queue_capacity: DEFAULT_POOL_QUEUE_CAPACITY,
        }
    }
}

/// Built-in downloader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Root directory for downloaded artifacts
    pub output_dir: PathBuf,
    /// Finished sub-task statuses kept in memory for polling
    pub retained_statuses: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            retained_statuses: DEFAULT_RETAINED_STATUSES,
        }
    }
}

/// A dated, optionally paginated remote source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Source identifier used in job parameters and fingerprints
    pub id: String,
    /// URL with `{date}`, `{yyyy}`, `{mm}`, `{dd}` and optional `{page}` placeholders
    pub url_template: String,
    /// Extension for written artifacts
    #[serde(default = "default_extension")]
    pub file_extension: String,
    /// Pages tried per item when the template contains `{page}`
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_extension() -> String {
    "bin".to_string()
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

impl EngineConfig {
    /// Load configuration from a JSON file. Missing sections use defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let config: EngineConfig =
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or spin the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fetch = &self.fetch;
        if fetch.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "fetch.max_retries must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("fetch.request_delay_secs", fetch.request_delay_secs),
            ("fetch.backoff_base_secs", fetch.backoff_base_secs),
            ("fetch.backoff_jitter_secs", fetch.backoff_jitter_secs),
            ("fetch.max_backoff_secs", fetch.max_backoff_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number (got {value})"
                )));
            }
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitor.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.scheduler.tick_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.tick_secs must be at least 1".to_string(),
            ));
        }
        if self.pool.workers == 0 || self.pool.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pool.workers and pool.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.download.retained_statuses == 0 {
            return Err(ConfigError::Invalid(
                "download.retained_statuses must be at least 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source id: {}",
                    source.id
                )));
            }
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("IO error: {0}")]
    Io(String),

    /// File is not valid configuration JSON
    #[error("parse error: {0}")]
    Parse(String),

    /// A setting is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.checkpoint.flush_interval(), Duration::from_secs(300));
        assert_eq!(config.monitor.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.monitor.timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "fetch": { "max_retries": 3 }, "pool": { "workers": 2 } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.fetch.max_backoff_secs, DEFAULT_MAX_BACKOFF_SECS);
        assert_eq!(config.pool.workers, 2);
        assert_eq!(config.pool.queue_capacity, DEFAULT_POOL_QUEUE_CAPACITY);
    }

    #[test]
    fn test_zero_retries_rejected() {
        let mut config = EngineConfig::default();
        config.fetch.max_retries = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_status_retention_rejected() {
        let mut config = EngineConfig::default();
        assert_eq!(config.download.retained_statuses, DEFAULT_RETAINED_STATUSES);
        config.download.retained_statuses = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_sources_rejected() {
        let source = SourceSpec {
            id: "gazette".to_string(),
            url_template: "https://example.org/{date}.pdf".to_string(),
            file_extension: "pdf".to_string(),
            max_pages: 1,
        };
        let config = EngineConfig {
            sources: vec![source.clone(), source],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(
            &path,
            r#"{ "sources": [ { "id": "gazette", "url_template": "https://example.org/{yyyy}/{date}.pdf" } ] }"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].file_extension, "bin");
        assert_eq!(config.sources[0].max_pages, DEFAULT_MAX_PAGES);
    }
}
