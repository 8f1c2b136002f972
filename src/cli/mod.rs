//! CLI command implementations

pub mod checkpoint;
pub mod error;
pub mod job;
pub mod schedule;

pub use checkpoint::CheckpointCommand;
pub use error::CliError;
pub use job::JobCommand;
pub use schedule::ScheduleCommand;

use crate::config::EngineConfig;
use crate::shutdown::SharedShutdown;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Upper bound for `--workers`
const MAX_WORKERS: usize = 64;

/// Parse and validate the worker count
fn parse_workers(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value == 0 {
        return Err("workers must be at least 1".to_string());
    }
    if value > MAX_WORKERS {
        return Err(format!("workers {value} exceeds maximum of {MAX_WORKERS}"));
    }
    Ok(value)
}

/// Bulk ingestion orchestrator CLI
#[derive(Parser, Debug)]
#[command(name = "ingest-orchestrator")]
#[command(about = "Run checkpointed bulk jobs and recurring maintenance tasks", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Engine configuration file (JSON). Defaults apply when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Attempts per request, initial attempt included (range: 1-20)
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: Option<u32>,

    /// Checkpoint directory
    #[arg(long, global = true)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Worker pool size (max: 64)
    #[arg(long, global = true, value_parser = parse_workers)]
    pub workers: Option<usize>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run or inspect bulk jobs
    Job(JobCommand),

    /// Inspect download checkpoints
    Checkpoint(CheckpointCommand),

    /// Manage the background scheduler
    Schedule(ScheduleCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

impl Cli {
    /// Configuration file (or defaults) with command-line overrides applied
    pub fn load_config(&self) -> Result<EngineConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        if let Some(max_retries) = self.max_retries {
            config.fetch.max_retries = max_retries;
        }
        if let Some(dir) = &self.checkpoint_dir {
            config.checkpoint.dir = dir.clone();
        }
        if let Some(workers) = self.workers {
            config.pool.workers = workers;
        }
        config.validate()?;
        Ok(config)
    }

    /// Run the selected command
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<(), CliError> {
        if let Some(addr) = self.metrics_addr {
            crate::metrics::init_metrics(addr).await?;
        }
        let config = self.load_config()?;
        match &self.command {
            Commands::Job(cmd) => cmd.execute(&config, self.output_format, shutdown).await,
            Commands::Checkpoint(cmd) => cmd.execute(self.output_format),
            Commands::Schedule(cmd) => cmd.execute(&config, self.output_format, shutdown).await,
        }
    }
}
