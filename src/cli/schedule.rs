//! Scheduler subcommands

use super::{CliError, OutputFormat};
use crate::config::EngineConfig;
use crate::pool::WorkerPool;
use crate::scheduler::{register_defaults, JobScheduler};
use crate::shutdown::SharedShutdown;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

/// Schedule command
#[derive(Parser, Debug)]
pub struct ScheduleCommand {
    /// Schedule action
    #[command(subcommand)]
    pub action: ScheduleAction,
}

/// Schedule actions
#[derive(Subcommand, Debug)]
pub enum ScheduleAction {
    /// List scheduled tasks and their next run
    List,

    /// Run one task immediately
    Run {
        /// Task name
        name: String,
    },

    /// Run the scheduler until Ctrl+C
    Serve,
}

impl ScheduleCommand {
    /// Execute the schedule command
    pub async fn execute(
        &self,
        config: &EngineConfig,
        format: OutputFormat,
        shutdown: SharedShutdown,
    ) -> Result<(), CliError> {
        let pool = Arc::new(WorkerPool::from_config(&config.pool));
        let scheduler = JobScheduler::new(pool.clone(), config.scheduler.tick());
        if config.scheduler.default_tasks {
            register_defaults(&scheduler, config)?;
        }

        let outcome = match &self.action {
            ScheduleAction::List => list(&scheduler, format),
            ScheduleAction::Run { name } => {
                let result = scheduler.run_now(name).await?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                    OutputFormat::Human => println!("{name}: {result}"),
                }
                Ok(())
            }
            ScheduleAction::Serve => {
                scheduler.start();
                info!(tasks = scheduler.list().len(), "Scheduler serving, Ctrl+C to stop");
                shutdown.wait_for_shutdown().await;
                scheduler.stop().await;
                Ok(())
            }
        };

        pool.shutdown().await;
        outcome
    }
}

fn list(scheduler: &JobScheduler, format: OutputFormat) -> Result<(), CliError> {
    let tasks = scheduler.list();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tasks)?),
        OutputFormat::Human => {
            if tasks.is_empty() {
                println!("No scheduled tasks");
            }
            for task in &tasks {
                let state = if task.enabled { "enabled" } else { "disabled" };
                println!(
                    "{:<20} every {:>6}s  next {}  ({state}, {} runs, {} failed)",
                    task.name,
                    task.interval_secs,
                    task.next_run.format("%Y-%m-%d %H:%M:%S UTC"),
                    task.run_count,
                    task.failure_count,
                );
                if let Some(error) = &task.last_error {
                    println!("{:<20} last error: {error}", "");
                }
            }
        }
    }
    Ok(())
}
