//! Checkpoint inspection subcommands

use super::{CliError, OutputFormat};
use crate::checkpoint::{read_checkpoint, scan_dir};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Checkpoint command
#[derive(Parser, Debug)]
pub struct CheckpointCommand {
    /// Checkpoint action
    #[command(subcommand)]
    pub action: CheckpointAction,
}

/// Checkpoint actions
#[derive(Subcommand, Debug)]
pub enum CheckpointAction {
    /// Print the summary of one checkpoint file
    Show {
        /// Checkpoint file (`*.checkpoint.json`)
        file: PathBuf,
    },

    /// Load every checkpoint in a directory and report the invalid ones
    Verify {
        /// Checkpoint directory
        dir: PathBuf,
    },
}

impl CheckpointCommand {
    /// Execute the checkpoint command
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        match &self.action {
            CheckpointAction::Show { file } => show(file, format),
            CheckpointAction::Verify { dir } => verify(dir, format),
        }
    }
}

fn show(file: &Path, format: OutputFormat) -> Result<(), CliError> {
    let checkpoint = read_checkpoint(file)?;
    let summary = checkpoint.summary();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Human => {
            println!("{summary}");
            if let Some(at) = checkpoint.last_request_at() {
                println!("  Last request: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
    }
    Ok(())
}

fn verify(dir: &Path, format: OutputFormat) -> Result<(), CliError> {
    if !dir.exists() {
        println!("No checkpoints found at {}", dir.display());
        return Ok(());
    }
    if !dir.is_dir() {
        return Err(CliError::InvalidArgument(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let entries = scan_dir(dir)?;
    let invalid = entries.iter().filter(|(_, r)| r.is_err()).count();

    match format {
        OutputFormat::Json => {
            let files: Vec<_> = entries
                .iter()
                .map(|(path, result)| match result {
                    Ok(cp) => json!({ "path": path.display().to_string(), "valid": true, "summary": cp.summary() }),
                    Err(e) => json!({ "path": path.display().to_string(), "valid": false, "error": e.to_string() }),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json!({ "files": files, "invalid": invalid }))?);
        }
        OutputFormat::Human => {
            if entries.is_empty() {
                println!("Checkpoint directory exists but contains no checkpoints");
            } else {
                println!("Found {} checkpoint file(s)", entries.len());
            }
            for (path, result) in &entries {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                match result {
                    Ok(cp) => println!("  - {name} (valid, {} checked)", cp.items_checked().len()),
                    Err(e) => println!("  - {name} (invalid: {e})"),
                }
            }
            println!("\nSummary:");
            println!("  Valid files: {}", entries.len() - invalid);
            if invalid > 0 {
                println!("  Invalid files: {invalid}");
            }
        }
    }

    if invalid > 0 {
        return Err(CliError::InvalidArgument(format!(
            "Found {invalid} invalid checkpoint file(s)"
        )));
    }
    Ok(())
}
