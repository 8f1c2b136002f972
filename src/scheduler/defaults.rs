//! Built-in maintenance tasks

use super::{JobScheduler, SchedulerError, TaskArgs};
use crate::checkpoint::{scan_dir, sweep_stale_locks};
use crate::config::EngineConfig;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Summarizes every checkpoint in the checkpoint directory
pub const CHECKPOINT_AUDIT_TASK: &str = "checkpoint-audit";

/// Removes lock files no process holds
pub const STALE_LOCK_SWEEP_TASK: &str = "stale-lock-sweep";

const HOURLY: Duration = Duration::from_secs(3600);
const DAILY: Duration = Duration::from_secs(24 * 3600);

fn dir_args(dir: &std::path::Path) -> TaskArgs {
    let mut args = TaskArgs::default();
    args.kwargs
        .insert("dir".to_string(), json!(dir.to_string_lossy()));
    args
}

fn dir_from(args: &TaskArgs) -> anyhow::Result<PathBuf> {
    args.kwarg("dir")
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("missing 'dir' argument"))
}

/// Register the built-in tasks against the configured checkpoint directory
pub fn register_defaults(scheduler: &JobScheduler, config: &EngineConfig) -> Result<(), SchedulerError> {
    let args = dir_args(&config.checkpoint.dir);
    scheduler.register(CHECKPOINT_AUDIT_TASK, HOURLY, checkpoint_audit, args.clone())?;
    scheduler.register(STALE_LOCK_SWEEP_TASK, DAILY, stale_lock_sweep, args)?;
    Ok(())
}

/// Load every checkpoint and report valid summaries and unreadable files
pub async fn checkpoint_audit(args: TaskArgs) -> anyhow::Result<Value> {
    let dir = dir_from(&args)?;
    if !dir.exists() {
        return Ok(json!({ "checkpoints": 0, "valid": [], "invalid": [] }));
    }

    let entries = tokio::task::spawn_blocking(move || scan_dir(&dir)).await??;
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for (path, result) in &entries {
        match result {
            Ok(checkpoint) => valid.push(serde_json::to_value(checkpoint.summary())?),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid checkpoint");
                invalid.push(json!({ "path": path.display().to_string(), "error": e.to_string() }));
            }
        }
    }
    Ok(json!({
        "checkpoints": entries.len(),
        "valid": valid,
        "invalid": invalid,
    }))
}

/// Remove unheld lock files
pub async fn stale_lock_sweep(args: TaskArgs) -> anyhow::Result<Value> {
    let dir = dir_from(&args)?;
    if !dir.exists() {
        return Ok(json!({ "removed": [] }));
    }
    let removed = tokio::task::spawn_blocking(move || sweep_stale_locks(&dir)).await??;
    let removed: Vec<String> = removed.iter().map(|p| p.display().to_string()).collect();
    Ok(json!({ "removed": removed }))
}
