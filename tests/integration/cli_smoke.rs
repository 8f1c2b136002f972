//! End-to-end runs of the binary that need no network

use assert_cmd::Command;
use ingest_orchestrator::checkpoint::{Checkpoint, CheckpointStore, Fingerprint};
use serde_json::Value;
use std::time::Duration;
use tempfile::TempDir;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("ingest-orchestrator").unwrap();
    cmd.env("RUST_LOG", "off");
    cmd
}

fn seed_checkpoint(dir: &std::path::Path) {
    let fingerprint = Fingerprint::new("gazette", "2024");
    let store = CheckpointStore::for_fingerprint(dir, &fingerprint, Duration::from_secs(300));
    let mut checkpoint = Checkpoint::new(fingerprint);
    checkpoint.mark_succeeded("2024-01-01", vec![]);
    checkpoint.mark_absent("2024-01-02");
    assert!(store.save(&checkpoint, true));
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_checkpoint_verify_accepts_valid_files() {
    let dir = TempDir::new().unwrap();
    seed_checkpoint(dir.path());

    let output = cli()
        .args(["--output-format", "json", "checkpoint", "verify"])
        .arg(dir.path())
        .assert()
        .success()
        .get_output()
        .clone();

    let report = stdout_json(&output);
    assert_eq!(report["invalid"], 0);
    assert_eq!(report["files"][0]["summary"]["items_checked"], 2);
    assert_eq!(report["files"][0]["summary"]["items_absent"], 1);
}

#[test]
fn test_checkpoint_verify_fails_on_corrupt_files() {
    let dir = TempDir::new().unwrap();
    seed_checkpoint(dir.path());
    std::fs::write(dir.path().join("gazette_2023.checkpoint.json"), "{ truncated").unwrap();

    cli()
        .args(["checkpoint", "verify"])
        .arg(dir.path())
        .assert()
        .failure();
}

#[test]
fn test_schedule_list_shows_builtin_tasks() {
    let dir = TempDir::new().unwrap();

    let output = cli()
        .args(["--output-format", "json", "--checkpoint-dir"])
        .arg(dir.path())
        .args(["schedule", "list"])
        .assert()
        .success()
        .get_output()
        .clone();

    let tasks = stdout_json(&output);
    let names: Vec<&str> = tasks
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["checkpoint-audit", "stale-lock-sweep"]);
}

#[test]
fn test_job_with_missing_parameters_is_rejected() {
    cli()
        .args(["job", "run", "--kind", "import", "--param", "source_type=csv", "--no-progress"])
        .assert()
        .failure();
}

#[test]
fn test_worker_count_is_bounded() {
    cli()
        .args(["--workers", "0", "schedule", "list"])
        .assert()
        .failure();
}
