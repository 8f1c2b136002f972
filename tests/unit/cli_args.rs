//! Command-line parsing

use clap::Parser;
use ingest_orchestrator::cli::checkpoint::CheckpointAction;
use ingest_orchestrator::cli::job::JobAction;
use ingest_orchestrator::cli::schedule::ScheduleAction;
use ingest_orchestrator::cli::{Cli, Commands, OutputFormat};
use serde_json::json;
use std::path::PathBuf;

#[test]
fn test_job_run_collects_typed_parameters() {
    let cli = Cli::try_parse_from([
        "ingest-orchestrator",
        "job",
        "run",
        "--kind",
        "download",
        "--param",
        "source_id=gazette",
        "--param",
        "year=2024",
        "--param",
        "dry_run=true",
        "--record",
        "job.json",
    ])
    .unwrap();

    let Commands::Job(cmd) = cli.command else {
        panic!("expected a job command");
    };
    let JobAction::Run {
        kind,
        params,
        record,
        no_progress,
        ..
    } = cmd.action
    else {
        panic!("expected job run");
    };
    assert_eq!(kind, "download");
    assert_eq!(
        params,
        vec![
            ("source_id".to_string(), json!("gazette")),
            ("year".to_string(), json!(2024)),
            ("dry_run".to_string(), json!(true)),
        ]
    );
    assert_eq!(record, Some(PathBuf::from("job.json")));
    assert!(!no_progress);
}

#[test]
fn test_malformed_parameter_is_a_parse_error() {
    let result = Cli::try_parse_from([
        "ingest-orchestrator",
        "job",
        "run",
        "--kind",
        "ocr",
        "--param",
        "document_ids",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_global_flags_work_after_the_subcommand() {
    let cli = Cli::try_parse_from([
        "ingest-orchestrator",
        "schedule",
        "run",
        "checkpoint-audit",
        "--output-format",
        "json",
    ])
    .unwrap();

    assert_eq!(cli.output_format, OutputFormat::Json);
    let Commands::Schedule(cmd) = cli.command else {
        panic!("expected a schedule command");
    };
    assert!(matches!(cmd.action, ScheduleAction::Run { ref name } if name == "checkpoint-audit"));
}

#[test]
fn test_checkpoint_show_takes_a_file() {
    let cli = Cli::try_parse_from([
        "ingest-orchestrator",
        "checkpoint",
        "show",
        "cp/gazette_2024.checkpoint.json",
    ])
    .unwrap();
    let Commands::Checkpoint(cmd) = cli.command else {
        panic!("expected a checkpoint command");
    };
    assert!(matches!(cmd.action, CheckpointAction::Show { .. }));
}

#[test]
fn test_invalid_output_format_and_retry_bounds() {
    assert!(Cli::try_parse_from(["ingest-orchestrator", "--output-format", "xml", "schedule", "list"]).is_err());
    assert!(Cli::try_parse_from(["ingest-orchestrator", "--max-retries", "21", "schedule", "list"]).is_err());
    assert!(Cli::try_parse_from(["ingest-orchestrator", "--metrics-addr", "nope", "schedule", "list"]).is_err());
    assert!(Cli::try_parse_from(["ingest-orchestrator", "--max-retries", "20", "schedule", "list"]).is_ok());
}
