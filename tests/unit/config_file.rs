//! Configuration file loading

use clap::Parser;
use ingest_orchestrator::cli::Cli;
use ingest_orchestrator::config::{ConfigError, EngineConfig};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn write(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("engine.json");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_partial_file_keeps_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        r#"{
            "fetch": { "request_delay_secs": 0.5, "max_retries": 4 },
            "sources": [
                { "id": "gazette", "url_template": "https://gazette.test/{yyyy}/{date}_{page}.pdf", "file_extension": "pdf", "max_pages": 3 }
            ]
        }"#,
    );

    let config = EngineConfig::load(&path).unwrap();
    let defaults = EngineConfig::default();
    assert_eq!(config.fetch.max_retries, 4);
    assert_eq!(config.fetch.request_delay(), Duration::from_millis(500));
    assert_eq!(config.fetch.user_agent, defaults.fetch.user_agent);
    assert_eq!(config.monitor.poll_interval_secs, defaults.monitor.poll_interval_secs);
    assert_eq!(config.sources.len(), 1);
    assert_eq!(config.sources[0].max_pages, 3);
}

#[test]
fn test_source_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, r#"{ "sources": [ { "id": "bulletin", "url_template": "https://b.test/{date}" } ] }"#);

    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.sources[0].file_extension, "bin");
    assert!(config.sources[0].max_pages >= 1);
}

#[test]
fn test_bad_files_are_rejected() {
    let dir = TempDir::new().unwrap();

    let path = write(&dir, "{ not json");
    assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Parse(_))));

    let path = write(&dir, r#"{ "fetch": { "max_retries": 0 } }"#);
    assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Invalid(_))));

    let path = write(&dir, r#"{ "monitor": { "poll_interval_secs": 0 } }"#);
    assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Invalid(_))));

    let path = write(
        &dir,
        r#"{ "sources": [ { "id": "a", "url_template": "https://a/{date}" }, { "id": "a", "url_template": "https://b/{date}" } ] }"#,
    );
    assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Invalid(_))));

    assert!(matches!(
        EngineConfig::load(&dir.path().join("missing.json")),
        Err(ConfigError::Io(_))
    ));
}

#[test]
fn test_command_line_overrides_the_file() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, r#"{ "fetch": { "max_retries": 4 }, "pool": { "workers": 2 } }"#);

    let cli = Cli::try_parse_from([
        "ingest-orchestrator".into(),
        "--config".into(),
        path.clone().into_os_string(),
        "--max-retries".into(),
        "9".into(),
        "schedule".into(),
        "list".into(),
    ])
    .unwrap();
    let config = cli.load_config().unwrap();
    assert_eq!(config.fetch.max_retries, 9);
    assert_eq!(config.pool.workers, 2);
}
