//! Resume behavior of checkpointed downloads

use crate::support::{self, RecordingSite, SOURCE};
use ingest_orchestrator::checkpoint::{Checkpoint, CheckpointStore, Fingerprint};
use ingest_orchestrator::collaborator::Collaborators;
use ingest_orchestrator::job::{BulkJob, JobKind, JobParameters, JobStatus};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const JAN_1: &str = "https://gazette.test/2024-01-01";
const JAN_2: &str = "https://gazette.test/2024-01-02";
const JAN_3: &str = "https://gazette.test/2024-01-03";

fn store(root: &std::path::Path) -> (CheckpointStore, Fingerprint) {
    let fingerprint = Fingerprint::new(SOURCE, "2024");
    let store = CheckpointStore::for_fingerprint(
        &root.join("checkpoints"),
        &fingerprint,
        Duration::from_secs(300),
    );
    (store, fingerprint)
}

fn january_job() -> BulkJob {
    BulkJob::new(
        JobKind::Download,
        JobParameters::new()
            .with("source_id", SOURCE)
            .with("start_date", "2024-01-01")
            .with("end_date", "2024-01-03"),
        "January gazettes",
    )
    .unwrap()
}

async fn run(root: &std::path::Path, site: Arc<RecordingSite>) -> BulkJob {
    let downloader = support::downloader(root, site);
    let collaborators = Collaborators::new().with_downloader(Arc::new(downloader.clone()));
    let job = january_job();
    job.execute(&collaborators, &support::engine_config(root))
        .await
        .unwrap();
    downloader.shutdown().await;
    job
}

#[tokio::test]
async fn test_resume_only_fetches_unchecked_dates() {
    let dir = TempDir::new().unwrap();
    let (store, fingerprint) = store(dir.path());

    // Jan 1 downloaded, Jan 2 known absent, Jan 3 never visited
    let mut seeded = Checkpoint::new(fingerprint.clone());
    seeded.mark_succeeded("2024-01-01", vec![]);
    seeded.mark_absent("2024-01-02");
    std::fs::create_dir_all(dir.path().join("checkpoints")).unwrap();
    assert!(store.save(&seeded, true));

    let site = RecordingSite::serving(&[JAN_1, JAN_2, JAN_3]);
    let job = run(dir.path(), site.clone()).await;

    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(site.calls(), vec![JAN_3.to_string()]);

    let checkpoint = store.load(&fingerprint).unwrap();
    let checked: Vec<&str> = checkpoint.items_checked().iter().map(String::as_str).collect();
    let succeeded: Vec<&str> = checkpoint.items_succeeded().iter().map(String::as_str).collect();
    assert_eq!(checked, vec!["2024-01-01", "2024-01-02", "2024-01-03"]);
    assert_eq!(succeeded, vec!["2024-01-01", "2024-01-03"]);
    assert!(dir.path().join("out/gazette/2024/2024-01-03_p1.pdf").exists());
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let (store, fingerprint) = store(dir.path());

    let first_site = RecordingSite::serving(&[JAN_1, JAN_3]);
    run(dir.path(), first_site.clone()).await;
    assert_eq!(first_site.calls().len(), 3);
    let after_first = store.load(&fingerprint).unwrap();

    let second_site = RecordingSite::serving(&[JAN_1, JAN_3]);
    let job = run(dir.path(), second_site.clone()).await;
    assert!(second_site.calls().is_empty());

    let after_second = store.load(&fingerprint).unwrap();
    assert_eq!(after_first.items_checked(), after_second.items_checked());
    assert_eq!(after_first.items_succeeded(), after_second.items_succeeded());
    assert_eq!(after_second.absent_count(), 1);

    // Skipped dates still count toward the job's totals
    let progress = job.progress();
    assert_eq!(progress.total_items, 3);
    assert_eq!(progress.succeeded_items, 3);
    assert_eq!(progress.failed_items, 0);
}

#[tokio::test]
async fn test_checkpoints_are_isolated_by_fingerprint() {
    let dir = TempDir::new().unwrap();
    let (store, fingerprint) = store(dir.path());
    run(dir.path(), RecordingSite::serving(&[JAN_1])).await;

    assert!(store.load(&fingerprint).is_some());
    assert!(store.load(&Fingerprint::new("other-source", "2024")).is_none());
    assert!(store.load(&Fingerprint::new(SOURCE, "2023")).is_none());
}

#[tokio::test]
async fn test_transient_failures_leave_the_date_for_the_next_run() {
    let dir = TempDir::new().unwrap();
    let (store, fingerprint) = store(dir.path());

    let flaky = RecordingSite::answering(JAN_2, 503);
    let downloader = support::downloader(dir.path(), flaky.clone());
    let collaborators = Collaborators::new().with_downloader(Arc::new(downloader.clone()));
    let job = january_job();
    let result = job
        .execute(&collaborators, &support::engine_config(dir.path()))
        .await
        .unwrap();
    downloader.shutdown().await;

    assert_eq!(result["items_failed"], 1);
    assert_eq!(result["failures"]["sample"][0], "2024-01-02");
    assert!(!store.load(&fingerprint).unwrap().is_checked("2024-01-02"));

    let healthy = RecordingSite::serving(&[JAN_2]);
    run(dir.path(), healthy.clone()).await;
    assert_eq!(healthy.calls(), vec![JAN_2.to_string()]);
    assert!(store.load(&fingerprint).unwrap().is_checked("2024-01-02"));
}
