//! Job status, progress and record behavior across whole runs

use crate::support::{self, CountingImporter, GradualOcr};
use ingest_orchestrator::collaborator::Collaborators;
use ingest_orchestrator::config::EngineConfig;
use ingest_orchestrator::job::{BulkJob, JobKind, JobParameters, JobRecord, JobStatus};
use ingest_orchestrator::JobError;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn ocr_job(documents: &[&str]) -> BulkJob {
    BulkJob::new(
        JobKind::Ocr,
        JobParameters::new().with("document_ids", documents.to_vec()),
        "scan batch",
    )
    .unwrap()
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.monitor.poll_interval_secs = 1;
    config.monitor.timeout_secs = 60;
    config
}

#[tokio::test]
async fn test_invalid_parameters_never_reach_a_collaborator() {
    let importer = Arc::new(CountingImporter::default());
    let _collaborators = Collaborators::new().with_importer(importer.clone());

    let err = BulkJob::new(
        JobKind::Import,
        JobParameters::new().with("source_type", "csv"),
        "import without a path",
    )
    .unwrap_err();

    match err {
        JobError::Validation { message, .. } => assert!(message.contains("source_path")),
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert_eq!(importer.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_monotonic_and_consistent() {
    let ocr = GradualOcr::new(1, &["d2"]);
    let collaborators = Collaborators::new().with_ocr(ocr.clone());
    let job = ocr_job(&["d0", "d1", "d2", "d3"]);

    let observer = tokio::spawn({
        let job = job.clone();
        async move {
            let mut samples = Vec::new();
            while !job.status().is_terminal() {
                samples.push(job.progress());
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            samples.push(job.progress());
            samples
        }
    });

    let result = job.execute(&collaborators, &config()).await.unwrap();
    let samples = observer.await.unwrap();

    assert!(samples.len() > 2);
    for pair in samples.windows(2) {
        assert!(pair[1].processed_items >= pair[0].processed_items);
        assert!(pair[1].progress_percent >= pair[0].progress_percent);
    }
    for sample in &samples {
        assert_eq!(sample.processed_items, sample.succeeded_items + sample.failed_items);
        assert!(sample.total_items == 0 || sample.processed_items <= sample.total_items);
    }

    let last = samples.last().unwrap();
    assert_eq!(last.processed_items, 4);
    assert_eq!(last.failed_items, 1);
    assert_eq!(result["failed"], 1);
    assert_eq!(result["failures"]["sample"][0], "d2");
    assert_eq!(job.status(), JobStatus::Completed);
}

#[test]
fn test_only_forward_transitions_are_legal() {
    let legal = [
        (JobStatus::Pending, JobStatus::Running),
        (JobStatus::Running, JobStatus::Completed),
        (JobStatus::Running, JobStatus::Failed),
        (JobStatus::Running, JobStatus::Canceled),
    ];
    for from in JobStatus::ALL {
        for to in JobStatus::ALL {
            assert_eq!(
                from.can_transition_to(to),
                legal.contains(&(from, to)),
                "{from} -> {to}"
            );
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_finished_job_cannot_run_again() {
    let collaborators = Collaborators::new().with_ocr(GradualOcr::new(1, &[]));
    let job = ocr_job(&["d0"]);
    job.execute(&collaborators, &config()).await.unwrap();

    let err = job.execute(&collaborators, &config()).await.unwrap_err();
    assert!(matches!(
        err,
        JobError::InvalidTransition {
            from: JobStatus::Completed,
            to: JobStatus::Running,
            ..
        }
    ));
    assert_eq!(job.status(), JobStatus::Completed);
    assert!(job.cancel().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_monitoring() {
    let ocr = GradualOcr::never_finishing();
    let collaborators = Collaborators::new().with_ocr(ocr.clone());
    let job = ocr_job(&["d0", "d1"]);

    let handle = tokio::spawn({
        let job = job.clone();
        let collaborators = collaborators.clone();
        async move { job.execute(&collaborators, &config()).await }
    });

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(job.status(), JobStatus::Running);
    assert_eq!(ocr.submitted(), 2);
    job.cancel().unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, JobError::Canceled { .. }));
    assert_eq!(job.status(), JobStatus::Canceled);
    assert!(job.ended_at().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_monitor_ceiling_fails_the_job() {
    let collaborators = Collaborators::new().with_ocr(GradualOcr::never_finishing());
    let job = ocr_job(&["d0"]);
    let mut config = config();
    config.monitor.timeout_secs = 5;

    let err = job.execute(&collaborators, &config).await.unwrap_err();
    assert!(matches!(err, JobError::Execution { .. }));
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job.last_error().unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_every_sub_task_failing_fails_the_job() {
    let collaborators = Collaborators::new().with_ocr(GradualOcr::new(1, &["d0", "d1"]));
    let job = ocr_job(&["d0", "d1"]);

    job.execute(&collaborators, &config()).await.unwrap_err();
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job.last_error().unwrap().contains("unreadable"));
}

#[tokio::test(start_paused = true)]
async fn test_record_survives_a_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("job.json");
    let collaborators = Collaborators::new().with_ocr(GradualOcr::new(1, &["d1"]));
    let job = ocr_job(&["d0", "d1", "d2"]);
    job.execute(&collaborators, &config()).await.unwrap();

    job.to_record().save(&path).unwrap();
    let restored = BulkJob::from_record(JobRecord::load(&path).unwrap()).unwrap();

    assert_eq!(restored.id(), job.id());
    assert_eq!(restored.kind(), &JobKind::Ocr);
    assert_eq!(restored.status(), JobStatus::Completed);
    assert_eq!(restored.progress(), job.progress());
    assert_eq!(restored.result(), job.result());
    assert_eq!(restored.started_at(), job.started_at());
}

#[tokio::test]
async fn test_download_job_without_downloader_fails() {
    let dir = TempDir::new().unwrap();
    let job = BulkJob::new(
        JobKind::Download,
        JobParameters::new().with("source_id", support::SOURCE).with("year", 2024),
        "",
    )
    .unwrap();

    job.execute(&Collaborators::new(), &support::engine_config(dir.path()))
        .await
        .unwrap_err();
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job.last_error().unwrap().contains("download"));
}
