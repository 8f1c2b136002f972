//! Recurring task cadence and the built-in maintenance tasks

use chrono::Utc;
use ingest_orchestrator::checkpoint::{Checkpoint, CheckpointStore, Fingerprint};
use ingest_orchestrator::config::EngineConfig;
use ingest_orchestrator::pool::WorkerPool;
use ingest_orchestrator::scheduler::{
    register_defaults, SchedulerError, TaskArgs, CHECKPOINT_AUDIT_TASK, STALE_LOCK_SWEEP_TASK,
};
use ingest_orchestrator::JobScheduler;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const HOUR: Duration = Duration::from_secs(3600);

fn scheduler() -> JobScheduler {
    JobScheduler::new(Arc::new(WorkerPool::new(2, 8)), Duration::from_millis(50))
}

async fn upstream_down(_args: TaskArgs) -> anyhow::Result<Value> {
    anyhow::bail!("upstream unavailable")
}

#[tokio::test]
async fn test_failed_run_keeps_the_cadence() {
    let scheduler = scheduler();
    scheduler
        .register("nightly-export", HOUR, upstream_down, TaskArgs::default())
        .unwrap();

    let err = scheduler.run_now("nightly-export").await.unwrap_err();
    assert!(matches!(err, SchedulerError::TaskFailed { .. }));

    let status = scheduler.status("nightly-export").unwrap();
    let last_run = status.last_run.unwrap();
    assert_eq!(status.next_run, last_run + chrono::Duration::seconds(3600));
    assert_eq!(status.last_error.as_deref(), Some("upstream unavailable"));
    assert_eq!(status.failure_count, 1);
    assert!(!status.running);
}

#[tokio::test]
async fn test_due_tasks_run_on_the_pool() {
    let scheduler = scheduler();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let mut args = TaskArgs::default();
    args.kwargs.insert("batch".to_string(), json!(7));

    scheduler
        .register(
            "counter",
            HOUR,
            move |args: TaskArgs| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(args.kwarg("batch").cloned().unwrap_or(Value::Null))
                }
            },
            args,
        )
        .unwrap();

    assert!(scheduler.tick_at(Utc::now()).is_empty());
    let fired = scheduler.tick_at(Utc::now() + chrono::Duration::hours(2));
    assert_eq!(fired, vec!["counter".to_string()]);

    for _ in 0..100 {
        if scheduler.status("counter").unwrap().run_count == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let status = scheduler.status("counter").unwrap();
    assert_eq!(status.run_count, 1);
    assert_eq!(status.last_result, Some(json!(7)));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_builtin_audit_reads_the_checkpoint_dir() {
    let dir = TempDir::new().unwrap();
    let fingerprint = Fingerprint::new("gazette", "2024");
    let store = CheckpointStore::for_fingerprint(dir.path(), &fingerprint, Duration::from_secs(300));
    let mut checkpoint = Checkpoint::new(fingerprint);
    checkpoint.mark_succeeded("2024-01-01", vec![]);
    assert!(store.save(&checkpoint, true));

    let mut config = EngineConfig::default();
    config.checkpoint.dir = dir.path().to_path_buf();
    let scheduler = scheduler();
    register_defaults(&scheduler, &config).unwrap();

    let audit = scheduler.run_now(CHECKPOINT_AUDIT_TASK).await.unwrap();
    assert_eq!(audit["checkpoints"], 1);
    assert_eq!(audit["valid"][0]["items_succeeded"], 1);

    let sweep = scheduler.run_now(STALE_LOCK_SWEEP_TASK).await.unwrap();
    assert_eq!(sweep["removed"], json!([]));
    assert_eq!(scheduler.status(CHECKPOINT_AUDIT_TASK).unwrap().run_count, 1);
}
