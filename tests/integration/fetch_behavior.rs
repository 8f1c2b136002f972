//! Retry classification seen from outside the fetcher

use crate::support::{self, RecordingSite};
use ingest_orchestrator::fetcher::{FetchOutcome, RetryPolicy};
use std::time::Duration;

const ITEM: &str = "https://gazette.test/2024-02-30";

#[tokio::test]
async fn test_definitive_miss_is_not_retried() {
    let site = RecordingSite::serving(&[]);
    let fetcher = support::fetcher(site.clone(), 5);

    let outcome = fetcher.fetch(ITEM).await.unwrap();

    assert_eq!(outcome, FetchOutcome::Missing);
    assert_eq!(site.calls().len(), 1);
    let stats = fetcher.stats();
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.retry_sleeps, 0);
    assert_eq!(stats.missing, 1);
}

#[tokio::test]
async fn test_throttling_exhausts_the_attempt_budget() {
    let site = RecordingSite::answering(ITEM, 429);
    let fetcher = support::fetcher(site.clone(), 3);

    let err = fetcher.fetch(ITEM).await.unwrap_err();

    assert!(err.to_string().contains("3 attempts"));
    assert_eq!(site.calls().len(), 3);
    assert_eq!(fetcher.stats().retry_sleeps, 2);
}

#[tokio::test]
async fn test_server_error_fails_without_retry() {
    let site = RecordingSite::answering(ITEM, 500);
    let fetcher = support::fetcher(site.clone(), 5);

    fetcher.fetch(ITEM).await.unwrap_err();
    assert_eq!(site.calls().len(), 1);
    assert_eq!(fetcher.stats().failed, 1);
}

#[test]
fn test_backoff_never_exceeds_the_cap() {
    let policy = RetryPolicy {
        max_retries: 10,
        backoff_base: Duration::from_secs(1),
        jitter: Duration::from_secs(1),
        max_backoff: Duration::from_secs(30),
    };
    for attempt in 0..40 {
        let delay = policy.backoff_delay(attempt);
        assert!(delay <= Duration::from_secs(30), "attempt {attempt}: {delay:?}");
        if attempt < 4 {
            assert!(delay >= Duration::from_secs(1 << attempt));
        }
    }
}
