//! Retrying fetcher with capped exponential backoff
//!
//! Retries on:
//! - 429 rate limit errors
//! - 502 / 503 / 504
//! - transport failures (timeout, connection refused)
//!
//! Does not retry on:
//! - 404 / 410 (returned as [`FetchOutcome::Missing`])
//! - any other status

use super::classify::{ResponseClass, RetryContext};
use super::rate_limit::RateLimiter;
use super::{FetchError, FetchOutcome, FetchResult, Transport};
use crate::config::FetchConfig;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff and attempt limits.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per fetch, initial attempt included
    pub max_retries: u32,
    /// Exponential base
    pub backoff_base: Duration,
    /// Upper bound of the uniform jitter
    pub jitter: Duration,
    /// Cap for one sleep
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

impl RetryPolicy {
    /// Build from fetch settings
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            backoff_base: Duration::from_secs_f64(config.backoff_base_secs),
            jitter: Duration::from_secs_f64(config.backoff_jitter_secs),
            max_backoff: Duration::from_secs_f64(config.max_backoff_secs),
        }
    }

    /// Delay after the given 0-based attempt:
    /// `min(2^attempt × base + U(0, jitter), max_backoff)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let exponential = self.backoff_base.as_secs_f64() * 2f64.powi(exponent);
        let jitter_secs = self.jitter.as_secs_f64();
        let jitter = if jitter_secs > 0.0 {
            rand::rng().random_range(0.0..=jitter_secs)
        } else {
            0.0
        };
        let capped = (exponential + jitter).min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Counters shared by every clone of a fetcher.
#[derive(Debug, Default)]
pub struct FetchStats {
    attempts: AtomicU64,
    retry_sleeps: AtomicU64,
    found: AtomicU64,
    missing: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`FetchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStatsSnapshot {
    /// Requests sent
    pub attempts: u64,
    /// Backoff sleeps taken
    pub retry_sleeps: u64,
    /// Fetches that returned a payload
    pub found: u64,
    /// Fetches that returned a definitive miss
    pub missing: u64,
    /// Fetches that ended in an error
    pub failed: u64,
}

impl FetchStats {
    /// Copy the current counters
    pub fn snapshot(&self) -> FetchStatsSnapshot {
        FetchStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            retry_sleeps: self.retry_sleeps.load(Ordering::Relaxed),
            found: self.found.load(Ordering::Relaxed),
            missing: self.missing.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Rate-limited fetcher with bounded retries.
#[derive(Clone)]
pub struct RetryingFetcher {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    stats: Arc<FetchStats>,
}

impl RetryingFetcher {
    /// Create a fetcher
    ///
    /// # Arguments
    /// * `transport` - Performs the actual request
    /// * `limiter` - Shared pacing for the target source
    /// * `policy` - Backoff and attempt limits
    pub fn new(transport: Arc<dyn Transport>, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            limiter,
            policy,
            stats: Arc::new(FetchStats::default()),
        }
    }

    /// Retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Rate limiter in use
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> FetchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Fetch with the policy's attempt limit
    pub async fn fetch(&self, url: &str) -> FetchResult<FetchOutcome> {
        self.fetch_with_retries(url, self.policy.max_retries).await
    }

    /// Fetch with an explicit attempt limit (initial attempt included)
    pub async fn fetch_with_retries(&self, url: &str, max_retries: u32) -> FetchResult<FetchOutcome> {
        let attempts = max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            self.limiter.acquire().await;
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            let class = match self.transport.get(url).await {
                Ok(response) => {
                    let class = ResponseClass::from_status(response.status);
                    crate::metrics::record_fetch_attempt(class.label());
                    match class {
                        ResponseClass::Success => {
                            debug!(url, attempt = attempt + 1, "Fetch succeeded");
                            self.stats.found.fetch_add(1, Ordering::Relaxed);
                            return Ok(FetchOutcome::Found(response.body));
                        }
                        ResponseClass::Miss => {
                            debug!(url, status = response.status, "Item not present at source");
                            self.stats.missing.fetch_add(1, Ordering::Relaxed);
                            return Ok(FetchOutcome::Missing);
                        }
                        ResponseClass::Permanent(status) => {
                            warn!(url, status, "Non-retryable response");
                            self.stats.failed.fetch_add(1, Ordering::Relaxed);
                            return Err(FetchError::Permanent {
                                url: url.to_string(),
                                status,
                            });
                        }
                        transient => {
                            last_error = format!("HTTP {} ({})", response.status, transient.description());
                            transient
                        }
                    }
                }
                Err(e) => {
                    let class = ResponseClass::from_transport(&e);
                    crate::metrics::record_fetch_attempt(class.label());
                    last_error = e.to_string();
                    class
                }
            };

            if attempt + 1 < attempts {
                let backoff = self.policy.backoff_delay(attempt);
                let ctx = RetryContext {
                    attempt: attempt + 1,
                    max_attempts: attempts,
                    class,
                    backoff,
                    url: url.to_string(),
                };
                warn!("{}", ctx.format_retry());
                self.stats.retry_sleeps.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_retry_backoff(backoff, attempt + 1);
                tokio::time::sleep(backoff).await;
            }
        }

        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        let ctx = RetryContext {
            attempt: attempts,
            max_attempts: attempts,
            class: ResponseClass::NetworkGeneric,
            backoff: Duration::ZERO,
            url: url.to_string(),
        };
        warn!("{}", ctx.format_failure(&last_error));
        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{RawResponse, TransportError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed script of responses and counts calls.
    struct Scripted {
        script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        calls: AtomicU64,
    }

    impl Scripted {
        fn new(script: Vec<Result<RawResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn get(&self, _url: &str) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(status(503)))
        }
    }

    fn status(code: u16) -> RawResponse {
        RawResponse {
            status: code,
            body: b"payload".to_vec(),
        }
    }

    fn fetcher(transport: Arc<Scripted>, max_retries: u32) -> RetryingFetcher {
        let policy = RetryPolicy {
            max_retries,
            ..RetryPolicy::default()
        };
        RetryingFetcher::new(transport, Arc::new(RateLimiter::new(Duration::ZERO)), policy)
    }

    #[test]
    fn test_backoff_is_bounded_for_every_attempt() {
        let policy = RetryPolicy::default();
        for attempt in 0..64 {
            let delay = policy.backoff_delay(attempt);
            assert!(delay <= Duration::from_secs(60), "attempt {attempt}: {delay:?}");
        }
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_grows_exponentially_before_cap() {
        let policy = RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_jitter_range() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let delay = policy.backoff_delay(1);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_definitive_miss_is_not_retried() {
        let transport = Scripted::new(vec![Ok(status(404))]);
        let fetcher = fetcher(transport.clone(), 5);

        let outcome = fetcher.fetch("https://example.org/missing").await.unwrap();

        assert_eq!(outcome, FetchOutcome::Missing);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        let stats = fetcher.stats();
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.retry_sleeps, 0);
        assert_eq!(stats.missing, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let transport = Scripted::new(vec![
            Ok(status(429)),
            Err(TransportError::Timeout("slow".into())),
            Ok(status(200)),
        ]);
        let fetcher = fetcher(transport.clone(), 5);

        let outcome = fetcher.fetch("https://example.org/a").await.unwrap();

        assert_eq!(outcome, FetchOutcome::Found(b"payload".to_vec()));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fetcher.stats().retry_sleeps, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_never_exceed_max_retries() {
        let transport = Scripted::new(vec![]);
        let fetcher = fetcher(transport.clone(), 3);

        let err = fetcher.fetch("https://example.org/down").await.unwrap_err();

        match err {
            FetchError::RetriesExhausted { attempts, last_error, .. } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        // No sleep after the final attempt
        assert_eq!(fetcher.stats().retry_sleeps, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_status_fails_immediately() {
        let transport = Scripted::new(vec![Ok(status(403))]);
        let fetcher = fetcher(transport.clone(), 5);

        let err = fetcher.fetch("https://example.org/forbidden").await.unwrap_err();

        assert!(matches!(err, FetchError::Permanent { status: 403, .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.stats().retry_sleeps, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_override() {
        let transport = Scripted::new(vec![]);
        let fetcher = fetcher(transport.clone(), 5);

        let _ = fetcher.fetch_with_retries("https://example.org/x", 1).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
