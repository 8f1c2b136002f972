//! Per-source request pacing with jitter
//!
//! Enforces a minimum, randomly stretched delay between consecutive
//! requests to one external source.

use crate::config::FetchConfig;
use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Lower bound of the jitter factor applied to the base delay
pub const JITTER_MIN: f64 = 0.8;

/// Upper bound of the jitter factor applied to the base delay
pub const JITTER_MAX: f64 = 1.2;

/// Rate limiter keyed on a single "last request" instant.
///
/// The lock is held across the wait, so concurrent callers sharing one
/// limiter are served one at a time and never burst past the delay.
#[derive(Debug)]
pub struct RateLimiter {
    base_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter with the given base delay
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            last_request: Mutex::new(None),
        }
    }

    /// Create a limiter from fetch settings
    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(config.request_delay())
    }

    /// Configured base delay
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Draw one jittered delay in `[0.8, 1.2] × base_delay`
    pub fn jittered_delay(&self) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = rand::rng().random_range(JITTER_MIN..=JITTER_MAX);
        self.base_delay.mul_f64(factor)
    }

    /// Wait until the jittered delay has elapsed since the previous
    /// `acquire` returned.
    ///
    /// # Returns
    /// The time spent waiting
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_request.lock().await;

        let mut waited = Duration::ZERO;
        if let Some(previous) = *last {
            let required = self.jittered_delay();
            let elapsed = previous.elapsed();
            if elapsed < required {
                waited = required - elapsed;
                debug!(wait_ms = waited.as_millis(), "Rate limiter pacing request");
                sleep(waited).await;
            }
        }

        *last = Some(Instant::now());
        crate::metrics::record_rate_limit_wait(waited);
        waited
    }
}
