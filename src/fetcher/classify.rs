//! Response classification and retry log formatting.
//!
//! Every fetch attempt ends in exactly one [`ResponseClass`]. The class
//! decides whether the fetcher returns, retries, or gives up.

use super::TransportError;
use std::time::Duration;

/// Outcome class of one fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// 2xx with a payload
    Success,
    /// 404 / 410: the item does not exist at the source
    Miss,
    /// 429 rate limit exceeded
    RateLimited,
    /// 502 / 503 / 504 gateway or availability errors
    Unavailable(u16),
    /// Request timed out before a status arrived
    NetworkTimeout,
    /// Connection refused or DNS failure
    NetworkOffline,
    /// Any other transport-level failure
    NetworkGeneric,
    /// Any other status; never retried
    Permanent(u16),
}

impl ResponseClass {
    /// Classify an HTTP status code
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            404 | 410 => Self::Miss,
            429 => Self::RateLimited,
            502..=504 => Self::Unavailable(status),
            other => Self::Permanent(other),
        }
    }

    /// Classify a transport failure
    pub fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => Self::NetworkTimeout,
            TransportError::Connect(_) => Self::NetworkOffline,
            TransportError::Other(_) => Self::NetworkGeneric,
        }
    }

    /// Whether another attempt can change the outcome
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::Unavailable(_)
                | Self::NetworkTimeout
                | Self::NetworkOffline
                | Self::NetworkGeneric
        )
    }

    /// Short description used in log lines
    pub fn description(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Miss => "not found",
            Self::RateLimited => "rate limit exceeded",
            Self::Unavailable(code) => match code {
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server unavailable",
            },
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::NetworkGeneric => "network error",
            Self::Permanent(_) => "unexpected status",
        }
    }

    /// Stable label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Miss => "miss",
            Self::RateLimited => "rate_limited",
            Self::Unavailable(_) => "unavailable",
            Self::NetworkTimeout => "timeout",
            Self::NetworkOffline => "offline",
            Self::NetworkGeneric => "network",
            Self::Permanent(_) => "permanent",
        }
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Class of the failed attempt
    pub class: ResponseClass,
    /// Backoff until the next attempt
    pub backoff: Duration,
    /// URL that failed
    pub url: String,
}

impl RetryContext {
    /// Format standardized retry message with attempt counters.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds ({})",
            self.attempt + 1,
            self.max_attempts,
            self.class.description(),
            self.backoff.as_secs_f64(),
            self.url
        )
    }

    /// Format final failure summary.
    pub fn format_failure(&self, last_error: &str) -> String {
        format!(
            "[FAILED] {} failed after {} attempts: {}",
            self.url, self.max_attempts, last_error
        )
    }
}
