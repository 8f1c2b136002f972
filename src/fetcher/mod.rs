//! Rate-limited, retrying fetch primitive
//!
//! [`RetryingFetcher`] wraps a [`Transport`] with a [`RateLimiter`] and an
//! exponential backoff policy. A definitive miss is a normal outcome
//! ([`FetchOutcome::Missing`]) rather than an error, so callers can
//! record "checked but absent" without special-casing error values.

use async_trait::async_trait;

pub mod classify;
pub mod http;
pub mod rate_limit;
pub mod retry;

pub use classify::{ResponseClass, RetryContext};
pub use http::HttpTransport;
pub use rate_limit::RateLimiter;
pub use retry::{FetchStats, FetchStatsSnapshot, RetryPolicy, RetryingFetcher};

/// Raw response handed back by a [`Transport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
}

/// Transport-level failures (no status received)
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Request timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Anything else below HTTP
    #[error("transport error: {0}")]
    Other(String),
}

/// Performs a single GET. Implemented over reqwest in production and by
/// scripted fakes in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one request and return the status and body
    async fn get(&self, url: &str) -> Result<RawResponse, TransportError>;
}

/// Successful fetch results
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The item exists; payload attached
    Found(Vec<u8>),
    /// The item does not exist at the source
    Missing,
}

impl FetchOutcome {
    /// Whether this is a definitive miss
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// Fetch errors
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transient failures on every attempt
    #[error("{url}: giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Requested URL
        url: String,
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: String,
    },

    /// Non-retryable status
    #[error("{url}: unexpected status {status}")]
    Permanent {
        /// Requested URL
        url: String,
        /// Status received
        status: u16,
    },

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;
