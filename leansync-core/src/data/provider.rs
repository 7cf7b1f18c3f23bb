//! Fetcher trait and structured fetch errors.
//!
//! The Fetcher trait abstracts over remote market-data sources so the pipeline
//! can run against Databento in production and a scripted fake in tests.

use crate::domain::{DateRange, Frequency, TimeSeriesRecord};
use thiserror::Error;

/// Structured error types for remote retrieval.
///
/// A `FetchError` aborts only the ticker it was raised for.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider returned HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("response format changed: {0}")]
    ResponseFormat(String),

    #[error("hard stop: provider has refused further requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("no fetcher available: {0}")]
    Unavailable(String),
}

/// One retrieval: a ticker, an inclusive date range and a bar size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub ticker: String,
    pub range: DateRange,
    pub frequency: Frequency,
}

/// Trait for remote OHLCV sources.
///
/// Implementations return records in provider order; the merger sorts and
/// deduplicates, so a fetcher does not have to. The store and range logic sit
/// above this trait; fetchers know nothing about local files.
pub trait Fetcher: Send + Sync {
    /// Human-readable name, recorded as the source in the store sidecar.
    fn name(&self) -> &str;

    /// Retrieve OHLCV rows for the request.
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<TimeSeriesRecord>, FetchError>;

    /// False while the provider is refusing requests (e.g. breaker open).
    fn is_available(&self) -> bool {
        true
    }
}
