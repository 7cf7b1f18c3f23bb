//! Data retrieval and the canonical store
//!
//! - `provider`: Fetcher trait and FetchError
//! - `databento`: HTTP Fetcher for the Databento historical API
//! - `circuit_breaker`: fail-fast guard shared by a provider
//! - `store`: per-ticker canonical CSV store
//! - `range`: coverage check and buffered fetch range
//! - `merge`: dedup + ordering of existing and fetched rows

pub mod circuit_breaker;
pub mod databento;
pub mod merge;
pub mod provider;
pub mod range;
pub mod store;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use databento::{DatabentoProvider, DatabentoSettings};
pub use merge::{merge, MergePolicy, MergeStats};
pub use provider::{FetchError, FetchRequest, Fetcher};
pub use range::{Coverage, CoveredSpan, RangeTracker, SyncDecision, SyncPlan, DEFAULT_BUFFER_DAYS};
pub use store::{CanonicalStore, StoreMeta};
