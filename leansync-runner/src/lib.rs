//! leansync runner: configuration and sync orchestration.
//!
//! This crate builds on `leansync-core` to provide:
//! - TOML + environment configuration
//! - The per-ticker pipeline (plan → fetch/merge → convert → archive → sink)
//! - The batch loop with progress reporting

pub mod batch;
pub mod config;
pub mod pipeline;

pub use batch::{regenerate_batch, run_batch, BatchSummary, LogProgress, SyncProgress};
pub use config::{api_key, env_lookup, ConfigError, SyncConfig};
pub use pipeline::{
    FetchSummary, Pipeline, PipelineSettings, SinkOutcome, TickerError, TickerReport,
};
