//! leansync core: incremental OHLCV sync and LEAN conversion.
//!
//! This crate holds the per-ticker building blocks:
//! - Domain types (records, date ranges, frequency buckets)
//! - Canonical store, range tracking and merge
//! - Fetcher trait with the Databento provider and circuit breaker
//! - LEAN CSV conversion and zip archiving
//! - Relational sink trait with a Postgres implementation

pub mod archive;
pub mod convert;
pub mod data;
pub mod domain;
pub mod error;
pub mod sink;

pub use error::PersistenceError;
