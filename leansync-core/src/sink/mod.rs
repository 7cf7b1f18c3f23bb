//! Relational mirror of converted output.
//!
//! A sink replaces the ticker's table wholesale on every write. Failures are
//! reported to the caller, which treats them as non-fatal.

pub mod postgres;

pub use postgres::{PostgresSink, SinkConfig};

use crate::convert::LeanBar;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to connect to {target}: {message}")]
    Connect { target: String, message: String },

    #[error("failed to write table {table}: {message}")]
    Write { table: String, message: String },

    #[error("invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("unsupported database scheme '{0}' (expected postgres or postgresql)")]
    UnsupportedScheme(String),

    #[error("sink runtime error: {0}")]
    Runtime(String),
}

/// Destination for converted rows.
pub trait SinkWriter: Send + Sync {
    fn name(&self) -> &str;

    /// Replace `{schema}.{ticker}` with `bars`. Returns rows written.
    fn write(&self, ticker: &str, schema: &str, bars: &[LeanBar]) -> Result<usize, SinkError>;
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> Result<String, SinkError> {
    if name.is_empty() || name.contains('\0') {
        return Err(SinkError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}
