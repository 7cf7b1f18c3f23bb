//! Local persistence errors shared by the store, converter and archiver.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure reading or writing a local file owned by the pipeline.
///
/// These are fatal for the ticker being processed; callers must not carry on
/// with partially written data.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("unparseable timestamp '{value}' in {}", .path.display())]
    BadTimestamp { path: PathBuf, value: String },

    #[error("invalid record for {ticker} at {timestamp}: {reason}")]
    InvalidRecord {
        ticker: String,
        timestamp: String,
        reason: String,
    },

    #[error("no canonical store for '{ticker}' at {}", .path.display())]
    MissingStore { ticker: String, path: PathBuf },

    #[error("archive error for {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("meta sidecar error: {0}")]
    Meta(String),
}

impl PersistenceError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn archive(path: &Path, source: zip::result::ZipError) -> Self {
        Self::Archive {
            path: path.to_path_buf(),
            source,
        }
    }
}
