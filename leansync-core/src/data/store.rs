//! Canonical per-ticker CSV store.
//!
//! Layout: `{store_dir}/{TICKER}_data.csv` plus a `{TICKER}_data.meta.json`
//! sidecar.
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Tolerant reads: extra provider columns are dropped, timestamps with `Z`,
//!   numeric offsets, fractional seconds or no zone at all are accepted; the
//!   offset is stripped and the wall-clock time kept
//! - Cheap index reads (timestamp column only) for range tracking
//! - Metadata sidecar per ticker (hash, span, source)

use crate::domain::TimeSeriesRecord;
use crate::error::PersistenceError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const STORE_SUFFIX: &str = "_data.csv";
const META_SUFFIX: &str = "_data.meta.json";

/// Timestamp format written to the store, e.g. `2023-01-03 00:00:00+00:00`.
const STORE_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// Metadata sidecar for a stored ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreMeta {
    pub ticker: String,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub record_count: usize,
    pub data_hash: String,
    pub source: String,
    pub written_at: DateTime<Utc>,
}

/// Row shape on disk. The timestamp column is the index and may carry any of
/// the names older tooling used for it.
#[derive(Debug, Serialize, Deserialize)]
struct StoreRow {
    #[serde(rename = "ts_event", alias = "timestamp", alias = "date")]
    ts_event: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

#[derive(Debug, Deserialize)]
struct IndexRow {
    #[serde(rename = "ts_event", alias = "timestamp", alias = "date")]
    ts_event: String,
}

/// The authoritative local history, one CSV file per ticker.
#[derive(Debug, Clone)]
pub struct CanonicalStore {
    dir: PathBuf,
}

impl CanonicalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path to a ticker's store file: `{dir}/{TICKER}_data.csv`
    pub fn store_path(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{ticker}{STORE_SUFFIX}"))
    }

    pub fn meta_path(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{ticker}{META_SUFFIX}"))
    }

    pub fn exists(&self, ticker: &str) -> bool {
        self.store_path(ticker).is_file()
    }

    /// Load all stored records for a ticker in file order.
    ///
    /// `Ok(None)` when the ticker has no store file yet.
    pub fn load(&self, ticker: &str) -> Result<Option<Vec<TimeSeriesRecord>>, PersistenceError> {
        let path = self.store_path(ticker);
        if !path.is_file() {
            return Ok(None);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(|e| PersistenceError::csv(&path, e))?;

        let mut records = Vec::new();
        for row in reader.deserialize::<StoreRow>() {
            let row = row.map_err(|e| PersistenceError::csv(&path, e))?;
            let timestamp = parse_timestamp(&row.ts_event).ok_or_else(|| {
                PersistenceError::BadTimestamp {
                    path: path.clone(),
                    value: row.ts_event.clone(),
                }
            })?;
            records.push(TimeSeriesRecord {
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        debug!(ticker, rows = records.len(), path = %path.display(), "loaded canonical store");
        Ok(Some(records))
    }

    /// Read only the timestamp index, with the zone stripped.
    ///
    /// `Ok(None)` when the ticker has no store file yet.
    pub fn read_index(&self, ticker: &str) -> Result<Option<Vec<NaiveDateTime>>, PersistenceError> {
        let path = self.store_path(ticker);
        if !path.is_file() {
            return Ok(None);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(|e| PersistenceError::csv(&path, e))?;

        let mut index = Vec::new();
        for row in reader.deserialize::<IndexRow>() {
            let row = row.map_err(|e| PersistenceError::csv(&path, e))?;
            let ts = parse_timestamp(&row.ts_event).ok_or_else(|| PersistenceError::BadTimestamp {
                path: path.clone(),
                value: row.ts_event.clone(),
            })?;
            index.push(ts.naive_utc());
        }
        Ok(Some(index))
    }

    /// Replace a ticker's store with `records` and rewrite its sidecar.
    ///
    /// Callers pass records already in canonical order (see `merge`).
    pub fn write(
        &self,
        ticker: &str,
        records: &[TimeSeriesRecord],
        source: &str,
    ) -> Result<StoreMeta, PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(|e| PersistenceError::io(&self.dir, e))?;

        let path = self.store_path(ticker);
        let tmp_path = path.with_extension("csv.tmp");

        if let Err(e) = write_rows(&tmp_path, records) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            PersistenceError::io(&path, e)
        })?;

        let meta = StoreMeta {
            ticker: ticker.to_string(),
            first_timestamp: records.first().map(|r| r.timestamp),
            last_timestamp: records.last().map(|r| r.timestamp),
            record_count: records.len(),
            data_hash: blake3::hash(
                &serde_json::to_vec(records)
                    .map_err(|e| PersistenceError::Meta(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            source: source.to_string(),
            written_at: Utc::now(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| PersistenceError::Meta(format!("meta serialization: {e}")))?;
        let meta_path = self.meta_path(ticker);
        fs::write(&meta_path, meta_json).map_err(|e| PersistenceError::io(&meta_path, e))?;

        debug!(ticker, rows = records.len(), path = %path.display(), "persisted canonical store");
        Ok(meta)
    }

    /// Sidecar metadata, if present and readable.
    pub fn meta(&self, ticker: &str) -> Option<StoreMeta> {
        let content = fs::read_to_string(self.meta_path(ticker)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Tickers with a store file, sorted.
    pub fn tickers(&self) -> Result<Vec<String>, PersistenceError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|e| PersistenceError::io(&self.dir, e))?;

        let mut tickers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PersistenceError::io(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(ticker) = name.strip_suffix(STORE_SUFFIX) {
                if !ticker.is_empty() {
                    tickers.push(ticker.to_string());
                }
            }
        }
        tickers.sort();
        Ok(tickers)
    }
}

fn write_rows(path: &Path, records: &[TimeSeriesRecord]) -> Result<(), PersistenceError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| PersistenceError::csv(path, e))?;

    if records.is_empty() {
        writer
            .write_record(["ts_event", "open", "high", "low", "close", "volume"])
            .map_err(|e| PersistenceError::csv(path, e))?;
    }

    for rec in records {
        writer
            .serialize(StoreRow {
                ts_event: rec.timestamp.format(STORE_TS_FORMAT).to_string(),
                open: rec.open,
                high: rec.high,
                low: rec.low,
                close: rec.close,
                volume: rec.volume,
            })
            .map_err(|e| PersistenceError::csv(path, e))?;
    }

    writer.flush().map_err(|e| PersistenceError::io(path, e))
}

/// Parse a stored or provider timestamp.
///
/// Accepts RFC 3339 (`Z` or offset, optional fraction), the space-separated
/// form with an offset, a naive datetime or a bare date. Any offset is
/// dropped and the wall-clock time kept, so `20:00:00-05:00` stays 20:00.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local().and_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.naive_local().and_utc());
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
}
