//! Conversion of canonical rows into LEAN equity CSV files.
//!
//! Output rows are header-less `date,open,high,low,close,volume` with prices
//! as integer deci-cents (dollars x 10,000, truncated toward zero), written to
//! `{output_root}/{daily|hourly|minute}/{ticker}.csv`.

use crate::domain::{DateStyle, Frequency, TimeSeriesRecord};
use crate::error::PersistenceError;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fixed-point scale applied to prices.
pub const PRICE_SCALE: f64 = 10_000.0;

/// Default root for converted output.
pub const DEFAULT_OUTPUT_ROOT: &str = "data/equity/usa";

/// Scale a dollar price to deci-cents, truncating toward zero.
///
/// `None` for NaN, infinities, and values outside the `i64` range.
pub fn to_deci_cents(price: f64) -> Option<i64> {
    if !price.is_finite() {
        return None;
    }
    let scaled = (price * PRICE_SCALE).trunc();
    if scaled < i64::MIN as f64 || scaled >= i64::MAX as f64 {
        return None;
    }
    Some(scaled as i64)
}

/// One output row, in column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeanBar {
    pub date: String,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub close: i64,
    pub volume: u64,
}

/// Convert canonical rows, failing on the first price that cannot be encoded.
pub fn to_lean_bars(
    ticker: &str,
    records: &[TimeSeriesRecord],
    style: DateStyle,
) -> Result<Vec<LeanBar>, PersistenceError> {
    let pattern = style.pattern();
    records
        .iter()
        .map(|rec| {
            let scale = |field: &str, price: f64| {
                to_deci_cents(price).ok_or_else(|| PersistenceError::InvalidRecord {
                    ticker: ticker.to_string(),
                    timestamp: rec.timestamp.to_rfc3339(),
                    reason: format!("{field} price {price} cannot be encoded"),
                })
            };
            Ok(LeanBar {
                date: rec.timestamp.format(pattern).to_string(),
                open: scale("open", rec.open)?,
                high: scale("high", rec.high)?,
                low: scale("low", rec.low)?,
                close: scale("close", rec.close)?,
                volume: rec.volume,
            })
        })
        .collect()
}

/// Directory routing for converted files and their archives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_ROOT)
    }
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, frequency: Frequency) -> PathBuf {
        self.root.join(frequency.dir_name())
    }

    /// `{root}/{freq}/{ticker-lowercase}.csv`
    pub fn csv_path(&self, ticker: &str, frequency: Frequency) -> PathBuf {
        self.dir(frequency).join(format!("{}.csv", ticker.to_lowercase()))
    }

    /// `{root}/{freq}/{ticker-lowercase}.zip`
    pub fn zip_path(&self, ticker: &str, frequency: Frequency) -> PathBuf {
        self.dir(frequency).join(format!("{}.zip", ticker.to_lowercase()))
    }
}

/// A written output file and the rows it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutput {
    pub ticker: String,
    pub frequency: Frequency,
    pub path: PathBuf,
    pub bars: Vec<LeanBar>,
}

#[derive(Debug, Clone, Default)]
pub struct LeanConverter {
    layout: OutputLayout,
    style: DateStyle,
}

impl LeanConverter {
    pub fn new(layout: OutputLayout, style: DateStyle) -> Self {
        Self { layout, style }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn style(&self) -> DateStyle {
        self.style
    }

    /// Write the ticker's converted file, replacing any previous one.
    ///
    /// Empty input writes an empty file.
    pub fn convert(
        &self,
        ticker: &str,
        records: &[TimeSeriesRecord],
        frequency: Frequency,
    ) -> Result<ConversionOutput, PersistenceError> {
        let bars = to_lean_bars(ticker, records, self.style)?;

        let dir = self.layout.dir(frequency);
        fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;

        let path = self.layout.csv_path(ticker, frequency);
        let tmp_path = path.with_extension("csv.tmp");
        if let Err(e) = write_bars(&tmp_path, &bars) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            PersistenceError::io(&path, e)
        })?;

        debug!(ticker, rows = bars.len(), path = %path.display(), "wrote LEAN csv");
        Ok(ConversionOutput {
            ticker: ticker.to_string(),
            frequency,
            path,
            bars,
        })
    }
}

fn write_bars(path: &Path, bars: &[LeanBar]) -> Result<(), PersistenceError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| PersistenceError::csv(path, e))?;
    for bar in bars {
        writer.serialize(bar).map_err(|e| PersistenceError::csv(path, e))?;
    }
    writer.flush().map_err(|e| PersistenceError::io(path, e))
}
