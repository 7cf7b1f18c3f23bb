//! TimeSeriesRecord — one OHLCV bar keyed by its event timestamp.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar for a single ticker at a single event time.
///
/// The timestamp holds the wall-clock event time. Offsets seen on read are
/// stripped, not converted, so the date a bar belongs to never shifts. Records are unique by timestamp within
/// a ticker's canonical store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRecord {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl TimeSeriesRecord {
    /// Event time without a zone, for comparisons against naive requested
    /// dates.
    pub fn naive_timestamp(&self) -> NaiveDateTime {
        self.timestamp.naive_utc()
    }

    /// True if every price field is a finite number.
    pub fn has_finite_prices(&self) -> bool {
        self.open.is_finite() && self.high.is_finite() && self.low.is_finite() && self.close.is_finite()
    }
}
