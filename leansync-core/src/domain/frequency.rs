//! Bar frequency buckets and output date styles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Frequency bucket a ticker's converted output is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Hourly,
    Minute,
}

impl Frequency {
    /// Directory name under the output root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Hourly => "hourly",
            Frequency::Minute => "minute",
        }
    }

    /// Databento OHLCV schema for this bar size.
    pub fn provider_schema(&self) -> &'static str {
        match self {
            Frequency::Daily => "ohlcv-1d",
            Frequency::Hourly => "ohlcv-1h",
            Frequency::Minute => "ohlcv-1m",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "hourly" => Ok(Frequency::Hourly),
            "minute" => Ok(Frequency::Minute),
            other => Err(format!(
                "unknown frequency '{other}' (expected daily, hourly or minute)"
            )),
        }
    }
}

/// How the `date` column of a converted row is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DateStyle {
    /// `yyyyMMdd HH:mm`
    #[default]
    DateTime,
    /// `yyyyMMdd`
    DateOnly,
}

impl DateStyle {
    /// chrono format string for this style.
    pub fn pattern(&self) -> &'static str {
        match self {
            DateStyle::DateTime => "%Y%m%d %H:%M",
            DateStyle::DateOnly => "%Y%m%d",
        }
    }
}
