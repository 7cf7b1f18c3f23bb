//! Sync configuration: a TOML file for the run shape, the environment for
//! credentials.
//!
//! Every field has a default, so a missing `leansync.toml` is not an error.
//! Credentials are never read from the file.

use chrono::{Duration, NaiveDate};
use leansync_core::convert::DEFAULT_OUTPUT_ROOT;
use leansync_core::data::databento::{DEFAULT_BASE_URL, DEFAULT_DATASET};
use leansync_core::data::{DatabentoSettings, MergePolicy, DEFAULT_BUFFER_DAYS};
use leansync_core::domain::{DateRange, DateStyle, Frequency};
use leansync_core::sink::SinkConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::pipeline::PipelineSettings;

pub const DEFAULT_CONFIG_FILE: &str = "leansync.toml";

pub const ENV_API_KEY: &str = "DATABENTO_API_KEY";
/// Lowercase name the earlier download scripts read.
pub const ENV_API_KEY_LEGACY: &str = "databento_api_key";
pub const ENV_DB_USER: &str = "LEANSYNC_DB_USER";
pub const ENV_DB_PASSWORD: &str = "LEANSYNC_DB_PASSWORD";
pub const ENV_DB_HOST: &str = "LEANSYNC_DB_HOST";

/// Default lookback when no start date is configured.
const DEFAULT_LOOKBACK_DAYS: i64 = 365;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing environment variable {0}")]
    MissingEnv(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Full configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub pipeline: PipelineSection,
    pub paths: PathsSection,
    pub provider: ProviderSection,
    pub sink: SinkSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    pub tickers: Vec<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub frequency: Frequency,
    pub date_style: DateStyle,
    pub buffer_days: i64,
    pub merge_policy: MergePolicy,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            tickers: Vec::new(),
            start: None,
            end: None,
            frequency: Frequency::default(),
            date_style: DateStyle::default(),
            buffer_days: DEFAULT_BUFFER_DAYS,
            merge_policy: MergePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsSection {
    pub store_dir: PathBuf,
    pub output_root: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("databento/downloads"),
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSection {
    pub dataset: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 300,
            max_retries: 3,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SinkSection {
    pub enabled: bool,
    pub schema: String,
    pub scheme: String,
    pub database: String,
    pub port: Option<u16>,
}

impl Default for SinkSection {
    fn default() -> Self {
        Self {
            enabled: false,
            schema: "public".to_string(),
            scheme: "postgresql".to_string(),
            database: "leansync".to_string(),
            port: None,
        }
    }
}

impl SyncConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load from `path` when given (must exist), else from
    /// `leansync.toml` if present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Inclusive requested range. End defaults to `today`, start to one
    /// year before end.
    pub fn requested_range(&self, today: NaiveDate) -> Result<DateRange, ConfigError> {
        let end = self.pipeline.end.unwrap_or(today);
        let start = self
            .pipeline
            .start
            .unwrap_or_else(|| end - Duration::days(DEFAULT_LOOKBACK_DAYS));
        DateRange::new(start, end)
            .ok_or_else(|| ConfigError::Invalid(format!("start date {start} is after end date {end}")))
    }

    /// Checks shared by every command that processes tickers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.tickers.is_empty() {
            return Err(ConfigError::Invalid("no tickers given".into()));
        }
        for ticker in &self.pipeline.tickers {
            validate_ticker(ticker)?;
        }
        if self.pipeline.buffer_days < 0 {
            return Err(ConfigError::Invalid(format!(
                "buffer_days must be >= 0, got {}",
                self.pipeline.buffer_days
            )));
        }
        if let (Some(start), Some(end)) = (self.pipeline.start, self.pipeline.end) {
            if start > end {
                return Err(ConfigError::Invalid(format!(
                    "start date {start} is after end date {end}"
                )));
            }
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            store_dir: self.paths.store_dir.clone(),
            output_root: self.paths.output_root.clone(),
            frequency: self.pipeline.frequency,
            date_style: self.pipeline.date_style,
            buffer_days: self.pipeline.buffer_days,
            merge_policy: self.pipeline.merge_policy,
            sink_schema: self.sink.schema.clone(),
        }
    }

    pub fn databento_settings(&self) -> DatabentoSettings {
        DatabentoSettings {
            base_url: self.provider.base_url.clone(),
            dataset: self.provider.dataset.clone(),
            timeout: std::time::Duration::from_secs(self.provider.timeout_secs),
            max_retries: self.provider.max_retries,
            base_delay: std::time::Duration::from_millis(self.provider.retry_base_delay_ms),
        }
    }

    /// Relational connection details; user, password and host come from
    /// `lookup` (normally the process environment).
    pub fn sink_config<F>(&self, lookup: F) -> Result<SinkConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |var: &str| {
            lookup(var)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnv(var.to_string()))
        };
        Ok(SinkConfig {
            scheme: self.sink.scheme.clone(),
            user: require(ENV_DB_USER)?,
            password: lookup(ENV_DB_PASSWORD)
                .ok_or_else(|| ConfigError::MissingEnv(ENV_DB_PASSWORD.to_string()))?,
            host: require(ENV_DB_HOST)?,
            port: self.sink.port,
            database: self.sink.database.clone(),
        })
    }
}

/// Provider API key, preferring `DATABENTO_API_KEY` over the legacy
/// lowercase name.
pub fn api_key<F>(lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(ENV_API_KEY)
        .filter(|k| !k.trim().is_empty())
        .or_else(|| lookup(ENV_API_KEY_LEGACY).filter(|k| !k.trim().is_empty()))
        .map(|k| k.trim().to_string())
        .ok_or_else(|| ConfigError::MissingEnv(ENV_API_KEY.to_string()))
}

/// Process-environment lookup for [`api_key`] and [`SyncConfig::sink_config`].
pub fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Tickers become file names and table names, so only `[A-Za-z0-9._-]`.
pub fn validate_ticker(ticker: &str) -> Result<(), ConfigError> {
    let ok = !ticker.is_empty()
        && ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("invalid ticker '{ticker}'")))
    }
}
