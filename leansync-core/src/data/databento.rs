//! Databento historical data provider.
//!
//! Fetches OHLCV bars from the `timeseries.get_range` endpoint as CSV. Handles
//! rate limiting, retries with exponential backoff and jitter, response
//! parsing, and the circuit breaker.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{FetchError, FetchRequest, Fetcher};
use super::store::parse_timestamp;
use crate::domain::TimeSeriesRecord;
use chrono::{Days, NaiveDate};
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://hist.databento.com";
pub const DEFAULT_DATASET: &str = "XNAS.ITCH";

/// Longest error body carried into a `FetchError::Remote` message.
const MAX_ERROR_BODY: usize = 200;

/// Connection and retry settings for [`DatabentoProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct DatabentoSettings {
    pub base_url: String,
    pub dataset: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for DatabentoSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            dataset: DEFAULT_DATASET.to_string(),
            timeout: Duration::from_secs(300),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// One row of a `encoding=csv` response. Columns not named here
/// (rtype, publisher_id, instrument_id, symbol) are ignored.
#[derive(Debug, Deserialize)]
struct ResponseRow {
    ts_event: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

/// Databento historical data provider.
pub struct DatabentoProvider {
    client: reqwest::blocking::Client,
    api_key: String,
    settings: DatabentoSettings,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl DatabentoProvider {
    pub fn new(
        api_key: impl Into<String>,
        settings: DatabentoSettings,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("leansync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            settings,
            circuit_breaker,
        })
    }

    pub fn settings(&self) -> &DatabentoSettings {
        &self.settings
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v0/timeseries.get_range",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    /// Form body for one request.
    ///
    /// The API treats `end` as exclusive, so the day after the inclusive end
    /// date is sent.
    fn form_fields(&self, request: &FetchRequest) -> Vec<(&'static str, String)> {
        let end = request.range.end();
        let end_exclusive = end.checked_add_days(Days::new(1)).unwrap_or(end);
        vec![
            ("dataset", self.settings.dataset.clone()),
            ("symbols", request.ticker.clone()),
            ("schema", request.frequency.provider_schema().to_string()),
            ("start", format_day(request.range.start())),
            ("end", format_day(end_exclusive)),
            ("stype_in", "raw_symbol".to_string()),
            ("encoding", "csv".to_string()),
            ("pretty_px", "true".to_string()),
            ("pretty_ts", "true".to_string()),
            ("map_symbols", "true".to_string()),
        ]
    }

    /// Backoff before retry `attempt` (1-based): base * 2^(attempt-1) plus up
    /// to half the base as jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.settings.base_delay * 2u32.saturating_pow(attempt - 1);
        let jitter_cap = self.settings.base_delay.as_millis() as u64 / 2;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        exp + Duration::from_millis(jitter)
    }

    /// Execute the request with retry and circuit breaker logic.
    fn fetch_with_retry(&self, request: &FetchRequest) -> Result<Vec<TimeSeriesRecord>, FetchError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(FetchError::CircuitBreakerTripped);
        }

        let url = self.endpoint();
        let form = self.form_fields(request);
        let mut last_error = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                warn!(
                    ticker = %request.ticker,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error.as_ref().map(ToString::to_string).unwrap_or_default(),
                    "retrying Databento request"
                );
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(FetchError::CircuitBreakerTripped);
            }

            debug!(ticker = %request.ticker, range = %request.range, %url, "requesting Databento range");

            match self
                .client
                .post(&url)
                .basic_auth(&self.api_key, Some(""))
                .form(&form)
                .send()
            {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::UNAUTHORIZED
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        // Bad credentials fail every later ticker too.
                        self.circuit_breaker.trip();
                        return Err(FetchError::Authentication(format!(
                            "Databento rejected the API key (HTTP {})",
                            status.as_u16()
                        )));
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        last_error = Some(FetchError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status.is_server_error() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(FetchError::Remote {
                            status: status.as_u16(),
                            message: error_message(resp),
                        });
                        continue;
                    }

                    if !status.is_success() {
                        return Err(FetchError::Remote {
                            status: status.as_u16(),
                            message: error_message(resp),
                        });
                    }

                    let body = resp.text().map_err(|e| {
                        FetchError::ResponseFormat(format!(
                            "failed to read response for {}: {e}",
                            request.ticker
                        ))
                    })?;

                    let records = parse_csv_response(&body)?;
                    self.circuit_breaker.record_success();
                    debug!(ticker = %request.ticker, rows = records.len(), "Databento response parsed");
                    return Ok(records);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(FetchError::Network(e.to_string()));
                        continue;
                    }
                    return Err(FetchError::Network(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Network("max retries exceeded".into())))
    }
}

impl Fetcher for DatabentoProvider {
    fn name(&self) -> &str {
        "databento"
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Vec<TimeSeriesRecord>, FetchError> {
        self.fetch_with_retry(request)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

fn format_day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn error_message(resp: reqwest::blocking::Response) -> String {
    let body = resp.text().unwrap_or_default();
    let body = body.trim();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}

/// Parse a CSV body returned with `pretty_px=true` and `pretty_ts=true`.
///
/// An empty body (no bars in range) yields no records.
pub fn parse_csv_response(body: &str) -> Result<Vec<TimeSeriesRecord>, FetchError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut records = Vec::new();
    for (i, row) in reader.deserialize::<ResponseRow>().enumerate() {
        let row = row.map_err(|e| FetchError::ResponseFormat(format!("row {}: {e}", i + 1)))?;
        let timestamp = parse_timestamp(&row.ts_event).ok_or_else(|| {
            FetchError::ResponseFormat(format!("row {}: invalid ts_event '{}'", i + 1, row.ts_event))
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
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DateRange, Frequency};
    use chrono::{TimeZone, Utc};

    fn provider(settings: DatabentoSettings) -> DatabentoProvider {
        DatabentoProvider::new(
            "db-test-key",
            settings,
            Arc::new(CircuitBreaker::new(Duration::from_secs(60), 3)),
        )
        .unwrap()
    }

    fn request() -> FetchRequest {
        FetchRequest {
            ticker: "AAPL".into(),
            range: DateRange::new(
                NaiveDate::from_ymd_opt(2022, 12, 31).unwrap(),
                NaiveDate::from_ymd_opt(2023, 1, 8).unwrap(),
            )
            .unwrap(),
            frequency: Frequency::Daily,
        }
    }

    #[test]
    fn parses_pretty_csv_response() {
        let body = "ts_event,rtype,publisher_id,instrument_id,open,high,low,close,volume,symbol\n\
                    2023-01-03T00:00:00.000000000Z,35,2,32,130.28,130.9,124.17,125.07,112117471,AAPL\n\
                    2023-01-04T00:00:00.000000000Z,35,2,32,126.89,128.66,125.08,126.36,89113633,AAPL\n";

        let records = parse_csv_response(body).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap());
        assert_eq!(records[0].open, 130.28);
        assert_eq!(records[1].close, 126.36);
        assert_eq!(records[1].volume, 89_113_633);
    }

    #[test]
    fn empty_body_is_no_records() {
        assert!(parse_csv_response("").unwrap().is_empty());
        assert!(parse_csv_response("ts_event,open,high,low,close,volume\n").unwrap().is_empty());
    }

    #[test]
    fn malformed_row_is_format_error() {
        let body = "ts_event,open,high,low,close,volume\n2023-01-03T00:00:00Z,abc,1,1,1,1\n";
        assert!(matches!(parse_csv_response(body), Err(FetchError::ResponseFormat(_))));

        let body = "ts_event,open,high,low,close,volume\nnot-a-time,1,1,1,1,1\n";
        match parse_csv_response(body) {
            Err(FetchError::ResponseFormat(msg)) => assert!(msg.contains("not-a-time")),
            other => panic!("expected ResponseFormat, got {other:?}"),
        }
    }

    #[test]
    fn form_sends_exclusive_end_and_schema() {
        let p = provider(DatabentoSettings::default());
        let form = p.form_fields(&request());
        let get = |k: &str| form.iter().find(|(key, _)| *key == k).map(|(_, v)| v.as_str());

        assert_eq!(get("dataset"), Some("XNAS.ITCH"));
        assert_eq!(get("symbols"), Some("AAPL"));
        assert_eq!(get("schema"), Some("ohlcv-1d"));
        assert_eq!(get("start"), Some("2022-12-31"));
        assert_eq!(get("end"), Some("2023-01-09"));
        assert_eq!(get("encoding"), Some("csv"));
        assert_eq!(get("stype_in"), Some("raw_symbol"));
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let p = provider(DatabentoSettings {
            base_url: "http://localhost:8080/".into(),
            ..DatabentoSettings::default()
        });
        assert_eq!(p.endpoint(), "http://localhost:8080/v0/timeseries.get_range");
    }

    #[test]
    fn backoff_grows_exponentially_within_jitter() {
        let p = provider(DatabentoSettings {
            base_delay: Duration::from_millis(100),
            ..DatabentoSettings::default()
        });
        let first = p.backoff(1);
        let third = p.backoff(3);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(450));
    }

    #[test]
    fn tripped_breaker_fails_fast() {
        let breaker = Arc::new(CircuitBreaker::new(Duration::from_secs(60), 3));
        breaker.trip();
        let p = DatabentoProvider::new(
            "key",
            DatabentoSettings {
                base_url: "http://127.0.0.1:9".into(),
                ..DatabentoSettings::default()
            },
            breaker,
        )
        .unwrap();

        assert!(!p.is_available());
        assert!(matches!(p.fetch(&request()), Err(FetchError::CircuitBreakerTripped)));
    }
}
