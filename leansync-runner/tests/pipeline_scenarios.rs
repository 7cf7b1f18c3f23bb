//! End-to-end pipeline scenarios with recording fakes for the fetcher and
//! the sink. No network or database is touched.
//!
//! Scenarios:
//! 1. No local store: buffered full fetch, output + archive written
//! 2. Store covers the request: fetcher never called, output regenerated
//! 3. Store has a gap: buffered fetch, stored rows win on collision
//! 4. One ticker's fetch failure leaves the others intact
//! 5. Sink failure is recorded but the CSV and zip stay in place
//! 6. Regenerate rebuilds output from the store alone
//! 7. A local read or encode failure aborts its ticker before any output

use chrono::{NaiveDate, TimeZone, Utc};
use leansync_core::convert::LeanBar;
use leansync_core::data::{CanonicalStore, Coverage, FetchError, FetchRequest, Fetcher};
use leansync_core::domain::{DateRange, DateStyle, TimeSeriesRecord};
use leansync_core::error::PersistenceError;
use leansync_core::sink::{SinkError, SinkWriter};
use leansync_runner::{
    regenerate_batch, run_batch, LogProgress, Pipeline, PipelineSettings, SinkOutcome, TickerError,
};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

// ──────────────────────────────────────────────
// Fakes
// ──────────────────────────────────────────────

#[derive(Clone)]
enum Script {
    Rows(Vec<TimeSeriesRecord>),
    NetworkDown,
}

/// Returns scripted rows per ticker and records every request.
struct RecordingFetcher {
    scripts: HashMap<String, Script>,
    calls: Arc<Mutex<Vec<FetchRequest>>>,
}

impl RecordingFetcher {
    fn new(scripts: &[(&str, Script)]) -> (Self, Arc<Mutex<Vec<FetchRequest>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let fetcher = Self {
            scripts: scripts
                .iter()
                .map(|(t, s)| (t.to_string(), s.clone()))
                .collect(),
            calls: Arc::clone(&calls),
        };
        (fetcher, calls)
    }
}

impl Fetcher for RecordingFetcher {
    fn name(&self) -> &str {
        "recording"
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Vec<TimeSeriesRecord>, FetchError> {
        self.calls.lock().unwrap().push(request.clone());
        match self.scripts.get(&request.ticker) {
            Some(Script::Rows(rows)) => Ok(rows.clone()),
            Some(Script::NetworkDown) => Err(FetchError::Network("connection refused".into())),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SinkCall {
    ticker: String,
    schema: String,
    bars: Vec<LeanBar>,
}

struct RecordingSink {
    fail: bool,
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    fn new(fail: bool) -> (Self, Arc<Mutex<Vec<SinkCall>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                fail,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl SinkWriter for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn write(&self, ticker: &str, schema: &str, bars: &[LeanBar]) -> Result<usize, SinkError> {
        self.calls.lock().unwrap().push(SinkCall {
            ticker: ticker.to_string(),
            schema: schema.to_string(),
            bars: bars.to_vec(),
        });
        if self.fail {
            return Err(SinkError::Connect {
                target: "postgresql://lean:***@db/leansync".into(),
                message: "connection refused".into(),
            });
        }
        Ok(bars.len())
    }
}

// ──────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn range(start: NaiveDate, end: NaiveDate) -> DateRange {
    DateRange::new(start, end).unwrap()
}

fn bar(y: i32, m: u32, day: u32, close: f64) -> TimeSeriesRecord {
    TimeSeriesRecord {
        timestamp: Utc.with_ymd_and_hms(y, m, day, 0, 0, 0).unwrap(),
        open: close - 1.0,
        high: close + 1.0,
        low: close - 2.0,
        close,
        volume: 1_000,
    }
}

fn settings(root: &Path) -> PipelineSettings {
    PipelineSettings {
        store_dir: root.join("databento/downloads"),
        output_root: root.join("data/equity/usa"),
        ..PipelineSettings::default()
    }
}

fn read_zip_entry(zip_path: &Path, name: &str) -> Vec<u8> {
    let mut zip = zip::ZipArchive::new(fs::File::open(zip_path).unwrap()).unwrap();
    assert_eq!(zip.len(), 1);
    let mut entry = zip.by_name(name).unwrap();
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).unwrap();
    bytes
}

// ──────────────────────────────────────────────
// Scenarios
// ──────────────────────────────────────────────

#[test]
fn aapl_without_store_fetches_buffered_range() {
    let dir = tempfile::tempdir().unwrap();
    let rows = vec![bar(2023, 1, 3, 125.0), bar(2023, 1, 4, 126.5), bar(2023, 1, 5, 125.25)];
    let (fetcher, calls) = RecordingFetcher::new(&[("AAPL", Script::Rows(rows.clone()))]);
    let pipeline = Pipeline::new(settings(dir.path())).with_fetcher(Box::new(fetcher));

    let report = pipeline
        .sync_ticker("AAPL", range(d(2023, 1, 3), d(2023, 1, 5)))
        .unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].range, range(d(2022, 12, 31), d(2023, 1, 8)));

    let daily = dir.path().join("data/equity/usa/daily");
    assert_eq!(report.output, daily.join("aapl.csv"));
    assert_eq!(report.archive, daily.join("aapl.zip"));
    assert!(daily.join("aapl.csv").is_file());
    assert!(daily.join("aapl.zip").is_file());
    assert_eq!(report.coverage, Some(Coverage::NoLocalData));
    assert_eq!(report.rows, 3);

    let csv = fs::read_to_string(&report.output).unwrap();
    assert_eq!(
        csv.lines().next().unwrap(),
        "20230103 00:00,1240000,1260000,1230000,1250000,1000"
    );
    assert_eq!(read_zip_entry(&report.archive, "aapl.csv"), fs::read(&report.output).unwrap());

    let store = CanonicalStore::new(dir.path().join("databento/downloads"));
    assert_eq!(store.load("AAPL").unwrap().unwrap(), rows);
}

#[test]
fn qqq_covered_store_skips_fetch_and_regenerates_output() {
    let dir = tempfile::tempdir().unwrap();
    let s = settings(dir.path());
    let store = CanonicalStore::new(&s.store_dir);
    let history = vec![bar(2023, 9, 1, 374.5), bar(2023, 10, 2, 360.0), bar(2023, 12, 31, 409.5)];
    store.write("QQQ", &history, "seed").unwrap();

    let (fetcher, calls) = RecordingFetcher::new(&[]);
    let pipeline = Pipeline::new(s).with_fetcher(Box::new(fetcher));

    let report = pipeline
        .sync_ticker("QQQ", range(d(2023, 9, 1), d(2023, 12, 31)))
        .unwrap();

    assert!(calls.lock().unwrap().is_empty());
    assert!(matches!(report.coverage, Some(Coverage::Covered(_))));
    assert!(report.fetch.is_none());
    assert_eq!(report.rows, 3);
    assert!(report.output.is_file());
    assert!(report.archive.is_file());
    assert_eq!(store.load("QQQ").unwrap().unwrap(), history);
}

#[test]
fn gap_fetches_buffered_range_and_keeps_stored_rows() {
    let dir = tempfile::tempdir().unwrap();
    let s = settings(dir.path());
    let store = CanonicalStore::new(&s.store_dir);
    store
        .write("QQQ", &[bar(2023, 9, 1, 374.5), bar(2023, 12, 29, 409.5)], "seed")
        .unwrap();

    let fetched = vec![bar(2023, 12, 29, 999.0), bar(2024, 1, 2, 402.5)];
    let (fetcher, calls) = RecordingFetcher::new(&[("QQQ", Script::Rows(fetched))]);
    let pipeline = Pipeline::new(s).with_fetcher(Box::new(fetcher));

    let report = pipeline
        .sync_ticker("QQQ", range(d(2023, 9, 1), d(2023, 12, 31)))
        .unwrap();

    assert_eq!(calls.lock().unwrap()[0].range, range(d(2023, 8, 29), d(2024, 1, 3)));
    assert!(matches!(report.coverage, Some(Coverage::Gap(_))));
    let fetch = report.fetch.unwrap();
    assert_eq!(fetch.merge.added, 1);
    assert_eq!(fetch.merge.duplicates_discarded, 1);

    let stored = store.load("QQQ").unwrap().unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[1].close, 409.5);
    assert_eq!(stored[2].timestamp, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
}

#[test]
fn fetch_failure_is_isolated_to_its_ticker() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, calls) = RecordingFetcher::new(&[
        ("BAD", Script::NetworkDown),
        ("AAPL", Script::Rows(vec![bar(2023, 1, 3, 125.0)])),
    ]);
    let pipeline = Pipeline::new(settings(dir.path())).with_fetcher(Box::new(fetcher));
    let tickers = vec!["BAD".to_string(), "AAPL".to_string()];

    let summary = run_batch(&pipeline, &tickers, range(d(2023, 1, 3), d(2023, 1, 5)), &LogProgress);

    assert_eq!(calls.lock().unwrap().len(), 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert!(!summary.all_succeeded());
    assert_eq!(summary.errors[0].0, "BAD");
    assert!(matches!(summary.errors[0].1, TickerError::Fetch(FetchError::Network(_))));

    let daily = dir.path().join("data/equity/usa/daily");
    assert!(!daily.join("bad.csv").exists());
    assert!(!dir.path().join("databento/downloads/BAD_data.csv").exists());
    assert!(daily.join("aapl.csv").is_file());
    assert_eq!(summary.reports[0].ticker, "AAPL");
}

#[test]
fn sink_failure_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, _) = RecordingFetcher::new(&[("AAPL", Script::Rows(vec![bar(2023, 1, 3, 125.0)]))]);
    let (sink, sink_calls) = RecordingSink::new(true);
    let pipeline = Pipeline::new(settings(dir.path()))
        .with_fetcher(Box::new(fetcher))
        .with_sink(Box::new(sink));
    let tickers = vec!["AAPL".to_string()];

    let summary = run_batch(&pipeline, &tickers, range(d(2023, 1, 3), d(2023, 1, 5)), &LogProgress);

    assert!(summary.all_succeeded());
    assert_eq!(summary.sink_failures(), 1);
    let report = &summary.reports[0];
    assert!(matches!(report.sink, SinkOutcome::Failed(SinkError::Connect { .. })));
    assert!(report.output.is_file());
    assert!(report.archive.is_file());
    assert_eq!(sink_calls.lock().unwrap().len(), 1);
}

#[test]
fn sink_receives_converted_rows_under_configured_schema() {
    let dir = tempfile::tempdir().unwrap();
    let (fetcher, _) = RecordingFetcher::new(&[(
        "AAPL",
        Script::Rows(vec![bar(2023, 1, 3, 125.0), bar(2023, 1, 4, 126.5)]),
    )]);
    let (sink, sink_calls) = RecordingSink::new(false);
    let pipeline = Pipeline::new(PipelineSettings {
        sink_schema: "equity".into(),
        ..settings(dir.path())
    })
    .with_fetcher(Box::new(fetcher))
    .with_sink(Box::new(sink));

    let report = pipeline
        .sync_ticker("AAPL", range(d(2023, 1, 3), d(2023, 1, 4)))
        .unwrap();

    assert!(matches!(report.sink, SinkOutcome::Written { rows: 2 }));
    let calls = sink_calls.lock().unwrap();
    assert_eq!(calls[0].ticker, "AAPL");
    assert_eq!(calls[0].schema, "equity");
    assert_eq!(calls[0].bars[1].close, 1_265_000);
}

#[test]
fn regenerate_uses_store_only() {
    let dir = tempfile::tempdir().unwrap();
    let s = PipelineSettings {
        date_style: DateStyle::DateOnly,
        ..settings(dir.path())
    };
    CanonicalStore::new(&s.store_dir)
        .write("SPY", &[bar(2024, 6, 3, 527.5)], "seed")
        .unwrap();

    let (fetcher, calls) = RecordingFetcher::new(&[]);
    let pipeline = Pipeline::new(s).with_fetcher(Box::new(fetcher));
    let tickers = vec!["SPY".to_string(), "NOPE".to_string()];

    let summary = regenerate_batch(&pipeline, &tickers, &LogProgress);

    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    let csv = fs::read_to_string(&summary.reports[0].output).unwrap();
    assert_eq!(csv, "20240603,5265000,5285000,5255000,5275000,1000\n");
}

#[test]
fn persistence_failure_aborts_ticker_and_batch_continues() {
    let dir = tempfile::tempdir().unwrap();
    let s = settings(dir.path());
    fs::create_dir_all(&s.store_dir).unwrap();
    fs::write(
        s.store_dir.join("CORRUPT_data.csv"),
        "ts_event,open,high,low,close,volume\n\
         2023-01-03 00:00:00+00:00,1,1,1,1,1\n\
         not-a-time,1,1,1,1,1\n",
    )
    .unwrap();

    let mut poisoned = bar(2023, 1, 4, 50.0);
    poisoned.close = f64::NAN;
    let (fetcher, calls) = RecordingFetcher::new(&[
        ("NANX", Script::Rows(vec![bar(2023, 1, 3, 50.0), poisoned])),
        ("AAPL", Script::Rows(vec![bar(2023, 1, 3, 125.0)])),
    ]);
    let (sink, sink_calls) = RecordingSink::new(false);
    let pipeline = Pipeline::new(s)
        .with_fetcher(Box::new(fetcher))
        .with_sink(Box::new(sink));
    let tickers = vec!["CORRUPT".to_string(), "NANX".to_string(), "AAPL".to_string()];

    let summary = run_batch(&pipeline, &tickers, range(d(2023, 1, 3), d(2023, 1, 5)), &LogProgress);

    assert_eq!(summary.failed, 2);
    assert_eq!(summary.succeeded, 1);
    match &summary.errors[0] {
        (ticker, TickerError::Persistence(PersistenceError::BadTimestamp { value, .. })) => {
            assert_eq!(ticker, "CORRUPT");
            assert_eq!(value, "not-a-time");
        }
        other => panic!("expected BadTimestamp for CORRUPT, got {other:?}"),
    }
    match &summary.errors[1] {
        (ticker, TickerError::Persistence(PersistenceError::InvalidRecord { reason, .. })) => {
            assert_eq!(ticker, "NANX");
            assert!(reason.contains("close"));
        }
        other => panic!("expected InvalidRecord for NANX, got {other:?}"),
    }

    // CORRUPT fails while planning, before any fetch.
    let fetched: Vec<String> = calls.lock().unwrap().iter().map(|r| r.ticker.clone()).collect();
    assert_eq!(fetched, vec!["NANX", "AAPL"]);

    let daily = dir.path().join("data/equity/usa/daily");
    for name in ["corrupt", "nanx"] {
        assert!(!daily.join(format!("{name}.csv")).exists());
        assert!(!daily.join(format!("{name}.zip")).exists());
    }
    assert!(daily.join("aapl.zip").is_file());

    let sink_calls = sink_calls.lock().unwrap();
    assert_eq!(sink_calls.len(), 1);
    assert_eq!(sink_calls[0].ticker, "AAPL");
    assert_eq!(summary.reports[0].ticker, "AAPL");
}
