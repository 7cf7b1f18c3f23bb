//! Per-ticker pipeline.
//!
//! State flow for one ticker:
//!
//! ```text
//! plan ─┬─ Covered ──────────────────────────────┐
//!       ├─ NoLocalData ─ fetch(buffered) ─ merge ─┤
//!       └─ Gap ───────── fetch(buffered) ─ merge ─┴─ convert ─ archive ─ sink
//! ```
//!
//! A fetch error aborts the ticker before anything is written. Persistence
//! errors abort it wherever they happen. Sink errors are recorded in the
//! report and never abort.

use leansync_core::archive::archive;
use leansync_core::convert::{LeanConverter, OutputLayout, DEFAULT_OUTPUT_ROOT};
use leansync_core::data::{
    merge, CanonicalStore, Coverage, FetchError, FetchRequest, Fetcher, MergePolicy, MergeStats,
    RangeTracker, SyncDecision, DEFAULT_BUFFER_DAYS,
};
use leansync_core::domain::{DateRange, DateStyle, Frequency, TimeSeriesRecord};
use leansync_core::error::PersistenceError;
use leansync_core::sink::{SinkError, SinkWriter};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a ticker was aborted.
#[derive(Debug, Error)]
pub enum TickerError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Knobs for one pipeline instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub store_dir: PathBuf,
    pub output_root: PathBuf,
    pub frequency: Frequency,
    pub date_style: DateStyle,
    pub buffer_days: i64,
    pub merge_policy: MergePolicy,
    /// Schema the sink writes ticker tables into.
    pub sink_schema: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("databento/downloads"),
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            frequency: Frequency::default(),
            date_style: DateStyle::default(),
            buffer_days: DEFAULT_BUFFER_DAYS,
            merge_policy: MergePolicy::default(),
            sink_schema: "public".to_string(),
        }
    }
}

/// What a fetch step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    pub range: DateRange,
    pub rows_fetched: usize,
    pub merge: MergeStats,
}

#[derive(Debug)]
pub enum SinkOutcome {
    /// No sink configured.
    Disabled,
    Written { rows: usize },
    Failed(SinkError),
}

impl SinkOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SinkOutcome::Failed(_))
    }
}

/// Result of a ticker that ran to completion.
#[derive(Debug)]
pub struct TickerReport {
    pub ticker: String,
    /// `None` for a regenerate, which never checks coverage.
    pub coverage: Option<Coverage>,
    /// `None` when the fetch was skipped.
    pub fetch: Option<FetchSummary>,
    pub output: PathBuf,
    pub archive: PathBuf,
    pub rows: usize,
    pub sink: SinkOutcome,
}

/// Sync pipeline with injectable fetcher and sink.
pub struct Pipeline {
    settings: PipelineSettings,
    store: CanonicalStore,
    tracker: RangeTracker,
    converter: LeanConverter,
    fetcher: Option<Box<dyn Fetcher>>,
    sink: Option<Box<dyn SinkWriter>>,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            store: CanonicalStore::new(&settings.store_dir),
            tracker: RangeTracker::new(settings.buffer_days),
            converter: LeanConverter::new(OutputLayout::new(&settings.output_root), settings.date_style),
            settings,
            fetcher: None,
            sink: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Box<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn SinkWriter>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn store(&self) -> &CanonicalStore {
        &self.store
    }

    /// Bring the ticker's store up to `requested`, then regenerate its output.
    pub fn sync_ticker(&self, ticker: &str, requested: DateRange) -> Result<TickerReport, TickerError> {
        let plan = self.tracker.plan(&self.store, ticker, requested)?;
        match plan.coverage {
            Coverage::NoLocalData => info!(ticker, %requested, "no local data"),
            Coverage::Covered(span) => {
                info!(ticker, %requested, first = %span.first, last = %span.last, "store covers requested range, skipping fetch")
            }
            Coverage::Gap(span) => {
                info!(ticker, %requested, first = %span.first, last = %span.last, "store does not cover requested range")
            }
        }

        let (records, fetch) = match plan.decision {
            SyncDecision::Skip => {
                let records = self.load_existing(ticker)?;
                (records, None)
            }
            SyncDecision::FetchRange(range) => {
                let (records, summary) = self.fetch_and_merge(ticker, range)?;
                (records, Some(summary))
            }
        };

        let mut report = self.publish(ticker, &records)?;
        report.coverage = Some(plan.coverage);
        report.fetch = fetch;
        Ok(report)
    }

    /// Rebuild output, archive and sink copy from the stored history alone.
    pub fn regenerate(&self, ticker: &str) -> Result<TickerReport, TickerError> {
        let records = self.load_existing(ticker)?;
        info!(ticker, rows = records.len(), "regenerating output from store");
        self.publish(ticker, &records)
    }

    fn load_existing(&self, ticker: &str) -> Result<Vec<TimeSeriesRecord>, PersistenceError> {
        self.store.load(ticker)?.ok_or_else(|| PersistenceError::MissingStore {
            ticker: ticker.to_string(),
            path: self.store.store_path(ticker),
        })
    }

    fn fetch_and_merge(
        &self,
        ticker: &str,
        range: DateRange,
    ) -> Result<(Vec<TimeSeriesRecord>, FetchSummary), TickerError> {
        let fetcher = self
            .fetcher
            .as_deref()
            .ok_or_else(|| FetchError::Unavailable("no fetcher configured".into()))?;

        let request = FetchRequest {
            ticker: ticker.to_string(),
            range,
            frequency: self.settings.frequency,
        };
        info!(ticker, %range, source = fetcher.name(), "fetching");
        let fetched = fetcher.fetch(&request)?;
        let rows_fetched = fetched.len();

        let existing = self.store.load(ticker)?.unwrap_or_default();
        let (merged, stats) = merge(existing, fetched, self.settings.merge_policy);
        debug!(
            ticker,
            existing = stats.existing,
            fetched = stats.fetched,
            added = stats.added,
            duplicates = stats.duplicates_discarded,
            "merged"
        );
        self.store.write(ticker, &merged, fetcher.name())?;
        info!(ticker, rows = merged.len(), added = stats.added, "store updated");

        Ok((
            merged,
            FetchSummary {
                range,
                rows_fetched,
                merge: stats,
            },
        ))
    }

    /// Convert, archive and mirror.
    fn publish(&self, ticker: &str, records: &[TimeSeriesRecord]) -> Result<TickerReport, TickerError> {
        let output = self.converter.convert(ticker, records, self.settings.frequency)?;
        let archive_path = archive(&output.path, ticker)?;
        info!(
            ticker,
            rows = output.bars.len(),
            csv = %output.path.display(),
            zip = %archive_path.display(),
            "output written"
        );

        let sink = match &self.sink {
            None => SinkOutcome::Disabled,
            Some(sink) => match sink.write(ticker, &self.settings.sink_schema, &output.bars) {
                Ok(rows) => {
                    info!(ticker, rows, sink = sink.name(), schema = %self.settings.sink_schema, "sink table replaced");
                    SinkOutcome::Written { rows }
                }
                Err(e) => {
                    warn!(ticker, sink = sink.name(), error = %e, "sink write failed");
                    SinkOutcome::Failed(e)
                }
            },
        };

        Ok(TickerReport {
            ticker: ticker.to_string(),
            coverage: None,
            fetch: None,
            rows: output.bars.len(),
            output: output.path,
            archive: archive_path,
            sink,
        })
    }
}
