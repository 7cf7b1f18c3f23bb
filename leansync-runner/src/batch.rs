//! Batch orchestrator: runs tickers one at a time with progress reporting.
//!
//! A failed ticker is recorded and the batch moves on; nothing one ticker
//! does can undo another's files.

use crate::pipeline::{Pipeline, SinkOutcome, TickerError, TickerReport};
use leansync_core::domain::DateRange;
use tracing::{error, info, warn};

/// Progress callbacks for a batch.
pub trait SyncProgress {
    /// Called before a ticker starts.
    fn on_start(&self, ticker: &str, index: usize, total: usize);

    /// Called when a ticker finishes or aborts.
    fn on_complete(
        &self,
        ticker: &str,
        index: usize,
        total: usize,
        result: &Result<TickerReport, TickerError>,
    );

    /// Called when the entire batch is done.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Reports progress through `tracing`.
pub struct LogProgress;

impl SyncProgress for LogProgress {
    fn on_start(&self, ticker: &str, index: usize, total: usize) {
        info!(ticker, "[{}/{}] processing", index + 1, total);
    }

    fn on_complete(
        &self,
        ticker: &str,
        _index: usize,
        _total: usize,
        result: &Result<TickerReport, TickerError>,
    ) {
        match result {
            Ok(report) => {
                let fetched = report.fetch.as_ref().map_or(0, |f| f.rows_fetched);
                info!(ticker, rows = report.rows, fetched, "done");
                if let SinkOutcome::Failed(e) = &report.sink {
                    warn!(ticker, error = %e, "done, but relational copy is stale");
                }
            }
            Err(e) => error!(ticker, error = %e, "aborted"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        info!(succeeded, failed, total, "batch complete");
    }
}

/// Outcome of a batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub reports: Vec<TickerReport>,
    pub errors: Vec<(String, TickerError)>,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Completed tickers whose sink write failed.
    pub fn sink_failures(&self) -> usize {
        self.reports.iter().filter(|r| r.sink.is_failed()).count()
    }

    fn record(&mut self, ticker: &str, result: Result<TickerReport, TickerError>) {
        match result {
            Ok(report) => {
                self.succeeded += 1;
                self.reports.push(report);
            }
            Err(e) => {
                self.failed += 1;
                self.errors.push((ticker.to_string(), e));
            }
        }
    }
}

/// Sync every ticker against the same requested range.
pub fn run_batch(
    pipeline: &Pipeline,
    tickers: &[String],
    requested: DateRange,
    progress: &dyn SyncProgress,
) -> BatchSummary {
    run_each(tickers, progress, |ticker| pipeline.sync_ticker(ticker, requested))
}

/// Regenerate output for every ticker from its store, without fetching.
pub fn regenerate_batch(pipeline: &Pipeline, tickers: &[String], progress: &dyn SyncProgress) -> BatchSummary {
    run_each(tickers, progress, |ticker| pipeline.regenerate(ticker))
}

fn run_each<F>(tickers: &[String], progress: &dyn SyncProgress, mut step: F) -> BatchSummary
where
    F: FnMut(&str) -> Result<TickerReport, TickerError>,
{
    let total = tickers.len();
    let mut summary = BatchSummary {
        total,
        ..BatchSummary::default()
    };

    for (i, ticker) in tickers.iter().enumerate() {
        progress.on_start(ticker, i, total);
        let result = step(ticker);
        progress.on_complete(ticker, i, total, &result);
        summary.record(ticker, result);
    }

    progress.on_batch_complete(summary.succeeded, summary.failed, total);
    summary
}
