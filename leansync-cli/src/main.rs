//! leansync CLI: sync, convert, and status commands.
//!
//! Commands:
//! - `sync`: bring each ticker's canonical store up to the requested range,
//!   then write LEAN output, archive it and optionally mirror it to Postgres
//! - `convert`: regenerate LEAN output from the stores without fetching
//! - `status`: report stored span, row count and size per ticker

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use leansync_core::data::{CanonicalStore, CircuitBreaker, DatabentoProvider};
use leansync_core::domain::{DateStyle, Frequency};
use leansync_core::sink::PostgresSink;
use leansync_runner::config::validate_ticker;
use leansync_runner::{
    api_key, env_lookup, regenerate_batch, run_batch, BatchSummary, LogProgress, Pipeline,
    SyncConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "leansync",
    about = "leansync: incremental Databento sync into LEAN equity data"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch missing history, then write LEAN csv + zip (and the sink copy).
    Sync {
        #[command(flatten)]
        output: OutputArgs,

        /// Start date (YYYY-MM-DD). Overrides the config file.
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD). Overrides the config file; defaults to today.
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Regenerate LEAN output from the canonical stores without fetching.
    Convert {
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Report what the canonical store holds per ticker.
    Status {
        /// Tickers to report. Defaults to every stored ticker.
        tickers: Vec<String>,

        /// Path to a TOML config file. Defaults to ./leansync.toml if present.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct OutputArgs {
    /// Tickers to process (e.g., QQQ AAPL). Overrides the config file.
    tickers: Vec<String>,

    /// Output bucket: daily, hourly or minute.
    #[arg(long)]
    frequency: Option<Frequency>,

    /// Write `yyyyMMdd` dates instead of `yyyyMMdd HH:mm`.
    #[arg(long, default_value_t = false)]
    date_only: bool,

    /// Path to a TOML config file. Defaults to ./leansync.toml if present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mirror output into the relational store.
    #[arg(long, overrides_with = "no_sink")]
    sink: bool,

    /// Skip the relational store even if the config enables it.
    #[arg(long, overrides_with = "sink")]
    no_sink: bool,
}

impl OutputArgs {
    /// Load the config file and apply flag overrides.
    fn resolve(&self) -> Result<SyncConfig> {
        let mut cfg = SyncConfig::load(self.config.as_deref())?;
        if !self.tickers.is_empty() {
            cfg.pipeline.tickers = self.tickers.clone();
        }
        if let Some(frequency) = self.frequency {
            cfg.pipeline.frequency = frequency;
        }
        if self.date_only {
            cfg.pipeline.date_style = DateStyle::DateOnly;
        }
        if self.sink {
            cfg.sink.enabled = true;
        }
        if self.no_sink {
            cfg.sink.enabled = false;
        }
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync { output, start, end } => run_sync(&output, start, end),
        Commands::Convert { output } => run_convert(&output),
        Commands::Status { tickers, config } => run_status(tickers, config.as_deref()),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn run_sync(args: &OutputArgs, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
    let mut cfg = args.resolve()?;
    if start.is_some() {
        cfg.pipeline.start = start;
    }
    if end.is_some() {
        cfg.pipeline.end = end;
    }
    cfg.validate()?;
    let requested = cfg.requested_range(chrono::Local::now().date_naive())?;

    let provider = DatabentoProvider::new(
        api_key(env_lookup)?,
        cfg.databento_settings(),
        Arc::new(CircuitBreaker::default_provider()),
    )?;
    let pipeline = build_pipeline(&cfg)?.with_fetcher(Box::new(provider));

    info!(
        tickers = cfg.pipeline.tickers.len(),
        %requested,
        frequency = %cfg.pipeline.frequency,
        "starting sync"
    );
    let summary = run_batch(&pipeline, &cfg.pipeline.tickers, requested, &LogProgress);
    finish(summary)
}

fn run_convert(args: &OutputArgs) -> Result<()> {
    let mut cfg = args.resolve()?;
    if cfg.pipeline.tickers.is_empty() {
        cfg.pipeline.tickers = CanonicalStore::new(&cfg.paths.store_dir).tickers()?;
    }
    cfg.validate()?;

    let pipeline = build_pipeline(&cfg)?;
    let summary = regenerate_batch(&pipeline, &cfg.pipeline.tickers, &LogProgress);
    finish(summary)
}

/// Pipeline with the sink attached when enabled; no fetcher.
fn build_pipeline(cfg: &SyncConfig) -> Result<Pipeline> {
    let pipeline = Pipeline::new(cfg.pipeline_settings());
    if !cfg.sink.enabled {
        return Ok(pipeline);
    }
    let sink_config = cfg.sink_config(env_lookup)?;
    info!(db = %sink_config.redacted(), schema = %cfg.sink.schema, "relational sink enabled");
    Ok(pipeline.with_sink(Box::new(PostgresSink::new(sink_config)?)))
}

fn finish(summary: BatchSummary) -> Result<()> {
    if summary.sink_failures() > 0 {
        warn!(
            failures = summary.sink_failures(),
            "some relational copies were not updated"
        );
    }
    if !summary.all_succeeded() {
        for (ticker, err) in &summary.errors {
            eprintln!("Error for {ticker}: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_status(tickers: Vec<String>, config: Option<&Path>) -> Result<()> {
    let cfg = SyncConfig::load(config)?;
    let store = CanonicalStore::new(&cfg.paths.store_dir);
    if !store.dir().exists() {
        println!("Store directory does not exist: {}", store.dir().display());
        return Ok(());
    }

    let tickers = status_tickers(&store, tickers)?;
    if tickers.is_empty() {
        println!("Store is empty: {}", store.dir().display());
        return Ok(());
    }

    let mut total_size: u64 = 0;
    println!("Store: {}", store.dir().display());
    println!();
    println!(
        "{:<8} {:<25} {:<12} {:<10} {:>10}",
        "Ticker", "Date Range", "Rows", "Source", "Size"
    );
    println!("{}", "-".repeat(69));
    for ticker in &tickers {
        let size = std::fs::metadata(store.store_path(ticker))
            .map(|m| m.len())
            .unwrap_or(0);
        total_size += size;

        let (range, rows, source) = match store.meta(ticker) {
            Some(meta) => {
                let range = match (meta.first_timestamp, meta.last_timestamp) {
                    (Some(first), Some(last)) => {
                        format!("{} to {}", first.date_naive(), last.date_naive())
                    }
                    _ => "(empty)".to_string(),
                };
                (range, format!("{} rows", meta.record_count), meta.source)
            }
            None if store.exists(ticker) => ("(no meta)".into(), "-".into(), "-".into()),
            None => ("(not stored)".into(), "-".into(), "-".into()),
        };
        println!(
            "{:<8} {:<25} {:<12} {:<10} {:>10}",
            ticker,
            range,
            rows,
            source,
            format_size(size)
        );
    }
    println!();
    println!("Total size: {}", format_size(total_size));

    Ok(())
}

/// Tickers named on the command line, validated, or every stored ticker.
fn status_tickers(store: &CanonicalStore, tickers: Vec<String>) -> Result<Vec<String>> {
    if tickers.is_empty() {
        return Ok(store.tickers()?);
    }
    for ticker in &tickers {
        validate_ticker(ticker)?;
    }
    Ok(tickers)
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
