use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::watch;
use tracing::{info, warn};
use tradeflow_core::{ConfigLoader, QuoteBook};
use tradeflow_execution::PaperGateway;
use tradeflow_orchestrator::{Pipeline, SignalOutcome, TracingSink, TradingContext};

use super::feed::{self, FeedRecord};

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Pipeline.toml")]
    pub config: String,

    /// JSON-lines file of signals and ticks, in time order
    #[arg(short, long)]
    pub feed: PathBuf,

    /// JSON array of instruments; defaults to NSE equities for every feed symbol
    #[arg(long)]
    pub catalog: Option<PathBuf>,
}

/// Runs a feed through the pipeline in order and prints the final status.
///
/// # Errors
/// Returns an error if the configuration, feed or catalog cannot be loaded.
pub async fn run_replay(args: ReplayArgs) -> Result<()> {
    let config = ConfigLoader::from_file(&args.config)?;
    let content = std::fs::read_to_string(&args.feed)
        .with_context(|| format!("Failed to read feed {}", args.feed.display()))?;

    let mut records = Vec::new();
    for (number, line) in content.lines().enumerate() {
        match feed::parse_line(line) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e) => warn!(line = number + 1, error = %e, "Skipping feed line"),
        }
    }

    let catalog = match &args.catalog {
        Some(path) => feed::load_catalog(path)?,
        None => feed::equity_catalog(&records, "NSE"),
    };

    let quotes = Arc::new(QuoteBook::new());
    let paper = Arc::new(PaperGateway::new(Arc::clone(&quotes)).with_catalog(catalog));
    let ctx = TradingContext::with_quotes(config, paper.clone(), Arc::new(TracingSink), quotes)?;
    let listed = ctx
        .resolver
        .refresh(paper.as_ref())
        .await
        .context("Instrument catalog refresh failed")?;
    info!(records = records.len(), listed, "Replaying feed");

    let pipeline = Arc::new(Pipeline::new(Arc::new(ctx)));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = Arc::clone(&pipeline).spawn_queue_worker(shutdown_rx);

    let mut outcomes = Vec::new();
    for record in records {
        match record {
            FeedRecord::Signal(raw) => outcomes.push(pipeline.process_raw(&raw).await),
            FeedRecord::Tick(tick) => outcomes.extend(pipeline.on_tick(tick).await),
        }
    }

    pipeline.reconcile_pending().await;
    let report = pipeline.stop().await;
    let _ = shutdown_tx.send(true);
    worker.await.context("Order queue worker panicked")?;

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, SignalOutcome::Completed(_)))
        .count();
    info!(
        outcomes = outcomes.len(),
        completed,
        cancelled = report.cancelled_queued + report.cancelled_live,
        "Replay finished"
    );
    println!("{}", serde_json::to_string_pretty(&pipeline.status())?);
    Ok(())
}
