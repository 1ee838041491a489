use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tradeflow_core::{ConfigLoader, QuoteBook};
use tradeflow_execution::PaperGateway;
use tradeflow_orchestrator::{Pipeline, PipelineActor, TracingSink, TradingContext};

use super::feed::{self, FeedRecord};

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Pipeline.toml")]
    pub config: String,

    /// JSON array of instruments the paper broker lists
    #[arg(long)]
    pub catalog: PathBuf,
}

/// Starts the pipeline actor against a paper broker and feeds it stdin
/// until EOF or Ctrl-C, then shuts down and prints the final status.
///
/// # Errors
/// Returns an error if startup fails or the actor exits abnormally.
pub async fn run_pipeline(args: RunArgs) -> Result<()> {
    let config = ConfigLoader::from_file(&args.config)?;
    let catalog = feed::load_catalog(&args.catalog)?;

    let quotes = Arc::new(QuoteBook::new());
    let paper = Arc::new(PaperGateway::new(Arc::clone(&quotes)).with_catalog(catalog));
    let ctx = TradingContext::with_quotes(config, paper.clone(), Arc::new(TracingSink), quotes)?;
    ctx.resolver
        .refresh(paper.as_ref())
        .await
        .context("Instrument catalog refresh failed")?;

    let pipeline = Arc::new(Pipeline::new(Arc::new(ctx)));
    let (handle, actor) = PipelineActor::spawn(Arc::clone(&pipeline));
    info!("Pipeline running, reading signals and ticks from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("Input closed");
                    break;
                };
                match feed::parse_line(&line) {
                    Ok(Some(FeedRecord::Signal(raw))) => handle.submit_raw(raw).await?,
                    Ok(Some(FeedRecord::Tick(tick))) => handle.tick(tick).await?,
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Skipping input line"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let status = handle.get_status().await?;
    handle.shutdown().await?;
    actor.await.context("Pipeline actor panicked")??;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
