use clap::{Parser, Subcommand};

mod commands;

use commands::{CheckConfigArgs, ReplayArgs, RunArgs};

#[derive(Parser)]
#[command(name = "tradeflow")]
#[command(about = "Signal-to-order pipeline for NSE/NFO strategies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline actor over JSON lines read from stdin
    Run(RunArgs),
    /// Replay a JSON-lines feed of signals and ticks against a paper broker
    Replay(ReplayArgs),
    /// Load, validate and print the merged configuration
    CheckConfig(CheckConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run_pipeline(args).await?,
        Commands::Replay(args) => commands::run_replay(args).await?,
        Commands::CheckConfig(args) => commands::run_check_config(&args)?,
    }

    Ok(())
}
