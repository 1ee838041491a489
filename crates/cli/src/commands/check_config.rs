use anyhow::Result;
use clap::Args;
use tradeflow_core::ConfigLoader;

#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Pipeline.toml")]
    pub config: String,

    /// Profile layered over config/Pipeline.toml (config/Pipeline.<profile>.toml)
    #[arg(long, conflicts_with = "config")]
    pub profile: Option<String>,
}

/// Prints the configuration the pipeline would start with.
///
/// # Errors
/// Returns an error if the configuration cannot be parsed or is invalid.
pub fn run_check_config(args: &CheckConfigArgs) -> Result<()> {
    let config = match &args.profile {
        Some(profile) => ConfigLoader::load_with_profile(profile)?,
        None => ConfigLoader::from_file(&args.config)?,
    };
    tracing::info!(
        strategies = config.capital.allocations.len(),
        total_capital = %config.capital.total_capital,
        "Configuration is valid"
    );
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
