use crate::config::PipelineConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

/// Environment variables prefixed with this override file values,
/// `__` separating sections (e.g. `TRADEFLOW_RISK__SCORE_THRESHOLD=65`).
pub const ENV_PREFIX: &str = "TRADEFLOW_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the pipeline configuration from `config/Pipeline.toml` merged with
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result is invalid.
    pub fn load() -> Result<PipelineConfig> {
        Self::from_file("config/Pipeline.toml")
    }

    /// Loads configuration with a profile file layered on top of the base file.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or the result is invalid.
    pub fn load_with_profile(profile: &str) -> Result<PipelineConfig> {
        let figment = Self::base()
            .merge(Toml::file("config/Pipeline.toml"))
            .merge(Toml::file(format!("config/Pipeline.{profile}.toml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(&figment)
    }

    /// Loads configuration from an explicit TOML path. A missing file falls
    /// back to defaults plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<PipelineConfig> {
        let figment = Self::base()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(&figment)
    }

    fn base() -> Figment {
        Figment::from(Serialized::defaults(PipelineConfig::default()))
    }

    fn extract(figment: &Figment) -> Result<PipelineConfig> {
        let config: PipelineConfig = figment
            .extract()
            .context("Failed to parse pipeline configuration")?;
        config.validate().context("Invalid pipeline configuration")?;
        tracing::debug!(
            strategies = config.capital.allocations.len(),
            exchanges = ?config.instruments.exchanges,
            "Pipeline configuration loaded"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rust_decimal_macros::dec;

    #[test]
    fn file_values_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "pipeline.toml",
                r#"
                [capital]
                total_capital = 500000
                daily_loss_limit = 10000

                [capital.allocations]
                momentum = 40
                mean_reversion = 25

                [risk]
                score_threshold = 65.0
                "#,
            )?;
            let cfg = ConfigLoader::from_file("pipeline.toml").map_err(|e| e.to_string())?;
            assert_eq!(cfg.capital.total_capital, dec!(500000));
            assert_eq!(cfg.capital.allocations["momentum"], dec!(40));
            assert!((cfg.risk.score_threshold - 65.0).abs() < f64::EPSILON);
            // Untouched sections keep their defaults
            assert_eq!(cfg.rate_limits.per_second(), 7);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("pipeline.toml", "[execution]\nmax_retries = 2\n")?;
            jail.set_env("TRADEFLOW_EXECUTION__MAX_RETRIES", "5");
            let cfg = ConfigLoader::from_file("pipeline.toml").map_err(|e| e.to_string())?;
            assert_eq!(cfg.execution.max_retries, 5);
            Ok(())
        });
    }

    #[test]
    fn invalid_allocation_fails_validation() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "pipeline.toml",
                "[capital.allocations]\na = 70\nb = 40\n",
            )?;
            assert!(ConfigLoader::from_file("pipeline.toml").is_err());
            Ok(())
        });
    }
}
