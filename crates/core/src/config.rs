//! Pipeline configuration.
//!
//! Every section has defaults matching an NSE/NFO retail setup so a partial
//! TOML file (or none at all) still yields a usable configuration.

use std::collections::BTreeMap;

use anyhow::{ensure, Result};
use chrono::{FixedOffset, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub session: SessionConfig,
    pub risk: RiskConfig,
    pub capital: CapitalConfig,
    pub limits: HardLimitsConfig,
    pub instruments: InstrumentConfig,
    pub rate_limits: RateLimitConfig,
    pub execution: ExecutionConfig,
    pub positions: PositionConfig,
    pub breaker: BreakerConfig,
}

impl PipelineConfig {
    /// Checks cross-field constraints that serde cannot express.
    ///
    /// # Errors
    /// Returns an error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let total_pct: Decimal = self.capital.allocations.values().copied().sum();
        ensure!(
            total_pct <= Decimal::ONE_HUNDRED,
            "strategy allocations sum to {total_pct}%, must not exceed 100%"
        );
        ensure!(
            self.capital.allocations.values().all(|p| *p >= Decimal::ZERO),
            "strategy allocations must be non-negative"
        );
        ensure!(
            self.capital.total_capital >= Decimal::ZERO,
            "total capital must be non-negative"
        );

        let s = &self.session;
        ensure!(
            s.market_open < s.no_new_signals_after
                && s.no_new_signals_after <= s.warning_time
                && s.warning_time <= s.mandatory_close
                && s.mandatory_close <= s.market_close,
            "session times must satisfy open < no-new-signals <= warning <= mandatory-close <= close"
        );
        ensure!(
            s.utc_offset().is_some(),
            "utc_offset_minutes {} is out of range",
            s.utc_offset_minutes
        );

        ensure!(
            (0.0..=100.0).contains(&self.risk.score_threshold),
            "risk.score_threshold must be within [0, 100]"
        );
        ensure!(
            self.rate_limits.safety_margin_pct < Decimal::ONE_HUNDRED
                && self.rate_limits.safety_margin_pct >= Decimal::ZERO,
            "rate_limits.safety_margin_pct must be within [0, 100)"
        );
        ensure!(
            self.rate_limits.queue_capacity > 0,
            "rate_limits.queue_capacity must be positive"
        );
        ensure!(
            !self.instruments.exchanges.is_empty(),
            "instruments.exchanges must name at least one exchange"
        );
        ensure!(
            self.instruments.strike_tolerance_pct >= Decimal::ZERO,
            "instruments.strike_tolerance_pct must be non-negative"
        );
        Ok(())
    }
}

/// Exchange trading session windows, expressed in exchange-local time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Offset of exchange-local time from UTC (IST = 330).
    pub utc_offset_minutes: i32,
    pub market_open: NaiveTime,
    pub market_close: NaiveTime,
    /// No new positions after this time.
    pub no_new_signals_after: NaiveTime,
    /// Warning window: still only management actions.
    pub warning_time: NaiveTime,
    /// Positions must be flattened from this time.
    pub mandatory_close: NaiveTime,
}

impl SessionConfig {
    #[must_use]
    pub fn utc_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("static session time is valid")
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 330,
            market_open: hm(9, 15),
            market_close: hm(15, 30),
            no_new_signals_after: hm(15, 0),
            warning_time: hm(15, 15),
            mandatory_close: hm(15, 20),
        }
    }
}

/// Weights of the four risk score components. Normalized at use, so they
/// need not sum to one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub size: f64,
    pub greeks: f64,
    pub loss: f64,
    pub edge: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            size: 0.35,
            greeks: 0.25,
            loss: 0.25,
            edge: 0.15,
        }
    }
}

/// Absolute limits on aggregate portfolio Greeks. A zero limit means the
/// Greek is not limited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GreeksLimits {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

impl Default for GreeksLimits {
    fn default() -> Self {
        Self {
            delta: 500.0,
            gamma: 50.0,
            theta: 5_000.0,
            vega: 2_000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Signals scoring at or above this are rejected.
    pub score_threshold: f64,
    /// Percentage of the daily loss limit at which new entries stop.
    pub daily_loss_near_pct: f64,
    pub weights: RiskWeights,
    pub greeks_limits: GreeksLimits,
    /// Closed trades required before the strategy edge is trusted.
    pub min_trades_for_edge: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            score_threshold: 70.0,
            daily_loss_near_pct: 80.0,
            weights: RiskWeights::default(),
            greeks_limits: GreeksLimits::default(),
            min_trades_for_edge: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapitalConfig {
    pub total_capital: Decimal,
    /// Strategy name to percentage of total capital.
    pub allocations: BTreeMap<String, Decimal>,
    /// Largest single position as a percentage of total capital.
    pub max_single_position_pct: Decimal,
    /// Absolute daily loss limit.
    pub daily_loss_limit: Decimal,
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            total_capital: Decimal::from(1_000_000),
            allocations: BTreeMap::new(),
            max_single_position_pct: Decimal::from(20),
            daily_loss_limit: Decimal::from(20_000),
        }
    }
}

/// Per-order ceilings checked before an order is admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardLimitsConfig {
    pub max_order_quantity: u32,
    pub max_order_notional: Decimal,
}

impl Default for HardLimitsConfig {
    fn default() -> Self {
        Self {
            max_order_quantity: 10_000,
            max_order_notional: Decimal::from(500_000),
        }
    }
}

/// Strike spacing for equity options priced up to `up_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeBand {
    pub up_to: Decimal,
    pub interval: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Exchange segments whose catalogs are cached (cash and derivatives).
    pub exchanges: Vec<String>,
    pub refresh_interval_secs: u64,
    /// A snapshot older than this is served with the stale flag set.
    pub ttl_secs: u64,
    /// Maximum distance between target and chosen strike, percent of target.
    pub strike_tolerance_pct: Decimal,
    pub index_strike_intervals: BTreeMap<String, Decimal>,
    pub equity_strike_bands: Vec<StrikeBand>,
    pub equity_default_interval: Decimal,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        let index_strike_intervals = [
            ("NIFTY", 50),
            ("BANKNIFTY", 100),
            ("FINNIFTY", 50),
            ("MIDCPNIFTY", 25),
            ("SENSEX", 100),
        ]
        .into_iter()
        .map(|(name, step)| (name.to_string(), Decimal::from(step)))
        .collect();

        let equity_strike_bands = [(250, 5), (500, 10), (1_000, 20), (2_500, 50), (5_000, 100)]
            .into_iter()
            .map(|(up_to, interval)| StrikeBand {
                up_to: Decimal::from(up_to),
                interval: Decimal::from(interval),
            })
            .collect();

        Self {
            exchanges: vec!["NSE".to_string(), "NFO".to_string()],
            refresh_interval_secs: 600,
            ttl_secs: 600,
            strike_tolerance_pct: Decimal::from(5),
            index_strike_intervals,
            equity_strike_bands,
            equity_default_interval: Decimal::from(250),
        }
    }
}

/// Broker ceilings and the margin kept below them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub broker_per_second: u32,
    pub broker_per_minute: u32,
    pub broker_per_day: u32,
    /// Percentage kept in reserve below every broker ceiling.
    pub safety_margin_pct: Decimal,
    /// Orders that may wait for tokens before admission fails fast.
    pub queue_capacity: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            broker_per_second: 10,
            broker_per_minute: 200,
            broker_per_day: 3_000,
            safety_margin_pct: Decimal::from(30),
            queue_capacity: 32,
        }
    }
}

impl RateLimitConfig {
    /// Applies the safety margin to a broker ceiling. The result is always
    /// at least one and strictly below a ceiling greater than one.
    #[must_use]
    pub fn effective(&self, ceiling: u32) -> u32 {
        let keep = (Decimal::ONE_HUNDRED - self.safety_margin_pct) / Decimal::ONE_HUNDRED;
        let scaled = (Decimal::from(ceiling) * keep).floor();
        let scaled = scaled.to_u32().unwrap_or(ceiling);
        let strictly_below = if ceiling > 1 { scaled.min(ceiling - 1) } else { scaled };
        strictly_below.max(1)
    }

    #[must_use]
    pub fn per_second(&self) -> u32 {
        self.effective(self.broker_per_second)
    }

    #[must_use]
    pub fn per_minute(&self) -> u32 {
        self.effective(self.broker_per_minute)
    }

    #[must_use]
    pub fn per_day(&self) -> u32 {
        self.effective(self.broker_per_day)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub submit_timeout_ms: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Status polls after placement before the order is left to reconciliation.
    pub fill_poll_attempts: u32,
    pub fill_poll_interval_ms: u64,
    /// Record simulated fills when the broker stays unreachable.
    pub degraded_mode: bool,
    /// Period of the sweep that polls orders left working or in RECONCILE.
    pub reconcile_interval_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            submit_timeout_ms: 5_000,
            max_retries: 3,
            base_backoff_ms: 250,
            max_backoff_ms: 4_000,
            fill_poll_attempts: 5,
            fill_poll_interval_ms: 200,
            degraded_mode: false,
            reconcile_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// Profit (percent of entry) after which the trailing stop engages.
    pub trail_activation_pct: Decimal,
    /// Distance of the trailing stop from price, percent.
    pub trail_pct: Decimal,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            trail_activation_pct: Decimal::ONE,
            trail_pct: Decimal::ONE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub max_consecutive_failures: u32,
    pub pause_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            pause_secs: 300,
        }
    }
}
