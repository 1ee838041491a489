//! Strike interval lookup and strike selection.
//!
//! Index and equity options use different ladders. Both come from
//! configuration; nothing else in the workspace knows a strike interval.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};
use tradeflow_core::{InstrumentConfig, StrikeBand};

#[derive(Debug, Clone)]
pub struct StrikeIntervals {
    index: BTreeMap<String, Decimal>,
    /// Sorted by `up_to`.
    equity_bands: Vec<StrikeBand>,
    equity_default: Decimal,
}

impl StrikeIntervals {
    #[must_use]
    pub fn from_config(config: &InstrumentConfig) -> Self {
        let mut equity_bands = config.equity_strike_bands.clone();
        equity_bands.sort_by(|a, b| a.up_to.cmp(&b.up_to));
        Self {
            index: config
                .index_strike_intervals
                .iter()
                .map(|(name, step)| (name.to_ascii_uppercase(), *step))
                .collect(),
            equity_bands,
            equity_default: config.equity_default_interval,
        }
    }

    #[must_use]
    pub fn is_index(&self, underlying: &str) -> bool {
        self.index.contains_key(&underlying.to_ascii_uppercase())
    }

    /// Strike spacing for `underlying` trading at `price`.
    #[must_use]
    pub fn interval(&self, underlying: &str, price: Decimal) -> Decimal {
        if let Some(step) = self.index.get(&underlying.to_ascii_uppercase()) {
            return *step;
        }
        self.equity_bands
            .iter()
            .find(|band| price <= band.up_to)
            .map_or(self.equity_default, |band| band.interval)
    }
}

/// Rounds `price` to the nearest multiple of `interval` (half away from zero).
#[must_use]
pub fn atm_strike(price: Decimal, interval: Decimal) -> Decimal {
    if interval <= Decimal::ZERO {
        return price;
    }
    (price / interval).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero) * interval
}

/// Picks the listed strike closest to `target`, provided it lies within
/// `tolerance_pct` percent of the target. Ties go to the lower strike.
#[must_use]
pub fn nearest_strike<'a, I>(ladder: I, target: Decimal, tolerance_pct: Decimal) -> Option<Decimal>
where
    I: IntoIterator<Item = &'a Decimal>,
{
    let max_distance = (target * tolerance_pct / Decimal::ONE_HUNDRED).abs();
    ladder
        .into_iter()
        .copied()
        .map(|strike| ((strike - target).abs(), strike))
        .filter(|(distance, _)| *distance <= max_distance)
        .min()
        .map(|(_, strike)| strike)
}
