//! Trailing stop rules.

use rust_decimal::Decimal;
use tradeflow_core::{Position, PositionConfig, PositionSide};

/// Returns the trailing stop `pos` should move to, if any.
///
/// The trail engages once profit reaches `trail_activation_pct` and then
/// follows the most favourable price seen at `trail_pct`. A candidate is
/// only returned when it tightens the current stop.
pub fn trailing_stop(pos: &Position, config: &PositionConfig) -> Option<Decimal> {
    if config.trail_pct <= Decimal::ZERO || config.trail_pct >= Decimal::ONE_HUNDRED {
        return None;
    }
    if pos.extreme_price <= Decimal::ZERO {
        return None;
    }
    if !pos.trailing_active && pos.profit_pct() < config.trail_activation_pct {
        return None;
    }

    let offset = config.trail_pct / Decimal::ONE_HUNDRED;
    let candidate = match pos.side {
        PositionSide::Long => pos
            .instrument
            .round_to_tick(pos.extreme_price * (Decimal::ONE - offset)),
        PositionSide::Short => ceil_to_tick(
            pos.extreme_price * (Decimal::ONE + offset),
            pos.instrument.tick_size,
        ),
    };

    if candidate <= Decimal::ZERO || !tightens(pos.side, pos.stop_loss, candidate) {
        return None;
    }

    tracing::debug!(
        symbol = pos.symbol(),
        price = %pos.current_price,
        extreme = %pos.extreme_price,
        old_stop = ?pos.stop_loss,
        new_stop = %candidate,
        "Trailing stop tightened"
    );
    Some(candidate)
}

/// True if `candidate` is strictly tighter than `current` for `side`.
#[must_use]
pub fn tightens(side: PositionSide, current: Option<Decimal>, candidate: Decimal) -> bool {
    match (side, current) {
        (_, None) => true,
        (PositionSide::Long, Some(stop)) => candidate > stop,
        (PositionSide::Short, Some(stop)) => candidate < stop,
    }
}

fn ceil_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    (price / tick).ceil() * tick
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tradeflow_core::{Greeks, Instrument};
    use uuid::Uuid;

    fn position(side: PositionSide, stop: Option<Decimal>) -> Position {
        Position {
            id: Uuid::new_v4(),
            instrument: Instrument::equity("INFY", "NSE"),
            signal_symbol: "INFY".into(),
            strategy_name: "trend".into(),
            side,
            quantity: 10,
            entry_price: dec!(100),
            current_price: dec!(100),
            stop_loss: stop,
            target: None,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            extreme_price: dec!(100),
            trailing_active: false,
            reserved_capital: dec!(1000),
            unit_greeks: Greeks::default(),
            simulated: false,
            opened_at: Utc::now(),
        }
    }

    /// Feeds a price path and returns the stop after each tick.
    fn run_path(mut pos: Position, prices: &[Decimal]) -> Vec<Option<Decimal>> {
        let config = PositionConfig::default();
        prices
            .iter()
            .map(|price| {
                pos.mark(*price);
                if let Some(stop) = trailing_stop(&pos, &config) {
                    pos.stop_loss = Some(stop);
                    pos.trailing_active = true;
                }
                pos.stop_loss
            })
            .collect()
    }

    #[test]
    fn inactive_below_activation_threshold() {
        let mut pos = position(PositionSide::Long, Some(dec!(95)));
        pos.mark(dec!(100.5));
        assert_eq!(trailing_stop(&pos, &PositionConfig::default()), None);
    }

    #[test]
    fn long_trail_engages_and_follows() {
        let mut pos = position(PositionSide::Long, Some(dec!(95)));
        pos.mark(dec!(102));
        assert_eq!(trailing_stop(&pos, &PositionConfig::default()), Some(dec!(100.95)));
    }

    #[test]
    fn long_stop_never_decreases() {
        let path = [
            dec!(101), dec!(103), dec!(102), dec!(106), dec!(99), dec!(107.3), dec!(104),
            dec!(110), dec!(90),
        ];
        let stops: Vec<Decimal> = run_path(position(PositionSide::Long, Some(dec!(95))), &path)
            .into_iter()
            .flatten()
            .collect();
        assert!(stops.windows(2).all(|w| w[1] >= w[0]), "{stops:?}");
        assert_eq!(stops.last(), Some(&dec!(108.90)));
    }

    #[test]
    fn short_stop_never_increases() {
        let path = [
            dec!(99), dec!(97), dec!(98), dec!(94), dec!(101), dec!(92.7), dec!(96), dec!(90),
            dec!(110),
        ];
        let stops: Vec<Decimal> = run_path(position(PositionSide::Short, None), &path)
            .into_iter()
            .flatten()
            .collect();
        assert!(!stops.is_empty());
        assert!(stops.windows(2).all(|w| w[1] <= w[0]), "{stops:?}");
        assert_eq!(stops.last(), Some(&dec!(90.90)));
    }

    #[test]
    fn trail_is_measured_from_the_best_price_not_the_last() {
        let mut pos = position(PositionSide::Long, Some(dec!(95)));
        pos.trailing_active = true;
        pos.mark(dec!(110));
        pos.mark(dec!(104));
        assert_eq!(pos.extreme_price, dec!(110));
        assert_eq!(trailing_stop(&pos, &PositionConfig::default()), Some(dec!(108.90)));
    }

    #[test]
    fn degenerate_trail_pct_is_ignored() {
        let mut pos = position(PositionSide::Long, None);
        pos.mark(dec!(120));
        let config = PositionConfig {
            trail_activation_pct: Decimal::ONE,
            trail_pct: Decimal::ZERO,
        };
        assert_eq!(trailing_stop(&pos, &config), None);
    }
}
