use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::greeks::Greeks;
use crate::instrument::Instrument;
use crate::order::{OrderKey, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    #[must_use]
    pub const fn from_entry(side: Side) -> Self {
        match side {
            Side::Buy => Self::Long,
            Side::Sell => Self::Short,
        }
    }

    /// Order side that reduces this position.
    #[must_use]
    pub const fn exit_side(self) -> Side {
        match self {
            Self::Long => Side::Sell,
            Self::Short => Side::Buy,
        }
    }

    fn sign(self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

/// An open position in one instrument for one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub instrument: Instrument,
    /// Symbol of the signal that opened it; management signals reuse it so
    /// they share the entry's dedup key.
    pub signal_symbol: String,
    pub strategy_name: String,
    pub side: PositionSide,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub target: Option<Decimal>,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    /// Highest (long) or lowest (short) price seen since entry.
    pub extreme_price: Decimal,
    pub trailing_active: bool,
    /// Capital reserved against the strategy slice for this position.
    pub reserved_capital: Decimal,
    /// Per-unit Greeks at entry.
    pub unit_greeks: Greeks,
    pub simulated: bool,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    #[must_use]
    pub fn key(&self) -> OrderKey {
        OrderKey::new(&self.signal_symbol, &self.strategy_name)
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.instrument.symbol
    }

    /// Recomputes unrealized P&L and the favourable extreme at `price`.
    pub fn mark(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl =
            (price - self.entry_price) * Decimal::from(self.quantity) * self.side.sign();
        let better = match self.side {
            PositionSide::Long => price > self.extreme_price,
            PositionSide::Short => price < self.extreme_price,
        };
        if better {
            self.extreme_price = price;
        }
    }

    /// Profit as a percentage of entry price; zero for a zero entry.
    #[must_use]
    pub fn profit_pct(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (self.current_price - self.entry_price) / self.entry_price
            * Decimal::ONE_HUNDRED
            * self.side.sign()
    }

    /// Books an exit of `quantity` units at `price` and returns the realized
    /// P&L of that exit.
    pub fn reduce(&mut self, quantity: u32, price: Decimal) -> Decimal {
        let closed = quantity.min(self.quantity);
        let pnl = (price - self.entry_price) * Decimal::from(closed) * self.side.sign();
        self.quantity -= closed;
        self.realized_pnl += pnl;
        self.mark(price);
        pnl
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.quantity == 0
    }

    /// Greeks exposure of the remaining quantity.
    #[must_use]
    pub fn greeks(&self) -> Greeks {
        let signed = match self.side {
            PositionSide::Long => f64::from(self.quantity),
            PositionSide::Short => -f64::from(self.quantity),
        };
        self.unit_greeks * signed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(side: PositionSide) -> Position {
        Position {
            id: Uuid::new_v4(),
            instrument: Instrument::equity("TCS", "NSE"),
            signal_symbol: "TCS".into(),
            strategy_name: "breakout".into(),
            side,
            quantity: 10,
            entry_price: dec!(100),
            current_price: dec!(100),
            stop_loss: None,
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

    #[test]
    fn long_mark_and_reduce() {
        let mut p = position(PositionSide::Long);
        p.mark(dec!(103));
        assert_eq!(p.unrealized_pnl, dec!(30));
        assert_eq!(p.profit_pct(), dec!(3));
        assert_eq!(p.reduce(4, dec!(105)), dec!(20));
        assert_eq!(p.quantity, 6);
        assert_eq!(p.extreme_price, dec!(105));
    }

    #[test]
    fn short_profit_is_positive_when_price_falls() {
        let mut p = position(PositionSide::Short);
        p.mark(dec!(95));
        assert_eq!(p.unrealized_pnl, dec!(50));
        assert_eq!(p.extreme_price, dec!(95));
        p.mark(dec!(97));
        assert_eq!(p.extreme_price, dec!(95));
        assert_eq!(p.reduce(10, dec!(97)), dec!(30));
        assert!(p.is_closed());
    }
}
