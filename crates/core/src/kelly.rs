//! Strategy edge estimation from closed-trade outcomes.
//!
//! The edge of a strategy is the expected P&L per trade:
//! ```text
//! edge = win_rate * avg_win - loss_rate * avg_loss
//! ```
//! Every ratio falls back to a neutral value when its denominator is zero
//! or the sample is empty, so callers never see a division error.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Running win/loss statistics for one strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeStats {
    pub wins: u32,
    pub losses: u32,
    /// Sum of winning P&L (positive).
    pub gross_win: Decimal,
    /// Sum of losing P&L magnitudes (positive).
    pub gross_loss: Decimal,
}

impl TradeStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one closed trade. Break-even trades count as neither.
    pub fn record(&mut self, pnl: Decimal) {
        if pnl > Decimal::ZERO {
            self.wins += 1;
            self.gross_win += pnl;
        } else if pnl < Decimal::ZERO {
            self.losses += 1;
            self.gross_loss += -pnl;
        }
    }

    #[must_use]
    pub fn trades(&self) -> u32 {
        self.wins + self.losses
    }

    /// Fraction of trades won; zero for an empty sample.
    #[must_use]
    pub fn win_rate(&self) -> Decimal {
        ratio(Decimal::from(self.wins), Decimal::from(self.trades()), Decimal::ZERO)
    }

    #[must_use]
    pub fn loss_rate(&self) -> Decimal {
        ratio(Decimal::from(self.losses), Decimal::from(self.trades()), Decimal::ZERO)
    }

    #[must_use]
    pub fn avg_win(&self) -> Decimal {
        ratio(self.gross_win, Decimal::from(self.wins), Decimal::ZERO)
    }

    #[must_use]
    pub fn avg_loss(&self) -> Decimal {
        ratio(self.gross_loss, Decimal::from(self.losses), Decimal::ZERO)
    }

    /// Expected P&L per trade.
    #[must_use]
    pub fn edge(&self) -> Decimal {
        self.win_rate() * self.avg_win() - self.loss_rate() * self.avg_loss()
    }

    /// Edge per unit of average loss. Neutral (zero) without losses or
    /// trades, so a lucky streak is not read as infinite edge.
    #[must_use]
    pub fn edge_ratio(&self) -> Decimal {
        ratio(self.edge(), self.avg_loss(), Decimal::ZERO)
    }
}

/// `num / den`, or `neutral` when `den` is zero.
#[must_use]
pub fn ratio(num: Decimal, den: Decimal, neutral: Decimal) -> Decimal {
    if den.is_zero() {
        neutral
    } else {
        num.checked_div(den).unwrap_or(neutral)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn stats(outcomes: &[Decimal]) -> TradeStats {
        let mut s = TradeStats::new();
        for pnl in outcomes {
            s.record(*pnl);
        }
        s
    }

    #[test]
    fn empty_sample_is_neutral() {
        let s = TradeStats::new();
        assert_eq!(s.win_rate(), Decimal::ZERO);
        assert_eq!(s.edge(), Decimal::ZERO);
        assert_eq!(s.edge_ratio(), Decimal::ZERO);
    }

    #[test]
    fn only_wins_does_not_divide_by_zero() {
        let s = stats(&[dec!(100), dec!(50)]);
        assert_eq!(s.win_rate(), dec!(1));
        assert_eq!(s.avg_loss(), Decimal::ZERO);
        assert_eq!(s.edge(), dec!(75));
        assert_eq!(s.edge_ratio(), Decimal::ZERO);
    }

    #[test]
    fn mixed_sample_edge() {
        // 3 wins of 200, 2 losses of 100
        let s = stats(&[dec!(200), dec!(-100), dec!(200), dec!(-100), dec!(200)]);
        assert_eq!(s.win_rate(), dec!(0.6));
        assert_eq!(s.edge(), dec!(80));
        assert_eq!(s.edge_ratio(), dec!(0.8));
    }

    #[test]
    fn losing_strategy_has_negative_edge() {
        let s = stats(&[dec!(-100), dec!(-100), dec!(50)]);
        assert!(s.edge() < Decimal::ZERO);
        assert!(s.edge_ratio() < Decimal::ZERO);
    }

    #[test]
    fn break_even_trades_are_ignored() {
        let s = stats(&[Decimal::ZERO, dec!(10)]);
        assert_eq!(s.trades(), 1);
    }
}
