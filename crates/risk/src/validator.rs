//! Go/no-go gating of signals.
//!
//! Hard checks run first (session window, strategy known, daily loss
//! proximity, Greeks limits). Surviving entry signals get a blended risk
//! score from four components, each in `[0, 1]`:
//!
//! | component | meaning                                                  |
//! |-----------|----------------------------------------------------------|
//! | size      | requested notional over remaining strategy slice         |
//! | greeks    | worst post-trade Greek utilisation                       |
//! | loss      | the larger of today's loss over the daily limit and the  |
//! |           | VaR impact (risk to stop over remaining loss budget)     |
//! | edge      | inverse of the strategy's historical edge ratio          |
//!
//! The signal is approved while `100 * weighted mean < score_threshold`.
//!
//! Management and closing signals reduce exposure. They are scored for the
//! audit trail and approved on the session gate alone, once the strategy is
//! known and the account can fund a buy-to-close.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info};
use tradeflow_core::{
    RejectReason, RiskConfig, RiskDecision, SessionConfig, Side, Signal, TradeStats,
};

use crate::allocator::{LedgerSnapshot, SliceSnapshot};
use crate::portfolio::PortfolioGreeks;
use crate::session::SessionGate;

/// Score assumed for a strategy without enough closed trades.
const UNKNOWN_EDGE_RISK: f64 = 0.5;

/// Per-component scores, kept for the decision notes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub size: f64,
    pub greeks: f64,
    pub loss: f64,
    pub var_impact: f64,
    pub edge: f64,
}

impl ScoreBreakdown {
    fn note(&self) -> String {
        format!(
            "size={:.2} greeks={:.2} loss={:.2} var={:.2} edge={:.2}",
            self.size, self.greeks, self.loss, self.var_impact, self.edge
        )
    }
}

pub struct RiskValidator {
    config: RiskConfig,
    gate: SessionGate,
    /// Strategy name to its own stats lock.
    stats: RwLock<HashMap<String, Arc<Mutex<TradeStats>>>>,
}

impl RiskValidator {
    #[must_use]
    pub fn new(config: RiskConfig, session: SessionConfig) -> Self {
        Self {
            config,
            gate: SessionGate::new(session),
            stats: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    fn stats_for(&self, strategy: &str) -> Arc<Mutex<TradeStats>> {
        if let Some(stats) = self.stats.read().get(strategy) {
            return Arc::clone(stats);
        }
        Arc::clone(
            self.stats
                .write()
                .entry(strategy.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TradeStats::new()))),
        )
    }

    /// Records a closed trade for the strategy's edge estimate.
    pub fn record_outcome(&self, strategy: &str, pnl: Decimal) {
        let stats = self.stats_for(strategy);
        let mut stats = stats.lock();
        stats.record(pnl);
        debug!(
            strategy,
            %pnl,
            trades = stats.trades(),
            edge = %stats.edge(),
            "Strategy outcome recorded"
        );
    }

    /// Decides whether `signal` may proceed.
    #[must_use]
    pub fn validate(
        &self,
        signal: &Signal,
        ledger: &LedgerSnapshot,
        portfolio: &PortfolioGreeks,
    ) -> RiskDecision {
        let decision = self.evaluate(signal, ledger, portfolio);
        info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            strategy = %signal.strategy_name,
            approved = decision.approved,
            reason = decision.reason_code(),
            risk_score = decision.risk_score,
            "Risk decision"
        );
        decision
    }

    fn evaluate(
        &self,
        signal: &Signal,
        ledger: &LedgerSnapshot,
        portfolio: &PortfolioGreeks,
    ) -> RiskDecision {
        if let Some(reason) = self.gate.check(signal) {
            return RiskDecision::reject(reason, 0.0);
        }

        let Some(slice) = ledger.strategy(&signal.strategy_name) else {
            return RiskDecision::reject(RejectReason::UnknownStrategy, 100.0);
        };
        if signal.is_management() {
            return self.evaluate_reduction(signal, slice, ledger, portfolio);
        }

        let loss = loss_proximity(ledger);
        if loss * 100.0 >= self.config.daily_loss_near_pct {
            return RiskDecision::reject(RejectReason::DailyLossLimitNear, 100.0)
                .with_note(format!("daily_pnl={}", ledger.daily_pnl));
        }

        let units = f64::from(signal.quantity_hint.max(1));
        let post_trade = portfolio.current() + signal.greeks() * units;
        let breaches = portfolio.breaches(&post_trade);
        if !breaches.is_empty() {
            return RiskDecision::reject(RejectReason::GreeksLimitExceeded, 100.0)
                .with_note(breaches.join(","));
        }

        let breakdown = ScoreBreakdown {
            size: clamp_unit(ratio_f64(requested_notional(signal, ledger), slice.remaining(), 1.0)),
            greeks: clamp_unit(portfolio.utilisation(&post_trade)),
            loss: clamp_unit(loss),
            var_impact: clamp_unit(var_impact(signal, ledger)),
            edge: self.edge_risk(&signal.strategy_name),
        };
        let score = self.blend(&breakdown);

        let decision = if score < self.config.score_threshold {
            RiskDecision::approve(score)
        } else {
            RiskDecision::reject(RejectReason::RiskScoreTooHigh, score)
        };
        decision.with_note(breakdown.note())
    }

    /// Scores a risk-reducing signal without the entry-only limits. A
    /// buy-to-close must still fit within total capital.
    fn evaluate_reduction(
        &self,
        signal: &Signal,
        slice: &SliceSnapshot,
        ledger: &LedgerSnapshot,
        portfolio: &PortfolioGreeks,
    ) -> RiskDecision {
        let notional = requested_notional(signal, ledger);
        if signal.side() == Side::Buy && notional > ledger.total_capital {
            return RiskDecision::reject(RejectReason::InsufficientCapital, 100.0)
                .with_note(format!("buy_to_close={notional} capital={}", ledger.total_capital));
        }

        let current = portfolio.current();
        let breakdown = ScoreBreakdown {
            size: clamp_unit(ratio_f64(notional, slice.allocation, 1.0)),
            greeks: clamp_unit(portfolio.utilisation(&current)),
            loss: clamp_unit(loss_proximity(ledger)),
            var_impact: 0.0,
            edge: self.edge_risk(&signal.strategy_name),
        };
        RiskDecision::approve(self.blend(&breakdown))
            .with_note("RISK_REDUCING")
            .with_note(breakdown.note())
    }

    /// Edge ratio mapped onto `[0, 1]`: an edge of one average loss per
    /// trade or better scores zero, the mirror image scores one.
    fn edge_risk(&self, strategy: &str) -> f64 {
        let stats = self.stats_for(strategy);
        let stats = stats.lock();
        if (stats.trades() as usize) < self.config.min_trades_for_edge {
            return UNKNOWN_EDGE_RISK;
        }
        let ratio = stats.edge_ratio().to_f64().unwrap_or(0.0);
        clamp_unit(0.5 - ratio / 2.0)
    }

    fn blend(&self, b: &ScoreBreakdown) -> f64 {
        let w = &self.config.weights;
        let total = w.size + w.greeks + w.loss + w.edge;
        let loss = b.loss.max(b.var_impact);
        let mean = if total > 0.0 && total.is_finite() {
            (w.size * b.size + w.greeks * b.greeks + w.loss * loss + w.edge * b.edge) / total
        } else {
            (b.size + b.greeks + loss + b.edge) / 4.0
        };
        (mean * 100.0).clamp(0.0, 100.0)
    }
}

/// Notional the signal asks for; the single-position cap stands in when no
/// quantity was requested.
fn requested_notional(signal: &Signal, ledger: &LedgerSnapshot) -> Decimal {
    if signal.quantity_hint > 0 {
        signal.entry_price * Decimal::from(signal.quantity_hint)
    } else {
        ledger.max_single_position
    }
}

/// Loss if the stop is hit, over what is left of today's loss budget. Sized
/// on the single-position cap when no quantity was requested. Zero without
/// a stop; the neutral ratio one once the budget is spent.
fn var_impact(signal: &Signal, ledger: &LedgerSnapshot) -> f64 {
    let Some(stop) = signal.stop_loss else {
        return 0.0;
    };
    let units = if signal.quantity_hint > 0 {
        Decimal::from(signal.quantity_hint)
    } else if signal.entry_price > Decimal::ZERO {
        (ledger.max_single_position / signal.entry_price).floor()
    } else {
        Decimal::ZERO
    };
    let risk = (signal.entry_price - stop).abs() * units;
    let budget = ledger.daily_loss_limit + ledger.daily_pnl.min(Decimal::ZERO);
    ratio_f64(risk, budget, 1.0)
}

/// Today's loss as a fraction of the daily limit; zero when there is no
/// loss or no limit.
fn loss_proximity(ledger: &LedgerSnapshot) -> f64 {
    if ledger.daily_pnl >= Decimal::ZERO {
        return 0.0;
    }
    ratio_f64(-ledger.daily_pnl, ledger.daily_loss_limit, 0.0)
}

fn ratio_f64(num: Decimal, den: Decimal, neutral: f64) -> f64 {
    if den <= Decimal::ZERO {
        return neutral;
    }
    num.checked_div(den)
        .and_then(|r| r.to_f64())
        .unwrap_or(neutral)
}

fn clamp_unit(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        1.0
    }
}
