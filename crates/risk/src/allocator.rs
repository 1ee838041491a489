//! Per-strategy capital slices.
//!
//! Each strategy owns a fixed percentage of total capital. Quantity is
//! derived from the strategy's remaining slice, scaled by confidence and
//! capped by the single-position limit. The check and the reservation
//! happen under the strategy's own lock, so concurrent allocations for one
//! strategy can never jointly exceed its slice.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tradeflow_core::{
    CapitalConfig, Instrument, PipelineError, RejectReason, RiskDecision, Signal,
};

/// Capital held against a strategy slice for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use = "an unreleased reservation leaks capital from the strategy slice"]
pub struct Reservation {
    pub strategy: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

#[derive(Debug)]
struct Slice {
    allocation: Decimal,
    used: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceSnapshot {
    pub allocation: Decimal,
    pub used: Decimal,
}

impl SliceSnapshot {
    #[must_use]
    pub fn remaining(&self) -> Decimal {
        (self.allocation - self.used).max(Decimal::ZERO)
    }
}

/// Point-in-time copy of the capital ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub total_capital: Decimal,
    pub max_single_position: Decimal,
    pub daily_pnl: Decimal,
    pub daily_loss_limit: Decimal,
    pub strategies: BTreeMap<String, SliceSnapshot>,
    pub session_started: DateTime<Utc>,
}

impl LedgerSnapshot {
    #[must_use]
    pub fn strategy(&self, name: &str) -> Option<&SliceSnapshot> {
        self.strategies.get(name)
    }
}

pub struct CapitalAllocator {
    total_capital: Decimal,
    max_single_position: Decimal,
    daily_loss_limit: Decimal,
    /// One lock per strategy; the set of strategies is fixed by configuration.
    slices: HashMap<String, Mutex<Slice>>,
    daily: Mutex<Daily>,
}

#[derive(Debug)]
struct Daily {
    pnl: Decimal,
    session_started: DateTime<Utc>,
}

impl CapitalAllocator {
    #[must_use]
    pub fn new(config: &CapitalConfig) -> Self {
        let slices = config
            .allocations
            .iter()
            .map(|(name, pct)| {
                let allocation = config.total_capital * *pct / Decimal::ONE_HUNDRED;
                (
                    name.clone(),
                    Mutex::new(Slice {
                        allocation,
                        used: Decimal::ZERO,
                    }),
                )
            })
            .collect();
        Self {
            total_capital: config.total_capital,
            max_single_position: config.total_capital * config.max_single_position_pct
                / Decimal::ONE_HUNDRED,
            daily_loss_limit: config.daily_loss_limit,
            slices,
            daily: Mutex::new(Daily {
                pnl: Decimal::ZERO,
                session_started: Utc::now(),
            }),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        let strategies = self
            .slices
            .iter()
            .map(|(name, slice)| {
                let s = slice.lock();
                (
                    name.clone(),
                    SliceSnapshot {
                        allocation: s.allocation,
                        used: s.used,
                    },
                )
            })
            .collect();
        let daily = self.daily.lock();
        LedgerSnapshot {
            total_capital: self.total_capital,
            max_single_position: self.max_single_position,
            daily_pnl: daily.pnl,
            daily_loss_limit: self.daily_loss_limit,
            strategies,
            session_started: daily.session_started,
        }
    }

    /// Quantity the strategy's remaining slice supports for this signal,
    /// rounded down to whole lots. Zero when less than one lot fits.
    #[must_use]
    pub fn quantity_for(
        &self,
        signal: &Signal,
        remaining: Decimal,
        instrument: &Instrument,
    ) -> u32 {
        let price = signal.entry_price;
        if price <= Decimal::ZERO {
            return 0;
        }
        let confidence = Decimal::try_from(signal.confidence / 10.0)
            .unwrap_or(Decimal::ZERO)
            .clamp(Decimal::ZERO, Decimal::ONE);
        let budget = (remaining * confidence).min(self.max_single_position);
        let mut quantity = (budget / price).floor().to_u32().unwrap_or(0);
        if signal.quantity_hint > 0 {
            quantity = quantity.min(signal.quantity_hint);
        }
        instrument.round_to_lot(quantity)
    }

    /// Sizes and reserves capital for an approved entry signal.
    ///
    /// # Errors
    /// [`PipelineError::RiskRejected`] for a disapproved decision or an
    /// unknown strategy, [`PipelineError::CapacityExceeded`] when the
    /// remaining slice cannot fund one lot.
    pub fn allocate(
        &self,
        signal: &Signal,
        decision: &RiskDecision,
        instrument: &Instrument,
    ) -> Result<Reservation, PipelineError> {
        if !decision.approved {
            return Err(PipelineError::risk_rejected(
                decision.reason.unwrap_or(RejectReason::RiskScoreTooHigh),
                "allocation requires an approved decision",
            ));
        }
        let slice = self.slices.get(&signal.strategy_name).ok_or_else(|| {
            PipelineError::risk_rejected(
                RejectReason::UnknownStrategy,
                signal.strategy_name.clone(),
            )
        })?;

        let mut slice = slice.lock();
        let remaining = (slice.allocation - slice.used).max(Decimal::ZERO);
        let quantity = self.quantity_for(signal, remaining, instrument);
        if quantity == 0 {
            debug!(
                strategy = %signal.strategy_name,
                %remaining,
                price = %signal.entry_price,
                lot = instrument.lot_size,
                "Remaining slice below one lot"
            );
            return Err(PipelineError::CapacityExceeded {
                strategy: signal.strategy_name.clone(),
            });
        }

        let amount = signal.entry_price * Decimal::from(quantity);
        slice.used += amount;
        debug!(
            strategy = %signal.strategy_name,
            quantity,
            %amount,
            used = %slice.used,
            allocation = %slice.allocation,
            "Capital reserved"
        );
        Ok(Reservation {
            strategy: signal.strategy_name.clone(),
            quantity,
            unit_price: signal.entry_price,
            amount,
        })
    }

    /// Returns a reservation's capital to its slice.
    pub fn release(&self, reservation: Reservation) {
        self.release_amount(&reservation.strategy, reservation.amount);
    }

    /// Returns `amount` to the strategy slice (e.g. the cost basis of a
    /// closed position). Never drives usage negative.
    pub fn release_amount(&self, strategy: &str, amount: Decimal) {
        let Some(slice) = self.slices.get(strategy) else {
            warn!(strategy, "Release for unknown strategy ignored");
            return;
        };
        let mut slice = slice.lock();
        slice.used = (slice.used - amount).max(Decimal::ZERO);
        debug!(strategy, %amount, used = %slice.used, "Capital released");
    }

    /// Books realized P&L from a live (never simulated) close.
    pub fn record_pnl(&self, pnl: Decimal) {
        let mut daily = self.daily.lock();
        daily.pnl += pnl;
        let limit_hit = !self.daily_loss_limit.is_zero() && -daily.pnl >= self.daily_loss_limit;
        if limit_hit {
            warn!(
                daily_pnl = %daily.pnl,
                limit = %self.daily_loss_limit,
                "Daily loss limit reached"
            );
        }
    }

    #[must_use]
    pub fn daily_pnl(&self) -> Decimal {
        self.daily.lock().pnl
    }

    /// Starts a new session. Daily P&L goes to zero; slice usage is left
    /// alone because it still backs open positions and working orders.
    pub fn reset_session(&self) {
        let used: Decimal = self.slices.values().map(|s| s.lock().used).sum();
        let mut daily = self.daily.lock();
        daily.pnl = Decimal::ZERO;
        daily.session_started = Utc::now();
        info!(
            strategies = self.slices.len(),
            %used,
            "Capital ledger reset for new session"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap as Map;
    use std::sync::Arc;
    use tradeflow_core::{Action, InstrumentRequest, SignalFlags};

    fn config() -> CapitalConfig {
        let mut cfg = CapitalConfig {
            total_capital: dec!(1000000),
            max_single_position_pct: dec!(20),
            daily_loss_limit: dec!(20000),
            ..CapitalConfig::default()
        };
        cfg.allocations.insert("momentum".into(), dec!(30));
        cfg.allocations.insert("scalper".into(), dec!(5));
        cfg
    }

    fn signal(strategy: &str, price: Decimal, confidence: f64, hint: u32) -> Signal {
        Signal {
            id: "s".into(),
            symbol: "RELIANCE".into(),
            underlying: "RELIANCE".into(),
            action: Action::Buy,
            strategy_name: strategy.into(),
            confidence,
            entry_price: price,
            stop_loss: None,
            target: None,
            quantity_hint: hint,
            timestamp: Utc::now(),
            flags: SignalFlags::default(),
            instrument: InstrumentRequest::default(),
            metadata: Map::new(),
        }
    }

    fn equity() -> Instrument {
        Instrument::equity("RELIANCE", "NSE")
    }

    fn approved() -> RiskDecision {
        RiskDecision::approve(10.0)
    }

    #[test]
    fn quantity_comes_from_strategy_slice() {
        let alloc = CapitalAllocator::new(&config());
        // slice 300k, confidence 5 -> 150k budget, below 200k single cap
        let r = alloc
            .allocate(&signal("momentum", dec!(1000), 5.0, 0), &approved(), &equity())
            .unwrap();
        assert_eq!(r.quantity, 150);
        assert_eq!(r.amount, dec!(150000));
        assert_eq!(alloc.snapshot().strategy("momentum").unwrap().used, dec!(150000));
    }

    #[test]
    fn single_position_cap_and_hint_bound_quantity() {
        let alloc = CapitalAllocator::new(&config());
        // confidence 10 -> 300k budget capped at 200k
        let r = alloc
            .allocate(&signal("momentum", dec!(1000), 10.0, 0), &approved(), &equity())
            .unwrap();
        assert_eq!(r.quantity, 200);
        alloc.release(r);
        let r = alloc
            .allocate(&signal("momentum", dec!(1000), 10.0, 25), &approved(), &equity())
            .unwrap();
        assert_eq!(r.quantity, 25);
    }

    #[test]
    fn less_than_one_lot_is_capacity_exceeded() {
        let alloc = CapitalAllocator::new(&config());
        let mut lot = equity();
        lot.lot_size = 500;
        // scalper slice 50k, confidence 10 -> 50 units at 1000, below one lot of 500
        let err = alloc
            .allocate(&signal("scalper", dec!(1000), 10.0, 0), &approved(), &lot)
            .unwrap_err();
        assert_eq!(err.reason_code(), "INSUFFICIENT_CAPITAL");
        assert_eq!(alloc.snapshot().strategy("scalper").unwrap().used, Decimal::ZERO);
    }

    #[test]
    fn unknown_strategy_and_rejected_decision() {
        let alloc = CapitalAllocator::new(&config());
        let err = alloc
            .allocate(&signal("ghost", dec!(10), 5.0, 0), &approved(), &equity())
            .unwrap_err();
        assert_eq!(err.reason_code(), "UNKNOWN_STRATEGY");

        let rejected = RiskDecision::reject(RejectReason::RiskScoreTooHigh, 90.0);
        assert!(alloc
            .allocate(&signal("momentum", dec!(10), 5.0, 0), &rejected, &equity())
            .is_err());
    }

    #[test]
    fn release_and_reset() {
        let alloc = CapitalAllocator::new(&config());
        let r = alloc
            .allocate(&signal("momentum", dec!(1000), 5.0, 0), &approved(), &equity())
            .unwrap();
        alloc.release_amount("momentum", dec!(50000));
        assert_eq!(alloc.snapshot().strategy("momentum").unwrap().used, dec!(100000));
        alloc.release(r);
        assert_eq!(alloc.snapshot().strategy("momentum").unwrap().used, Decimal::ZERO);

        alloc.record_pnl(dec!(-1500));
        assert_eq!(alloc.daily_pnl(), dec!(-1500));
        alloc.reset_session();
        assert_eq!(alloc.daily_pnl(), Decimal::ZERO);
    }

    #[test]
    fn reset_keeps_capital_held_by_open_reservations() {
        let alloc = CapitalAllocator::new(&config());
        let r = alloc
            .allocate(&signal("momentum", dec!(1000), 10.0, 0), &approved(), &equity())
            .unwrap();
        alloc.reset_session();
        assert_eq!(alloc.snapshot().strategy("momentum").unwrap().used, dec!(200000));

        // Only 100k of the 300k slice is left after the reset
        let second = alloc
            .allocate(&signal("momentum", dec!(1000), 10.0, 0), &approved(), &equity())
            .unwrap();
        assert_eq!(second.quantity, 100);
        alloc.release(r);
        alloc.release(second);
        assert_eq!(alloc.snapshot().strategy("momentum").unwrap().used, Decimal::ZERO);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_allocations_never_exceed_slice() {
        let alloc = Arc::new(CapitalAllocator::new(&config()));
        let cap = dec!(300000);

        let mut handles = Vec::new();
        for i in 0..200u32 {
            let alloc = Arc::clone(&alloc);
            handles.push(tokio::spawn(async move {
                let price = Decimal::from(100 + (i % 7) * 37);
                let confidence = f64::from(1 + i % 10);
                let result = alloc.allocate(
                    &signal("momentum", price, confidence, 0),
                    &RiskDecision::approve(10.0),
                    &Instrument::equity("RELIANCE", "NSE"),
                );
                let used = alloc.snapshot().strategy("momentum").map(|s| s.used);
                (result.ok(), used)
            }));
        }

        let mut reserved = Decimal::ZERO;
        for handle in handles {
            let (reservation, used_seen) = handle.await.unwrap();
            assert!(used_seen.unwrap() <= cap);
            if let Some(r) = reservation {
                reserved += r.amount;
            }
        }
        assert!(reserved <= cap, "reserved {reserved} exceeds slice {cap}");
        assert_eq!(alloc.snapshot().strategy("momentum").unwrap().used, reserved);
    }
}
