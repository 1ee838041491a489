//! The signal-to-order pipeline.
//!
//! A signal is validated, priced into an order and sent in that order:
//! risk gate, instrument resolution, capital reservation, hard limits,
//! breaker, rate limiter, executor. Every stage that refuses a signal
//! publishes the reason; nothing downstream of a refusal runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tradeflow_core::{
    Fill, Order, OrderKey, OrderState, OrderType, PipelineError, PipelineEvent, PositionSide,
    PriceTick, RejectReason, RiskDecision, Signal,
};
use tradeflow_execution::{Admission, ExecutionOutcome};
use tradeflow_positions::CloseReason;
use tradeflow_risk::Reservation;

use crate::commands::PipelineStatus;
use crate::context::TradingContext;

// =============================================================================
// Outcomes
// =============================================================================

/// What became of one signal.
#[derive(Debug, Clone)]
pub enum SignalOutcome {
    /// The order reached a terminal state.
    Completed(Box<Order>),
    /// Waiting in the rate limiter queue for tokens.
    Queued(Box<Order>),
    /// Working at the broker or awaiting reconciliation.
    Pending(Box<Order>),
    /// Received outside market hours and kept unexecuted.
    Parked,
    Rejected(RiskDecision),
    Dropped { reason: String, detail: String },
}

impl SignalOutcome {
    /// The order behind this outcome, if one was created.
    #[must_use]
    pub fn order(&self) -> Option<&Order> {
        match self {
            Self::Completed(o) | Self::Queued(o) | Self::Pending(o) => Some(o),
            _ => None,
        }
    }

    /// The auditable reason a signal produced no order.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Rejected(decision) => Some(decision.reason_code()),
            Self::Dropped { reason, .. } => Some(reason),
            Self::Parked => Some(RejectReason::MarketClosed.as_str()),
            _ => None,
        }
    }
}

/// Running totals since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub received: u64,
    pub invalid: u64,
    pub rejected: u64,
    pub parked: u64,
    pub dropped: u64,
    pub filled: u64,
    pub simulated: u64,
    pub unfilled: u64,
}

/// What a stop command did to outstanding orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReport {
    pub cancelled_queued: usize,
    pub cancelled_live: usize,
    /// Orders that turned out to be final when polled before cancelling.
    pub settled: usize,
    /// Orders the broker refused to cancel; still tracked.
    pub cancel_failed: usize,
}

struct Prepared {
    order: Order,
    reservation: Option<Reservation>,
}

/// An order admitted to the limiter and not yet terminal.
struct PendingOrder {
    signal: Signal,
    reservation: Option<Reservation>,
    order: Order,
    /// Waiting for rate limit tokens; false once a task owns the send.
    queued: bool,
}

// =============================================================================
// Pipeline
// =============================================================================

pub struct Pipeline {
    ctx: Arc<TradingContext>,
    pending: Mutex<HashMap<Uuid, PendingOrder>>,
    stopped: AtomicBool,
    stats: Mutex<PipelineStats>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("pending", &self.pending.lock().len())
            .field("stopped", &self.is_stopped())
            .field("stats", &*self.stats.lock())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(ctx: Arc<TradingContext>) -> Self {
        Self {
            ctx,
            pending: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
            stats: Mutex::new(PipelineStats::default()),
        }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<TradingContext> {
        &self.ctx
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        *self.stats.lock()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Normalizes a raw JSON record and processes it. Malformed records are
    /// dropped with `VALIDATION_ERROR`.
    pub async fn process_raw(&self, raw: &str) -> SignalOutcome {
        match self.ctx.normalizer.normalize_json(raw) {
            Ok(signal) => self.process_signal(signal).await,
            Err(e) => {
                warn!(error = %e, "Signal failed validation");
                self.stats.lock().invalid += 1;
                self.ctx.sink.publish(&PipelineEvent::ValidationFailed {
                    error: e.to_string(),
                    at: Utc::now(),
                });
                let err = PipelineError::from(e);
                SignalOutcome::Dropped {
                    reason: err.reason_code().to_string(),
                    detail: err.to_string(),
                }
            }
        }
    }

    pub async fn process_signal(&self, signal: Signal) -> SignalOutcome {
        self.stats.lock().received += 1;
        let key = signal.key();

        if self.is_stopped() && !signal.is_management() {
            return self.drop_signal(&signal, &PipelineError::Stopped);
        }
        if self.ctx.limiter.is_in_flight(&key) {
            return self.drop_signal(&signal, &duplicate(&key));
        }

        let decision =
            self.ctx
                .validator
                .validate(&signal, &self.ctx.allocator.snapshot(), &self.ctx.portfolio);
        self.ctx.sink.publish(&PipelineEvent::RiskDecision {
            signal_id: signal.id.clone(),
            key: key.clone(),
            decision: decision.clone(),
            at: Utc::now(),
        });

        if !decision.approved {
            if signal.flags.closing_action {
                self.ctx.positions.exit_failed(&key);
            }
            if decision.reason == Some(RejectReason::MarketClosed) {
                self.stats.lock().parked += 1;
                debug!(signal_id = %signal.id, key = %key, "Signal parked outside market hours");
                self.ctx.sink.publish(&PipelineEvent::SignalParked {
                    reason: decision.reason_code().to_string(),
                    signal: Box::new(signal),
                });
                return SignalOutcome::Parked;
            }
            self.stats.lock().rejected += 1;
            return SignalOutcome::Rejected(decision);
        }

        let prepared = match self.prepare(&signal, &decision) {
            Ok(prepared) => prepared,
            Err(e) => return self.drop_signal(&signal, &e),
        };
        self.submit(signal, prepared).await
    }

    /// Builds the order. Exits of held positions take the position's
    /// instrument and quantity; everything else is resolved and sized.
    fn prepare(&self, signal: &Signal, decision: &RiskDecision) -> Result<Prepared, PipelineError> {
        let held = self.ctx.positions.get(&signal.key());
        let reduces = held
            .as_ref()
            .is_some_and(|p| p.side.exit_side() == signal.side());

        if signal.is_management() || reduces {
            let position = held.filter(|_| reduces).ok_or_else(|| {
                PipelineError::risk_rejected(RejectReason::NoOpenPosition, signal.key().to_string())
            })?;
            let quantity = match signal.quantity_hint {
                0 => position.quantity,
                hint => hint.min(position.quantity),
            };
            let reference = self
                .ctx
                .quotes
                .last_price(&position.instrument.symbol)
                .unwrap_or(position.current_price);
            let order = Order::new(
                signal.id.clone(),
                signal.key(),
                position.instrument,
                signal.side(),
                quantity,
                OrderType::Market,
            )
            .with_reference_price(reference)
            .closing(true);
            return Ok(Prepared {
                order,
                reservation: None,
            });
        }

        let resolved = self.ctx.resolver.resolve(signal)?;
        if resolved.stale {
            warn!(
                signal_id = %signal.id,
                symbol = %resolved.instrument.symbol,
                "Resolved against a stale instrument catalog"
            );
        }
        let reservation = self
            .ctx
            .allocator
            .allocate(signal, decision, &resolved.instrument)?;
        let reference = self
            .ctx
            .quotes
            .last_price(&resolved.instrument.symbol)
            .unwrap_or(signal.entry_price);
        let order = Order::new(
            signal.id.clone(),
            signal.key(),
            resolved.instrument,
            signal.side(),
            reservation.quantity,
            OrderType::Market,
        )
        .with_reference_price(reference);
        Ok(Prepared {
            order,
            reservation: Some(reservation),
        })
    }

    async fn submit(&self, signal: Signal, prepared: Prepared) -> SignalOutcome {
        let Prepared { order, reservation } = prepared;

        let gate = self
            .ctx
            .hard_limits
            .check(&order)
            .map_err(PipelineError::from)
            .and_then(|()| {
                if order.closing {
                    return Ok(());
                }
                self.ctx
                    .breaker
                    .can_trade()
                    .map_err(|e| PipelineError::CircuitOpen(e.to_string()))
            });
        if let Err(e) = gate {
            self.release_reservation(reservation);
            return self.drop_signal(&signal, &e);
        }

        self.pending.lock().insert(
            order.order_id,
            PendingOrder {
                signal: signal.clone(),
                reservation,
                order: order.clone(),
                queued: true,
            },
        );

        match self.ctx.limiter.admit(&order) {
            Admission::Accepted => {
                if !self.take_for_send(order.order_id) {
                    return self.drop_signal(&signal, &PipelineError::Stopped);
                }
                self.run_order(order).await
            }
            Admission::Queued => {
                debug!(order_id = %order.order_id, key = %order.key, "Order queued for tokens");
                SignalOutcome::Queued(Box::new(order))
            }
            Admission::Duplicate => {
                self.forget(order.order_id);
                self.drop_signal(&signal, &duplicate(&order.key))
            }
            Admission::RateLimited => {
                self.forget(order.order_id);
                self.drop_signal(&signal, &PipelineError::RateLimited)
            }
        }
    }

    /// Sends an order the limiter released from its queue. `None` if the
    /// order was cancelled while it waited.
    pub async fn execute_queued(&self, order: Order) -> Option<SignalOutcome> {
        if !self.take_for_send(order.order_id) {
            debug!(order_id = %order.order_id, "Queued order cancelled before tokens arrived");
            return None;
        }
        Some(self.run_order(order).await)
    }

    /// Claims a pending order for sending. False if a stop cancelled it.
    fn take_for_send(&self, order_id: Uuid) -> bool {
        match self.pending.lock().get_mut(&order_id) {
            Some(entry) => {
                entry.queued = false;
                true
            }
            None => false,
        }
    }

    async fn run_order(&self, mut order: Order) -> SignalOutcome {
        let simulated_exit = order.closing
            && self
                .ctx
                .positions
                .get(&order.key)
                .is_some_and(|p| p.simulated);

        let outcome = if simulated_exit {
            self.ctx.executor.simulate(&mut order)
        } else {
            let outcome = self.ctx.executor.execute(&mut order).await;
            self.record_broker_health(&outcome);
            outcome
        };
        self.settle(order, outcome)
    }

    fn record_broker_health(&self, outcome: &ExecutionOutcome) {
        match outcome {
            ExecutionOutcome::Filled(fill) if fill.simulated => self.ctx.breaker.record_failure(),
            ExecutionOutcome::Filled(_) | ExecutionOutcome::Working => {
                self.ctx.breaker.record_success();
            }
            ExecutionOutcome::Rejected {
                reason: RejectReason::RetriesExhausted,
                ..
            }
            | ExecutionOutcome::Reconcile => self.ctx.breaker.record_failure(),
            ExecutionOutcome::Rejected { .. } | ExecutionOutcome::Cancelled => {}
        }
    }

    /// Applies an execution outcome. Non-final outcomes keep the order
    /// tracked for the reconciliation sweep.
    fn settle(&self, order: Order, outcome: ExecutionOutcome) -> SignalOutcome {
        if !outcome.is_final() {
            if let Some(entry) = self.pending.lock().get_mut(&order.order_id) {
                entry.order = order.clone();
            }
            return SignalOutcome::Pending(Box::new(order));
        }

        let Some(entry) = self.pending.lock().remove(&order.order_id) else {
            debug!(order_id = %order.order_id, "Order already settled");
            return SignalOutcome::Completed(Box::new(order));
        };
        self.ctx.limiter.release(&order.key);

        match outcome {
            ExecutionOutcome::Filled(fill) => {
                {
                    let mut stats = self.stats.lock();
                    stats.filled += 1;
                    if fill.simulated {
                        stats.simulated += 1;
                    }
                }
                if order.closing {
                    self.book_exit(&order, &fill);
                } else {
                    self.book_entry(&order, &fill, entry);
                }
            }
            _ => {
                self.stats.lock().unfilled += 1;
                self.release_reservation(entry.reservation);
                if order.closing {
                    self.ctx.positions.exit_failed(&order.key);
                }
            }
        }
        SignalOutcome::Completed(Box::new(order))
    }

    fn book_entry(&self, order: &Order, fill: &Fill, entry: PendingOrder) {
        let reserved = match entry.reservation {
            // Simulated fills never hold live capital
            Some(reservation) if fill.simulated => {
                self.ctx.allocator.release(reservation);
                Decimal::ZERO
            }
            Some(reservation) if fill.quantity < reservation.quantity => {
                let kept = reservation.unit_price * Decimal::from(fill.quantity);
                self.ctx
                    .allocator
                    .release_amount(&reservation.strategy, reservation.amount - kept);
                kept
            }
            Some(reservation) => reservation.amount,
            None => Decimal::ZERO,
        };

        let booked = self
            .ctx
            .positions
            .on_fill(order, fill, &entry.signal, reserved);
        if let Some(replaced) = booked.replaced {
            self.ctx
                .allocator
                .release_amount(&order.key.strategy, replaced.reserved_capital);
            if !replaced.simulated {
                self.ctx
                    .portfolio
                    .remove(replaced.unit_greeks * signed_units(replaced.side, replaced.quantity));
            }
        }
        if !fill.simulated {
            let units = signed_units(booked.position.side, fill.quantity);
            self.ctx.portfolio.add(entry.signal.greeks() * units);
        }
    }

    fn book_exit(&self, order: &Order, fill: &Fill) {
        let Some(freed) = self.ctx.positions.on_exit_fill(order, fill) else {
            warn!(
                order_id = %order.order_id,
                key = %order.key,
                "Exit fill with no matching position"
            );
            return;
        };
        self.ctx
            .allocator
            .release_amount(&order.key.strategy, freed.released_capital);
        if freed.position.simulated {
            debug!(key = %order.key, "Simulated position closed, live P&L untouched");
            return;
        }
        self.ctx.portfolio.remove(freed.released_greeks);
        self.ctx.allocator.record_pnl(freed.realized_pnl);
        self.ctx
            .validator
            .record_outcome(&order.key.strategy, freed.realized_pnl);
    }

    fn release_reservation(&self, reservation: Option<Reservation>) {
        if let Some(reservation) = reservation {
            self.ctx.allocator.release(reservation);
        }
    }

    /// Drops a pending entry that never reached the broker.
    fn forget(&self, order_id: Uuid) {
        if let Some(entry) = self.pending.lock().remove(&order_id) {
            self.release_reservation(entry.reservation);
        }
    }

    fn exit_pending(&self, key: &OrderKey) -> bool {
        self.pending
            .lock()
            .values()
            .any(|p| p.order.closing && p.order.key == *key)
    }

    fn drop_signal(&self, signal: &Signal, err: &PipelineError) -> SignalOutcome {
        let reason = err.reason_code();
        let key = signal.key();
        info!(
            signal_id = %signal.id,
            key = %key,
            reason,
            error = %err,
            "Signal dropped"
        );
        self.stats.lock().dropped += 1;
        // A duplicate of a pending exit must not clear that exit's mark
        if signal.flags.closing_action && !self.exit_pending(&key) {
            self.ctx.positions.exit_failed(&key);
        }
        self.ctx.sink.publish(&PipelineEvent::SignalDropped {
            signal_id: signal.id.clone(),
            key,
            reason: reason.to_string(),
            detail: err.to_string(),
            at: Utc::now(),
        });
        SignalOutcome::Dropped {
            reason: reason.to_string(),
            detail: err.to_string(),
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Polls every order that reached the broker without a final outcome.
    /// Returns how many settled.
    pub async fn reconcile_pending(&self) -> usize {
        let live: Vec<Order> = self
            .pending
            .lock()
            .values()
            .filter(|p| matches!(p.order.state, OrderState::Submitted | OrderState::Reconcile))
            .map(|p| p.order.clone())
            .collect();

        let mut settled = 0;
        for mut order in live {
            let outcome = self.ctx.executor.reconcile(&mut order).await;
            if outcome.is_final() {
                settled += 1;
            }
            self.settle(order, outcome);
        }
        if settled > 0 {
            info!(settled, remaining = self.pending_count(), "Reconciliation sweep settled orders");
        }
        settled
    }

    // =========================================================================
    // Market data and position management
    // =========================================================================

    /// Records the tick, trails stops and sends any exits it triggers. In
    /// the mandatory-close window every open position is flattened.
    pub async fn on_tick(&self, tick: PriceTick) -> Vec<SignalOutcome> {
        self.ctx.quotes.update(tick.clone());

        let mut exits = self.ctx.positions.on_tick(&tick);
        if self.ctx.validator.gate().must_flatten(tick.timestamp) {
            exits.extend(self.ctx.positions.flatten_all(CloseReason::SessionClose));
        }

        let mut outcomes = Vec::with_capacity(exits.len());
        for mut exit in exits {
            // The exit happens at the tick's time, not at processing time
            exit.timestamp = tick.timestamp;
            outcomes.push(self.process_signal(exit).await);
        }
        outcomes
    }

    /// Closes every open position now.
    pub async fn flatten(&self, reason: CloseReason) -> Vec<SignalOutcome> {
        let mut outcomes = Vec::new();
        for exit in self.ctx.positions.flatten_all(reason) {
            outcomes.push(self.process_signal(exit).await);
        }
        outcomes
    }

    /// Closes one position, fully or by `quantity` units.
    pub async fn close_position(
        &self,
        key: &OrderKey,
        quantity: Option<u32>,
        reason: CloseReason,
    ) -> Option<SignalOutcome> {
        let exit = match quantity {
            Some(quantity) => self.ctx.positions.close_partial(key, quantity, reason),
            None => self.ctx.positions.close(key, reason),
        }?;
        Some(self.process_signal(exit).await)
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Refuses new positions and cancels every outstanding order. Open
    /// positions are left alone and management signals still flow.
    pub async fn stop(&self) -> StopReport {
        self.stopped.store(true, Ordering::SeqCst);
        let mut report = StopReport::default();

        let queued: Vec<PendingOrder> = {
            let mut pending = self.pending.lock();
            let ids: Vec<Uuid> = pending
                .iter()
                .filter(|(_, p)| p.queued)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        for entry in &queued {
            self.ctx.limiter.discard(entry.order.order_id);
        }
        let dropped = self.ctx.limiter.purge_discarded();
        if dropped > 0 {
            debug!(dropped, "Cleared cancelled orders from the send queue");
        }
        for mut entry in queued {
            // Never sent, so the cancel is local
            if self.ctx.executor.cancel(&mut entry.order).await.is_ok() {
                report.cancelled_queued += 1;
            }
            self.ctx.limiter.release(&entry.order.key);
            self.release_reservation(entry.reservation);
            if entry.order.closing {
                self.ctx.positions.exit_failed(&entry.order.key);
            }
        }

        // Orders mid-send are left to the task sending them
        let live: Vec<Order> = self
            .pending
            .lock()
            .values()
            .filter(|p| matches!(p.order.state, OrderState::Submitted | OrderState::Reconcile))
            .map(|p| p.order.clone())
            .collect();
        for mut order in live {
            let outcome = self.ctx.executor.reconcile(&mut order).await;
            if outcome.is_final() {
                report.settled += 1;
                self.settle(order, outcome);
                continue;
            }
            match self.ctx.executor.cancel(&mut order).await {
                // Units filled before the cancel are booked like any fill
                Ok(outcome) => {
                    report.cancelled_live += 1;
                    self.settle(order, outcome);
                }
                Err(e) => {
                    report.cancel_failed += 1;
                    warn!(order_id = %order.order_id, error = %e, "Cancel refused during stop");
                    self.settle(order, outcome);
                }
            }
        }

        info!(
            cancelled_queued = report.cancelled_queued,
            cancelled_live = report.cancelled_live,
            settled = report.settled,
            cancel_failed = report.cancel_failed,
            open_positions = self.ctx.positions.len(),
            "Pipeline stopped"
        );
        report
    }

    pub fn resume(&self) {
        if self.stopped.swap(false, Ordering::SeqCst) {
            info!("Pipeline resumed");
        }
    }

    /// Starts a new trading session. Capital held by open positions and
    /// strategy history carry over; Greeks exposure is only cleared when no
    /// positions remain open.
    pub fn reset_session(&self) {
        self.ctx.allocator.reset_session();
        self.ctx.breaker.reset();
        if self.ctx.positions.is_empty() {
            self.ctx.portfolio.reset();
        }
        info!(open_positions = self.ctx.positions.len(), "Session reset");
    }

    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        let ctx = &self.ctx;
        PipelineStatus {
            stopped: self.is_stopped(),
            breaker_open: ctx.breaker.is_open(),
            consecutive_failures: ctx.breaker.consecutive_failures(),
            breaker_resume_in_ms: ctx
                .breaker
                .remaining_pause()
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            order_outcomes: ctx.breaker.counts(),
            in_flight: ctx.limiter.in_flight_count(),
            pending_orders: self.pending_count(),
            open_positions: ctx.positions.open_positions(),
            ledger: ctx.allocator.snapshot(),
            portfolio_greeks: ctx.portfolio.current(),
            catalog_stale: ctx.resolver.is_stale(),
            stats: self.stats(),
            at: Utc::now(),
        }
    }

    // =========================================================================
    // Background tasks
    // =========================================================================

    /// Sends queued orders as tokens become available until `shutdown`.
    pub fn spawn_queue_worker(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = self.ctx.limiter.next_ready() => {
                        let Some(order) = next else { break };
                        self.execute_queued(order).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Order queue worker stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Runs [`Self::reconcile_pending`] every `reconcile_interval_secs`.
    pub fn spawn_reconciler(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let period = Duration::from_secs(self.ctx.config.execution.reconcile_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.reconcile_pending().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Reconciliation task stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

fn signed_units(side: PositionSide, quantity: u32) -> f64 {
    match side {
        PositionSide::Long => f64::from(quantity),
        PositionSide::Short => -f64::from(quantity),
    }
}

fn duplicate(key: &OrderKey) -> PipelineError {
    PipelineError::DuplicateOrder {
        symbol: key.symbol.clone(),
        strategy: key.strategy.clone(),
    }
}
