//! Order submission with bounded timeouts, retry of transient broker errors
//! and status reconciliation.
//!
//! A submission that times out is never blindly resent: the order moves to
//! RECONCILE and the broker is asked about it first. Only a confirmed
//! "never received" allows another attempt.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use tradeflow_core::{
    BrokerError, BrokerGateway, BrokerOrder, EventSink, ExecutionConfig, Fill, Order, OrderState,
    PipelineEvent, QuoteBook, RejectReason,
};

/// Where an order stands after [`OrderExecutor::execute`] or
/// [`OrderExecutor::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The fill may cover only part of the order when the broker cancelled
    /// the rest.
    Filled(Fill),
    /// Accepted by the broker and still open after the fill polls.
    Working,
    Rejected {
        reason: RejectReason,
        error: BrokerError,
    },
    Cancelled,
    /// Outcome unknown; the order stays in RECONCILE until a status poll
    /// settles it.
    Reconcile,
}

impl ExecutionOutcome {
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Filled(_) | Self::Rejected { .. } | Self::Cancelled
        )
    }
}

enum Lookup {
    Known(ExecutionOutcome),
    Absent,
    Unreachable(BrokerError),
}

pub struct OrderExecutor {
    gateway: Arc<dyn BrokerGateway>,
    quotes: Arc<QuoteBook>,
    sink: Arc<dyn EventSink>,
    config: ExecutionConfig,
}

impl std::fmt::Debug for OrderExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OrderExecutor {
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        quotes: Arc<QuoteBook>,
        sink: Arc<dyn EventSink>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            gateway,
            quotes,
            sink,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.config.submit_timeout_ms)
    }

    /// Submits `order` and follows it until it fills, is refused, or its
    /// outcome becomes unknowable.
    pub async fn execute(&self, order: &mut Order) -> ExecutionOutcome {
        let request = order.request();
        let max_retries = self.config.max_retries;
        let max_delay = Duration::from_millis(self.config.max_backoff_ms);
        let mut delay = Duration::from_millis(self.config.base_backoff_ms);
        let mut last_error = BrokerError::Timeout;

        for attempt in 0..=max_retries {
            match timeout(self.submit_timeout(), self.gateway.place_order(&request)).await {
                Ok(Ok(broker_order_id)) => {
                    info!(
                        order_id = %order.order_id,
                        key = %order.key,
                        broker_order_id = %broker_order_id,
                        attempt = attempt + 1,
                        "Order accepted by broker"
                    );
                    order.broker_order_id = Some(broker_order_id);
                    self.move_to(order, OrderState::Submitted);
                    return self.await_fill(order).await;
                }
                Ok(Err(e)) if !e.is_transient() => {
                    return self.reject(order, RejectReason::BrokerRejected, e);
                }
                Ok(Err(e)) => {
                    // A dropped connection may have delivered the request
                    if matches!(e, BrokerError::Network(_)) {
                        if let Lookup::Known(outcome) = self.look_up(order).await {
                            return outcome;
                        }
                    }
                    last_error = e;
                }
                Err(_) => {
                    warn!(
                        order_id = %order.order_id,
                        key = %order.key,
                        timeout_ms = self.config.submit_timeout_ms,
                        "Order submission timed out, reconciling before retry"
                    );
                    self.move_to(order, OrderState::Reconcile);
                    match self.look_up(order).await {
                        Lookup::Known(outcome) => return outcome,
                        Lookup::Absent => last_error = BrokerError::Timeout,
                        Lookup::Unreachable(e) => {
                            warn!(
                                order_id = %order.order_id,
                                error = %e,
                                "Status poll failed, order left in reconcile"
                            );
                            return ExecutionOutcome::Reconcile;
                        }
                    }
                }
            }

            if attempt < max_retries {
                warn!(
                    attempt = attempt + 1,
                    max_retries,
                    error = %last_error,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Order submission failed, retrying"
                );
                sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }

        // Exits are never simulated: the live position is still at the broker
        if self.config.degraded_mode && last_error.is_connection_loss() && !order.closing {
            if let Some(outcome) = self.simulate_fill(order) {
                return outcome;
            }
        }
        self.reject(order, RejectReason::RetriesExhausted, last_error)
    }

    /// Settles `order` locally at the last quote without touching the
    /// broker. Used to close positions that were themselves simulated.
    pub fn simulate(&self, order: &mut Order) -> ExecutionOutcome {
        self.simulate_fill(order).unwrap_or_else(|| {
            self.reject(
                order,
                RejectReason::RetriesExhausted,
                BrokerError::Unavailable(format!("no price for {}", order.instrument.symbol)),
            )
        })
    }

    /// Polls the broker for an order whose outcome is not yet final.
    pub async fn reconcile(&self, order: &mut Order) -> ExecutionOutcome {
        if order.state.is_terminal() {
            return match &order.fill {
                Some(fill) => ExecutionOutcome::Filled(fill.clone()),
                None if order.state == OrderState::Cancelled => ExecutionOutcome::Cancelled,
                None => ExecutionOutcome::Rejected {
                    reason: RejectReason::BrokerRejected,
                    error: BrokerError::Rejected(order.reject_reason.clone().unwrap_or_default()),
                },
            };
        }

        match self.look_up(order).await {
            Lookup::Known(outcome) => outcome,
            Lookup::Absent => {
                info!(
                    order_id = %order.order_id,
                    key = %order.key,
                    "Broker has no record of order, cancelling locally"
                );
                self.move_to(order, OrderState::Cancelled);
                ExecutionOutcome::Cancelled
            }
            Lookup::Unreachable(e) => {
                debug!(order_id = %order.order_id, error = %e, "Reconcile poll failed");
                if order.state == OrderState::Reconcile {
                    ExecutionOutcome::Reconcile
                } else {
                    ExecutionOutcome::Working
                }
            }
        }
    }

    /// Cancels a live order and returns its final outcome: `Cancelled`, or
    /// `Filled` for the units the broker executed before the cancel. Orders
    /// the broker never saw are cancelled locally.
    ///
    /// # Errors
    ///
    /// The broker's refusal; the order state is left unchanged.
    pub async fn cancel(&self, order: &mut Order) -> Result<ExecutionOutcome, BrokerError> {
        if order.state.is_terminal() {
            return Ok(self.reconcile(order).await);
        }
        let Some(broker_order_id) = order.broker_order_id.clone() else {
            self.move_to(order, OrderState::Cancelled);
            return Ok(ExecutionOutcome::Cancelled);
        };
        match timeout(self.submit_timeout(), self.gateway.cancel_order(&broker_order_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(BrokerError::Timeout),
        }

        if let Lookup::Known(outcome) = self.look_up(order).await {
            if outcome.is_final() {
                return Ok(outcome);
            }
        }
        self.move_to(order, OrderState::Cancelled);
        Ok(ExecutionOutcome::Cancelled)
    }

    async fn await_fill(&self, order: &mut Order) -> ExecutionOutcome {
        let interval = Duration::from_millis(self.config.fill_poll_interval_ms);
        for _ in 0..self.config.fill_poll_attempts {
            if let Lookup::Known(outcome) = self.look_up(order).await {
                if outcome.is_final() {
                    return outcome;
                }
            }
            sleep(interval).await;
        }
        debug!(
            order_id = %order.order_id,
            key = %order.key,
            "Order still working after fill polls"
        );
        ExecutionOutcome::Working
    }

    async fn look_up(&self, order: &mut Order) -> Lookup {
        let client_order_id = order.order_id.to_string();
        let poll = self.gateway.order_status(&client_order_id);
        let status = match timeout(self.submit_timeout(), poll).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Lookup::Unreachable(e),
            Err(_) => return Lookup::Unreachable(BrokerError::Timeout),
        };
        match status {
            Some(broker_order) => Lookup::Known(self.adopt(order, broker_order)),
            None => Lookup::Absent,
        }
    }

    /// Applies the broker's view of an order.
    fn adopt(&self, order: &mut Order, broker_order: BrokerOrder) -> ExecutionOutcome {
        if order.broker_order_id.is_none() {
            order.broker_order_id = Some(broker_order.broker_order_id.clone());
        }
        match broker_order.state {
            OrderState::Filled => {
                let price = broker_order
                    .average_price
                    .unwrap_or(order.reference_price);
                let quantity = if broker_order.filled_quantity > 0 {
                    broker_order.filled_quantity
                } else {
                    order.quantity
                };
                let fill = Fill {
                    price,
                    quantity,
                    filled_at: Utc::now(),
                    simulated: false,
                };
                order.fill = Some(fill.clone());
                self.move_to(order, OrderState::Filled);
                ExecutionOutcome::Filled(fill)
            }
            OrderState::Rejected => {
                let message = broker_order.message.unwrap_or_else(|| "rejected".to_string());
                self.reject(order, RejectReason::BrokerRejected, BrokerError::Rejected(message))
            }
            OrderState::Cancelled if broker_order.filled_quantity > 0 => {
                let fill = Fill {
                    price: broker_order.average_price.unwrap_or(order.reference_price),
                    quantity: broker_order.filled_quantity.min(order.quantity),
                    filled_at: Utc::now(),
                    simulated: false,
                };
                info!(
                    order_id = %order.order_id,
                    key = %order.key,
                    filled = fill.quantity,
                    ordered = order.quantity,
                    "Order cancelled after a partial fill"
                );
                order.fill = Some(fill.clone());
                self.move_to(order, OrderState::Cancelled);
                ExecutionOutcome::Filled(fill)
            }
            OrderState::Cancelled => {
                self.move_to(order, OrderState::Cancelled);
                ExecutionOutcome::Cancelled
            }
            OrderState::Created | OrderState::Submitted | OrderState::Reconcile => {
                if order.state != OrderState::Submitted {
                    self.move_to(order, OrderState::Submitted);
                }
                ExecutionOutcome::Working
            }
        }
    }

    fn simulate_fill(&self, order: &mut Order) -> Option<ExecutionOutcome> {
        let price = self
            .quotes
            .last_price(&order.instrument.symbol)
            .filter(|p| *p > Decimal::ZERO)
            .or_else(|| (order.reference_price > Decimal::ZERO).then_some(order.reference_price))?;

        warn!(
            order_id = %order.order_id,
            key = %order.key,
            price = %price,
            "Recording simulated fill"
        );
        let fill = Fill {
            price,
            quantity: order.quantity,
            filled_at: Utc::now(),
            simulated: true,
        };
        order.fill = Some(fill.clone());
        self.move_to(order, OrderState::Filled);
        Some(ExecutionOutcome::Filled(fill))
    }

    fn reject(
        &self,
        order: &mut Order,
        reason: RejectReason,
        error: BrokerError,
    ) -> ExecutionOutcome {
        warn!(
            order_id = %order.order_id,
            key = %order.key,
            reason = %reason,
            error = %error,
            "Order rejected"
        );
        order.reject_reason = Some(reason.as_str().to_string());
        self.move_to(order, OrderState::Rejected);
        ExecutionOutcome::Rejected { reason, error }
    }

    fn move_to(&self, order: &mut Order, next: OrderState) {
        let from = order.state;
        if from == next || !order.transition(next) {
            return;
        }
        self.sink.publish(&PipelineEvent::OrderTransition {
            order_id: order.order_id,
            signal_id: order.signal_id.clone(),
            key: order.key.clone(),
            from,
            to: next,
            broker_order_id: order.broker_order_id.clone(),
            simulated: order.is_simulated(),
            at: Utc::now(),
        });
    }
}
