//! Audit events. Every terminal risk decision, order state transition and
//! position close is published; persistence lives outside the pipeline.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::RiskDecision;
use crate::order::{OrderKey, OrderState};
use crate::position::Position;
use crate::signal::Signal;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Raw input that failed structural validation.
    ValidationFailed {
        error: String,
        at: DateTime<Utc>,
    },
    RiskDecision {
        signal_id: String,
        key: OrderKey,
        decision: RiskDecision,
        at: DateTime<Utc>,
    },
    /// Signal received outside market hours; kept unexecuted for analysis.
    SignalParked {
        signal: Box<Signal>,
        reason: String,
    },
    /// Signal dropped after risk approval (capacity, instrument, rate limit,
    /// dedup, hard limit, breaker, stop).
    SignalDropped {
        signal_id: String,
        key: OrderKey,
        reason: String,
        detail: String,
        at: DateTime<Utc>,
    },
    OrderTransition {
        order_id: Uuid,
        signal_id: String,
        key: OrderKey,
        from: OrderState,
        to: OrderState,
        broker_order_id: Option<String>,
        simulated: bool,
        at: DateTime<Utc>,
    },
    PositionOpened {
        position: Box<Position>,
    },
    StopAdjusted {
        symbol: String,
        strategy: String,
        old_stop: Option<Decimal>,
        new_stop: Decimal,
        at: DateTime<Utc>,
    },
    PositionClosed {
        position: Box<Position>,
        reason: String,
        realized_pnl: Decimal,
        at: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Short name used as a log field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ValidationFailed { .. } => "validation_failed",
            Self::RiskDecision { .. } => "risk_decision",
            Self::SignalParked { .. } => "signal_parked",
            Self::SignalDropped { .. } => "signal_dropped",
            Self::OrderTransition { .. } => "order_transition",
            Self::PositionOpened { .. } => "position_opened",
            Self::StopAdjusted { .. } => "stop_adjusted",
            Self::PositionClosed { .. } => "position_closed",
        }
    }
}
