//! Orders and their lifecycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::instrument::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    #[must_use]
    pub fn sign(self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit { price: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderState {
    Created,
    Submitted,
    /// Outcome unknown; the broker must be polled before anything else.
    Reconcile,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Rejected | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal lifecycle step.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (Created, Submitted | Reconcile | Filled | Rejected | Cancelled)
                | (Submitted, Reconcile | Filled | Rejected | Cancelled)
                | (Reconcile, Submitted | Filled | Rejected | Cancelled)
        )
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Submitted => "SUBMITTED",
            Self::Reconcile => "RECONCILE",
            Self::Filled => "FILLED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// (symbol, strategy) pair guarding against duplicate live orders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderKey {
    pub symbol: String,
    pub strategy: String,
}

impl OrderKey {
    pub fn new(symbol: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            strategy: strategy.into(),
        }
    }
}

impl std::fmt::Display for OrderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.symbol, self.strategy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub price: Decimal,
    pub quantity: u32,
    pub filled_at: DateTime<Utc>,
    /// Degraded-mode fill at the last quote; never a real trade.
    pub simulated: bool,
}

/// What is sent to the broker gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Our identifier, attached as the broker order tag so status can be
    /// polled without a broker order id.
    pub client_order_id: String,
    pub instrument: Instrument,
    pub side: Side,
    pub quantity: u32,
    pub order_type: OrderType,
    /// Price the signal was generated at. Gateways may use it to protect a
    /// market order; it is never a limit.
    pub reference_price: Option<Decimal>,
}

/// Order state as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub broker_order_id: String,
    pub client_order_id: String,
    pub state: OrderState,
    pub filled_quantity: u32,
    pub average_price: Option<Decimal>,
    pub message: Option<String>,
}

/// Net position as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: i64,
    pub average_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub signal_id: String,
    pub key: OrderKey,
    pub instrument: Instrument,
    pub side: Side,
    pub quantity: u32,
    pub order_type: OrderType,
    /// Signal entry price; basis for notional checks and simulated fills.
    pub reference_price: Decimal,
    pub state: OrderState,
    pub broker_order_id: Option<String>,
    pub fill: Option<Fill>,
    /// Closes an existing position rather than opening one.
    pub closing: bool,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[must_use]
    pub fn new(
        signal_id: impl Into<String>,
        key: OrderKey,
        instrument: Instrument,
        side: Side,
        quantity: u32,
        order_type: OrderType,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id: Uuid::new_v4(),
            signal_id: signal_id.into(),
            key,
            instrument,
            side,
            quantity,
            order_type,
            reference_price: Decimal::ZERO,
            state: OrderState::Created,
            broker_order_id: None,
            fill: None,
            closing: false,
            reject_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_reference_price(mut self, price: Decimal) -> Self {
        self.reference_price = price;
        self
    }

    #[must_use]
    pub fn closing(mut self, closing: bool) -> Self {
        self.closing = closing;
        self
    }

    /// Moves the order to `next`. Illegal steps leave the order unchanged
    /// and return false.
    pub fn transition(&mut self, next: OrderState) -> bool {
        if !self.state.can_transition(next) {
            tracing::warn!(
                order_id = %self.order_id,
                from = %self.state,
                to = %next,
                "Ignoring illegal order state transition"
            );
            return false;
        }
        self.state = next;
        self.updated_at = Utc::now();
        true
    }

    #[must_use]
    pub fn request(&self) -> OrderRequest {
        OrderRequest {
            client_order_id: self.order_id.to_string(),
            instrument: self.instrument.clone(),
            side: self.side,
            quantity: self.quantity,
            order_type: self.order_type,
            reference_price: (self.reference_price > Decimal::ZERO).then_some(self.reference_price),
        }
    }

    #[must_use]
    pub fn is_simulated(&self) -> bool {
        self.fill.as_ref().is_some_and(|f| f.simulated)
    }

    /// Price times quantity, at the limit price or the reference price.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        let price = match self.order_type {
            OrderType::Limit { price } => price,
            OrderType::Market => self.reference_price,
        };
        price * Decimal::from(self.quantity)
    }
}
