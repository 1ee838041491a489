//! Error taxonomy for the signal-to-order pipeline.
//!
//! Every rejection carries a [`RejectReason`] whose string form is the
//! auditable code written to logs and events.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Auditable reason codes for rejected signals and orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    MarketClosed,
    NoNewSignalsAfterCutoff,
    WarningTime,
    MandatoryCloseTime,
    DailyLossLimitNear,
    GreeksLimitExceeded,
    RiskScoreTooHigh,
    UnknownStrategy,
    InsufficientCapital,
    NoOpenPosition,
    StrikeNotAvailable,
    ExpiryNotAvailable,
    InstrumentNotListed,
    CatalogUnavailable,
    UnderlyingPriceUnavailable,
    RateLimited,
    DuplicateOrder,
    HardLimitExceeded,
    CircuitOpen,
    SystemStopped,
    BrokerRejected,
    RetriesExhausted,
}

impl RejectReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MarketClosed => "MARKET_CLOSED",
            Self::NoNewSignalsAfterCutoff => "NO_NEW_SIGNALS_AFTER_CUTOFF",
            Self::WarningTime => "WARNING_TIME",
            Self::MandatoryCloseTime => "MANDATORY_CLOSE_TIME",
            Self::DailyLossLimitNear => "DAILY_LOSS_LIMIT_NEAR",
            Self::GreeksLimitExceeded => "GREEKS_LIMIT_EXCEEDED",
            Self::RiskScoreTooHigh => "RISK_SCORE_TOO_HIGH",
            Self::UnknownStrategy => "UNKNOWN_STRATEGY",
            Self::InsufficientCapital => "INSUFFICIENT_CAPITAL",
            Self::NoOpenPosition => "NO_OPEN_POSITION",
            Self::StrikeNotAvailable => "STRIKE_NOT_AVAILABLE",
            Self::ExpiryNotAvailable => "EXPIRY_NOT_AVAILABLE",
            Self::InstrumentNotListed => "INSTRUMENT_NOT_LISTED",
            Self::CatalogUnavailable => "CATALOG_UNAVAILABLE",
            Self::UnderlyingPriceUnavailable => "UNDERLYING_PRICE_UNAVAILABLE",
            Self::RateLimited => "RATE_LIMITED",
            Self::DuplicateOrder => "DUPLICATE_ORDER",
            Self::HardLimitExceeded => "HARD_LIMIT_EXCEEDED",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::SystemStopped => "SYSTEM_STOPPED",
            Self::BrokerRejected => "BROKER_REJECTED",
            Self::RetriesExhausted => "RETRIES_EXHAUSTED",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural problems with a raw signal. Dropped and logged.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("malformed signal: {0}")]
    Malformed(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("confidence {0} outside [0, 10]")]
    ConfidenceOutOfRange(f64),

    #[error("unrecognised action: {0}")]
    InvalidAction(String),

    #[error("invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Errors reported by a broker gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("broker throttled the request")]
    Throttled,

    #[error("broker call timed out")]
    Timeout,

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("insufficient margin: {0}")]
    InsufficientMargin(String),

    #[error("invalid instrument: {0}")]
    InvalidInstrument(String),

    #[error("order rejected by broker: {0}")]
    Rejected(String),
}

impl BrokerError {
    /// Returns true if the same request may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Throttled | Self::Timeout | Self::Unavailable(_)
        )
    }

    /// Returns true if the broker could not be reached at all.
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Unavailable(_))
    }
}

/// Pipeline-level failures. Only broker failures are retried; everything
/// else is a final, logged decision.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("risk rejected: {reason}{}", detail_suffix(.detail))]
    RiskRejected { reason: RejectReason, detail: String },

    #[error("no capital capacity for strategy {strategy}")]
    CapacityExceeded { strategy: String },

    #[error("instrument not found: {reason} ({detail})")]
    InstrumentNotFound { reason: RejectReason, detail: String },

    #[error("rate limited")]
    RateLimited,

    #[error("order already pending for {symbol}/{strategy}")]
    DuplicateOrder { symbol: String, strategy: String },

    #[error("hard limit exceeded: {0}")]
    HardLimit(String),

    #[error("circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("transient broker error: {0}")]
    BrokerTransient(BrokerError),

    #[error("broker rejected order: {0}")]
    BrokerTerminal(BrokerError),

    #[error("order {order_id} requires reconciliation")]
    ReconcileRequired { order_id: String },

    #[error("pipeline stopped")]
    Stopped,
}

fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(" ({detail})")
    }
}

impl PipelineError {
    pub fn instrument_not_found(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self::InstrumentNotFound {
            reason,
            detail: detail.into(),
        }
    }

    pub fn risk_rejected(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self::RiskRejected {
            reason,
            detail: detail.into(),
        }
    }

    /// The auditable reason code for this failure.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RiskRejected { reason, .. } | Self::InstrumentNotFound { reason, .. } => {
                reason.as_str()
            }
            Self::CapacityExceeded { .. } => RejectReason::InsufficientCapital.as_str(),
            Self::RateLimited => RejectReason::RateLimited.as_str(),
            Self::DuplicateOrder { .. } => RejectReason::DuplicateOrder.as_str(),
            Self::HardLimit(_) => RejectReason::HardLimitExceeded.as_str(),
            Self::CircuitOpen(_) => RejectReason::CircuitOpen.as_str(),
            Self::BrokerTransient(_) => RejectReason::RetriesExhausted.as_str(),
            Self::BrokerTerminal(_) => RejectReason::BrokerRejected.as_str(),
            Self::ReconcileRequired { .. } => "RECONCILE_REQUIRED",
            Self::Stopped => RejectReason::SystemStopped.as_str(),
        }
    }
}
