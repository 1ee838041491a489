//! Types for position management.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tradeflow_core::{Greeks, Position};

/// Action the manager wants taken on a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitAction {
    /// Close the entire position.
    CloseAll { reason: CloseReason },
    /// Close a portion of the position.
    ClosePartial { quantity: u32, reason: CloseReason },
}

impl ExitAction {
    #[must_use]
    pub const fn reason(self) -> CloseReason {
        match self {
            Self::CloseAll { reason } | Self::ClosePartial { reason, .. } => reason,
        }
    }
}

/// Reason for closing a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TrailingStop,
    Target,
    /// Forced flatten at the mandatory-close cutoff.
    SessionClose,
    Manual,
    /// Closing signal sent by the strategy itself.
    StrategyExit,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop_loss"),
            Self::TrailingStop => write!(f, "trailing_stop"),
            Self::Target => write!(f, "target"),
            Self::SessionClose => write!(f, "session_close"),
            Self::Manual => write!(f, "manual"),
            Self::StrategyExit => write!(f, "strategy_exit"),
        }
    }
}

/// Effect of an entry fill on the book.
#[derive(Debug, Clone)]
pub struct EntryFill {
    /// Position after the fill was booked.
    pub position: Position,
    /// Opposite-side position the fill displaced. Its reserved capital and
    /// Greeks are no longer held by the book.
    pub replaced: Option<Position>,
}

/// Effect of an exit fill on a position.
#[derive(Debug, Clone)]
pub struct ExitFill {
    /// Position after the exit was booked.
    pub position: Position,
    pub closed_quantity: u32,
    pub realized_pnl: Decimal,
    /// Share of the entry reservation freed by this exit.
    pub released_capital: Decimal,
    /// Greeks exposure removed from the portfolio.
    pub released_greeks: Greeks,
    pub reason: CloseReason,
    /// True when nothing of the position remains.
    pub closed: bool,
}
