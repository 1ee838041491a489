//! Trading-hours windows evaluated in exchange-local time.

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Offset, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tradeflow_core::{RejectReason, SessionConfig, Signal};

/// Where in the trading day an instant falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionWindow {
    /// Outside market hours or a weekend.
    Closed,
    Open,
    /// Past the no-new-signals cutoff.
    NoNewEntries,
    Warning,
    MandatoryClose,
}

impl SessionWindow {
    /// Reason a new-position signal is refused in this window, if any.
    #[must_use]
    pub const fn entry_rejection(self) -> Option<RejectReason> {
        match self {
            Self::Closed => Some(RejectReason::MarketClosed),
            Self::Open => None,
            Self::NoNewEntries => Some(RejectReason::NoNewSignalsAfterCutoff),
            Self::Warning => Some(RejectReason::WarningTime),
            Self::MandatoryClose => Some(RejectReason::MandatoryCloseTime),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionGate {
    config: SessionConfig,
    offset: FixedOffset,
}

impl SessionGate {
    /// Builds the gate. An out-of-range offset falls back to UTC; config
    /// validation rejects such offsets before this point.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let offset = config.utc_offset().unwrap_or_else(|| Utc.fix());
        Self { config, offset }
    }

    #[must_use]
    pub fn local_time(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.offset)
    }

    #[must_use]
    pub fn window_at(&self, at: DateTime<Utc>) -> SessionWindow {
        let local = self.local_time(at);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return SessionWindow::Closed;
        }
        self.window_for_time(local.time())
    }

    #[must_use]
    pub fn window_for_time(&self, t: NaiveTime) -> SessionWindow {
        let c = &self.config;
        if t < c.market_open || t >= c.market_close {
            SessionWindow::Closed
        } else if t >= c.mandatory_close {
            SessionWindow::MandatoryClose
        } else if t >= c.warning_time {
            SessionWindow::Warning
        } else if t >= c.no_new_signals_after {
            SessionWindow::NoNewEntries
        } else {
            SessionWindow::Open
        }
    }

    /// Applies the time gate to a signal. Management and closing signals
    /// pass every cutoff except the market-hours bound.
    #[must_use]
    pub fn check(&self, signal: &Signal) -> Option<RejectReason> {
        let window = self.window_at(signal.timestamp);
        if signal.is_management() {
            (window == SessionWindow::Closed).then_some(RejectReason::MarketClosed)
        } else {
            window.entry_rejection()
        }
    }

    /// True once positions must be flattened.
    #[must_use]
    pub fn must_flatten(&self, at: DateTime<Utc>) -> bool {
        self.window_at(at) == SessionWindow::MandatoryClose
    }
}
