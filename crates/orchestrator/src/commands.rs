use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tradeflow_core::{Greeks, OrderKey, Position, PriceTick, Signal};
use tradeflow_positions::CloseReason;
use tradeflow_risk::LedgerSnapshot;

use crate::pipeline::{PipelineStats, StopReport};

#[derive(Debug)]
pub enum PipelineCommand {
    /// A raw JSON signal record from a strategy.
    RawSignal(String),
    /// An already-normalized signal.
    Signal(Box<Signal>),
    Tick(PriceTick),
    /// Close one position, fully or partially.
    Close {
        key: OrderKey,
        quantity: Option<u32>,
        reason: CloseReason,
    },
    Flatten(CloseReason),
    Reconcile,
    Stop(Option<oneshot::Sender<StopReport>>),
    Resume,
    ResetSession,
    GetStatus(oneshot::Sender<PipelineStatus>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Running,
    /// New positions refused; management signals still processed.
    Stopped,
    ShuttingDown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub stopped: bool,
    pub breaker_open: bool,
    pub consecutive_failures: u32,
    /// Milliseconds until a paused breaker lets a trial order through.
    pub breaker_resume_in_ms: Option<u64>,
    /// (successful, failed) order outcomes since the breaker last reset.
    pub order_outcomes: (u32, u32),
    pub in_flight: usize,
    pub pending_orders: usize,
    pub open_positions: Vec<Position>,
    pub ledger: LedgerSnapshot,
    pub portfolio_greeks: Greeks,
    pub catalog_stale: bool,
    pub stats: PipelineStats,
    pub at: DateTime<Utc>,
}

impl PipelineStatus {
    #[must_use]
    pub const fn state(&self) -> PipelineState {
        if self.stopped {
            PipelineState::Stopped
        } else {
            PipelineState::Running
        }
    }
}
