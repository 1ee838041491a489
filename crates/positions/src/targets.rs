//! Stop and target exits.

use tradeflow_core::{Position, PositionSide};

use crate::types::{CloseReason, ExitAction};

/// Checks the stop first (more urgent), then the target.
pub fn check_exit(pos: &Position) -> Option<ExitAction> {
    let price = pos.current_price;
    if price.is_sign_negative() || price.is_zero() || pos.is_closed() {
        return None;
    }

    if let Some(stop) = pos.stop_loss {
        let hit = match pos.side {
            PositionSide::Long => price <= stop,
            PositionSide::Short => price >= stop,
        };
        if hit {
            let reason = if pos.trailing_active {
                CloseReason::TrailingStop
            } else {
                CloseReason::StopLoss
            };
            tracing::warn!(
                symbol = pos.symbol(),
                price = %price,
                stop = %stop,
                %reason,
                "Stop hit"
            );
            return Some(ExitAction::CloseAll { reason });
        }
    }

    if let Some(target) = pos.target {
        let hit = match pos.side {
            PositionSide::Long => price >= target,
            PositionSide::Short => price <= target,
        };
        if hit {
            tracing::info!(symbol = pos.symbol(), price = %price, target = %target, "Target hit");
            return Some(ExitAction::CloseAll {
                reason: CloseReason::Target,
            });
        }
    }

    None
}
