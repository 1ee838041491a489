//! Open position book.
//!
//! Positions are created from entry fills and updated on every tick. Exits
//! are never sent to the broker from here: the manager emits closing
//! [`Signal`]s that re-enter the pipeline as management actions.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tradeflow_core::{
    Action, EventSink, Fill, InstrumentRequest, Order, OrderKey, PipelineEvent, Position,
    PositionConfig, PositionSide, PriceTick, Side, Signal, SignalFlags,
};

use crate::stops;
use crate::targets;
use crate::types::{CloseReason, EntryFill, ExitAction, ExitFill};

/// Confidence attached to generated exits; they are never down-weighted.
const EXIT_CONFIDENCE: f64 = 10.0;

pub struct PositionManager {
    config: PositionConfig,
    positions: RwLock<HashMap<OrderKey, Position>>,
    /// Keys with an exit already emitted, and why.
    exiting: Mutex<HashMap<OrderKey, CloseReason>>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionManager")
            .field("config", &self.config)
            .field("open", &self.positions.read().len())
            .finish_non_exhaustive()
    }
}

impl PositionManager {
    pub fn new(config: PositionConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            positions: RwLock::new(HashMap::new()),
            exiting: Mutex::new(HashMap::new()),
            sink,
        }
    }

    #[must_use]
    pub fn get(&self, key: &OrderKey) -> Option<Position> {
        self.positions.read().get(key).cloned()
    }

    #[must_use]
    pub fn open_positions(&self) -> Vec<Position> {
        let mut open: Vec<_> = self.positions.read().values().cloned().collect();
        open.sort_by_key(|p| p.opened_at);
        open
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.read().is_empty()
    }

    /// Books an entry fill. A second entry on the same side for the same key
    /// averages into the existing position, per-unit Greeks included.
    pub fn on_fill(
        &self,
        order: &Order,
        fill: &Fill,
        signal: &Signal,
        reserved: Decimal,
    ) -> EntryFill {
        let side = PositionSide::from_entry(order.side);
        let unit_greeks = signal.greeks();
        let mut positions = self.positions.write();

        let mut replaced = None;
        if let Some(existing) = positions.get_mut(&order.key) {
            if existing.side == side {
                let old_units = f64::from(existing.quantity);
                let add_units = f64::from(fill.quantity);
                let old_qty = Decimal::from(existing.quantity);
                let add_qty = Decimal::from(fill.quantity);
                existing.entry_price =
                    (existing.entry_price * old_qty + fill.price * add_qty) / (old_qty + add_qty);
                if old_units + add_units > 0.0 {
                    let total = existing.unit_greeks * old_units + unit_greeks * add_units;
                    existing.unit_greeks = total * (1.0 / (old_units + add_units));
                }
                existing.quantity += fill.quantity;
                existing.reserved_capital += reserved;
                existing.simulated |= fill.simulated;
                existing.mark(fill.price);
                info!(
                    key = %order.key,
                    quantity = existing.quantity,
                    entry_price = %existing.entry_price,
                    "Added to position"
                );
                return EntryFill {
                    position: existing.clone(),
                    replaced: None,
                };
            }
            warn!(key = %order.key, "Entry fill against an opposite position, replacing");
            replaced = positions.remove(&order.key);
            self.exiting.lock().remove(&order.key);
        }

        let position = Position {
            id: Uuid::new_v4(),
            instrument: order.instrument.clone(),
            signal_symbol: order.key.symbol.clone(),
            strategy_name: order.key.strategy.clone(),
            side,
            quantity: fill.quantity,
            entry_price: fill.price,
            current_price: fill.price,
            stop_loss: signal.stop_loss,
            target: signal.target,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            extreme_price: fill.price,
            trailing_active: false,
            reserved_capital: reserved,
            unit_greeks,
            simulated: fill.simulated,
            opened_at: fill.filled_at,
        };
        positions.insert(order.key.clone(), position.clone());
        drop(positions);

        info!(
            key = %order.key,
            symbol = %position.instrument.symbol,
            side = ?position.side,
            quantity = position.quantity,
            entry_price = %position.entry_price,
            simulated = position.simulated,
            "Position opened"
        );
        self.sink.publish(&PipelineEvent::PositionOpened {
            position: Box::new(position.clone()),
        });
        EntryFill { position, replaced }
    }

    /// Books an exit fill and returns what it freed. `None` if the key has
    /// no open position.
    pub fn on_exit_fill(&self, order: &Order, fill: &Fill) -> Option<ExitFill> {
        let reason = self
            .exiting
            .lock()
            .remove(&order.key)
            .unwrap_or(CloseReason::StrategyExit);

        let mut positions = self.positions.write();
        let position = positions.get_mut(&order.key)?;
        if position.side.exit_side() != order.side {
            warn!(key = %order.key, side = ?order.side, "Exit fill on the wrong side ignored");
            return None;
        }

        let before = position.quantity;
        let released_greeks = position.unit_greeks
            * match position.side {
                PositionSide::Long => f64::from(fill.quantity.min(before)),
                PositionSide::Short => -f64::from(fill.quantity.min(before)),
            };
        let pnl = position.reduce(fill.quantity, fill.price);
        let closed_quantity = before - position.quantity;
        let released_capital = if before == 0 {
            position.reserved_capital
        } else {
            position.reserved_capital * Decimal::from(closed_quantity) / Decimal::from(before)
        };
        position.reserved_capital -= released_capital;

        let snapshot = position.clone();
        let closed = snapshot.is_closed();
        if closed {
            positions.remove(&order.key);
        }
        drop(positions);

        if closed {
            info!(
                key = %order.key,
                realized_pnl = %snapshot.realized_pnl,
                %reason,
                "Position closed"
            );
            self.sink.publish(&PipelineEvent::PositionClosed {
                position: Box::new(snapshot.clone()),
                reason: reason.to_string(),
                realized_pnl: snapshot.realized_pnl,
                at: Utc::now(),
            });
        } else {
            info!(
                key = %order.key,
                closed_quantity,
                remaining = snapshot.quantity,
                pnl = %pnl,
                "Position reduced"
            );
        }

        Some(ExitFill {
            position: snapshot,
            closed_quantity,
            realized_pnl: pnl,
            released_capital,
            released_greeks,
            reason,
            closed,
        })
    }

    /// An emitted exit did not fill; the next tick may emit it again.
    pub fn exit_failed(&self, key: &OrderKey) {
        if self.exiting.lock().remove(key).is_some() {
            debug!(key = %key, "Exit cleared after failed close");
        }
    }

    /// Marks every position in `tick.symbol`, trails stops and returns exit
    /// signals for stops or targets hit.
    pub fn on_tick(&self, tick: &PriceTick) -> Vec<Signal> {
        if tick.price <= Decimal::ZERO {
            return Vec::new();
        }

        let mut exits = Vec::new();
        let mut adjustments = Vec::new();
        {
            let mut positions = self.positions.write();
            for position in positions.values_mut() {
                if position.instrument.symbol != tick.symbol {
                    continue;
                }
                position.mark(tick.price);

                if let Some(new_stop) = stops::trailing_stop(position, &self.config) {
                    adjustments.push(PipelineEvent::StopAdjusted {
                        symbol: position.signal_symbol.clone(),
                        strategy: position.strategy_name.clone(),
                        old_stop: position.stop_loss,
                        new_stop,
                        at: tick.timestamp,
                    });
                    position.stop_loss = Some(new_stop);
                    position.trailing_active = true;
                }

                if let Some(action) = targets::check_exit(position) {
                    exits.push((position.clone(), action));
                }
            }
        }

        for event in &adjustments {
            self.sink.publish(event);
        }

        exits
            .into_iter()
            .filter_map(|(position, action)| self.exit_signal(&position, action))
            .collect()
    }

    /// Emits a full close for `key`.
    pub fn close(&self, key: &OrderKey, reason: CloseReason) -> Option<Signal> {
        let position = self.get(key)?;
        self.exit_signal(&position, ExitAction::CloseAll { reason })
    }

    /// Emits a close of `quantity` units (capped at the open quantity).
    pub fn close_partial(
        &self,
        key: &OrderKey,
        quantity: u32,
        reason: CloseReason,
    ) -> Option<Signal> {
        let position = self.get(key)?;
        self.exit_signal(&position, ExitAction::ClosePartial { quantity, reason })
    }

    /// Emits full closes for every open position (mandatory close).
    pub fn flatten_all(&self, reason: CloseReason) -> Vec<Signal> {
        let exits: Vec<_> = self
            .open_positions()
            .into_iter()
            .filter_map(|p| self.exit_signal(&p, ExitAction::CloseAll { reason }))
            .collect();
        if !exits.is_empty() {
            info!(count = exits.len(), %reason, "Flattening open positions");
        }
        exits
    }

    fn exit_signal(&self, position: &Position, action: ExitAction) -> Option<Signal> {
        let key = position.key();
        {
            let mut exiting = self.exiting.lock();
            if exiting.contains_key(&key) {
                return None;
            }
            exiting.insert(key.clone(), action.reason());
        }

        let quantity = match action {
            ExitAction::CloseAll { .. } => position.quantity,
            ExitAction::ClosePartial { quantity, .. } => quantity.min(position.quantity),
        };
        let action_side = match position.side.exit_side() {
            Side::Buy => Action::Buy,
            Side::Sell => Action::Sell,
        };
        let price = if position.current_price > Decimal::ZERO {
            position.current_price
        } else {
            position.entry_price
        };

        let mut metadata = HashMap::new();
        metadata.insert(
            "close_reason".to_string(),
            serde_json::Value::String(action.reason().to_string()),
        );

        debug!(key = %key, quantity, reason = %action.reason(), "Exit signal emitted");
        Some(Signal {
            id: Uuid::new_v4().to_string(),
            symbol: position.signal_symbol.clone(),
            underlying: position.instrument.underlying.clone(),
            action: action_side,
            strategy_name: position.strategy_name.clone(),
            confidence: EXIT_CONFIDENCE,
            entry_price: price,
            stop_loss: None,
            target: None,
            quantity_hint: quantity,
            timestamp: Utc::now(),
            flags: SignalFlags {
                management_action: true,
                closing_action: true,
            },
            instrument: InstrumentRequest {
                kind: Some(position.instrument.kind),
                pinned_symbol: Some(position.instrument.symbol.clone()),
                ..InstrumentRequest::default()
            },
            metadata,
        })
    }
}
