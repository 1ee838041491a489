use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tradeflow_core::{
    Action, EventSink, Fill, Instrument, Order, OrderKey, OrderType, PipelineEvent, PositionConfig,
    PriceTick, Side, Signal, SignalNormalizer,
};
use tradeflow_positions::{CloseReason, PositionManager};

#[derive(Default)]
struct Recorder(Mutex<Vec<PipelineEvent>>);

impl EventSink for Recorder {
    fn publish(&self, event: &PipelineEvent) {
        self.0.lock().push(event.clone());
    }
}

impl Recorder {
    fn stops(&self) -> Vec<Decimal> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::StopAdjusted { new_stop, .. } => Some(*new_stop),
                _ => None,
            })
            .collect()
    }

    fn closed(&self) -> usize {
        self.0
            .lock()
            .iter()
            .filter(|e| matches!(e, PipelineEvent::PositionClosed { .. }))
            .count()
    }
}

fn entry_signal(action: &str, stop: &str, target: &str) -> Signal {
    SignalNormalizer::new()
        .normalize_json(&format!(
            r#"{{"symbol":"RELIANCE","action":"{action}","strategy_name":"momentum",
                "confidence":8,"entry_price":2500,"stop_loss":{stop},"target":{target}}}"#
        ))
        .unwrap()
}

fn fill(price: Decimal, quantity: u32) -> Fill {
    Fill {
        price,
        quantity,
        filled_at: Utc::now(),
        simulated: false,
    }
}

fn order(side: Side, quantity: u32) -> Order {
    Order::new(
        "sig",
        OrderKey::new("RELIANCE", "momentum"),
        Instrument::equity("RELIANCE", "NSE"),
        side,
        quantity,
        OrderType::Market,
    )
}

fn manager() -> (PositionManager, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    (
        PositionManager::new(PositionConfig::default(), recorder.clone()),
        recorder,
    )
}

#[test]
fn long_position_trails_and_exits_on_stop() {
    let (pm, events) = manager();
    let signal = entry_signal("BUY", "2450", "2700");
    pm.on_fill(&order(Side::Buy, 10), &fill(dec!(2500), 10), &signal, dec!(25000));

    let mut exits = Vec::new();
    for price in [dec!(2510), dec!(2530), dec!(2580), dec!(2560), dec!(2620), dec!(2590)] {
        exits.extend(pm.on_tick(&PriceTick::new("RELIANCE", price)));
    }

    let stops = events.stops();
    assert!(stops.len() >= 2);
    assert!(stops.windows(2).all(|w| w[1] >= w[0]));
    // 2620 x 0.99
    assert_eq!(*stops.last().unwrap(), dec!(2593.80));

    // 2590 is below the trailed stop
    assert_eq!(exits.len(), 1);
    let exit = &exits[0];
    assert!(exit.flags.closing_action && exit.flags.management_action);
    assert_eq!(exit.action, Action::Sell);
    assert_eq!(exit.quantity_hint, 10);
    assert_eq!(exit.instrument.pinned_symbol.as_deref(), Some("RELIANCE"));
    assert_eq!(exit.key(), OrderKey::new("RELIANCE", "momentum"));

    // No duplicate exit while the first is pending
    assert!(pm.on_tick(&PriceTick::new("RELIANCE", dec!(2580))).is_empty());

    let freed = pm
        .on_exit_fill(&order(Side::Sell, 10), &fill(dec!(2590), 10))
        .unwrap();
    assert!(freed.closed);
    assert_eq!(freed.reason, CloseReason::TrailingStop);
    assert_eq!(freed.realized_pnl, dec!(900));
    assert_eq!(freed.released_capital, dec!(25000));
    assert!(pm.is_empty());
    assert_eq!(events.closed(), 1);
}

#[test]
fn short_position_stop_only_moves_down() {
    let (pm, events) = manager();
    let signal = entry_signal("SELL", "2550", "2300");
    pm.on_fill(&order(Side::Sell, 4), &fill(dec!(2500), 4), &signal, dec!(10000));

    for price in [dec!(2470), dec!(2480), dec!(2440), dec!(2460), dec!(2400)] {
        pm.on_tick(&PriceTick::new("RELIANCE", price));
    }
    let stops = events.stops();
    assert!(!stops.is_empty());
    assert!(stops.windows(2).all(|w| w[1] <= w[0]), "{stops:?}");
}

#[test]
fn partial_close_releases_proportional_capital() {
    let (pm, _) = manager();
    let signal = entry_signal("BUY", "2400", "2800");
    let key = OrderKey::new("RELIANCE", "momentum");
    pm.on_fill(&order(Side::Buy, 10), &fill(dec!(2500), 10), &signal, dec!(25000));

    let exit = pm.close_partial(&key, 4, CloseReason::Manual).unwrap();
    assert_eq!(exit.quantity_hint, 4);

    let freed = pm
        .on_exit_fill(&order(Side::Sell, 4), &fill(dec!(2550), 4))
        .unwrap();
    assert!(!freed.closed);
    assert_eq!(freed.released_capital, dec!(10000));
    assert_eq!(freed.realized_pnl, dec!(200));
    assert_eq!(pm.get(&key).unwrap().quantity, 6);
}

#[test]
fn flatten_emits_one_close_per_position() {
    let (pm, _) = manager();
    let signal = entry_signal("BUY", "2400", "2800");
    pm.on_fill(&order(Side::Buy, 10), &fill(dec!(2500), 10), &signal, dec!(25000));

    let exits = pm.flatten_all(CloseReason::SessionClose);
    assert_eq!(exits.len(), 1);
    assert_eq!(
        exits[0].metadata["close_reason"],
        serde_json::json!("session_close")
    );
    // Already exiting
    assert!(pm.flatten_all(CloseReason::SessionClose).is_empty());

    pm.exit_failed(&OrderKey::new("RELIANCE", "momentum"));
    assert_eq!(pm.flatten_all(CloseReason::SessionClose).len(), 1);
}

#[test]
fn same_side_entry_averages_in() {
    let (pm, _) = manager();
    let signal = entry_signal("BUY", "2400", "2800");
    pm.on_fill(&order(Side::Buy, 10), &fill(dec!(2500), 10), &signal, dec!(25000));
    let p = pm
        .on_fill(&order(Side::Buy, 10), &fill(dec!(2600), 10), &signal, dec!(26000))
        .position;
    assert_eq!(p.quantity, 20);
    assert_eq!(p.entry_price, dec!(2550));
    assert_eq!(p.reserved_capital, dec!(51000));
}

#[test]
fn add_on_reweights_unit_greeks() {
    let (pm, _) = manager();
    let mut first = entry_signal("BUY", "2400", "2800");
    first.metadata.insert("delta".into(), serde_json::json!(0.4));
    let mut second = first.clone();
    second.metadata.insert("delta".into(), serde_json::json!(0.7));

    pm.on_fill(&order(Side::Buy, 20), &fill(dec!(2500), 20), &first, dec!(50000));
    let p = pm
        .on_fill(&order(Side::Buy, 10), &fill(dec!(2500), 10), &second, dec!(25000))
        .position;
    // (0.4 * 20 + 0.7 * 10) / 30
    assert!((p.unit_greeks.delta - 0.5).abs() < 1e-9, "{}", p.unit_greeks.delta);
}

#[test]
fn opposite_entry_fill_hands_back_the_displaced_position() {
    let (pm, _) = manager();
    let long = entry_signal("BUY", "2400", "2800");
    let short = entry_signal("SELL", "2600", "2300");
    pm.on_fill(&order(Side::Buy, 10), &fill(dec!(2500), 10), &long, dec!(25000));

    let booked = pm.on_fill(&order(Side::Sell, 4), &fill(dec!(2500), 4), &short, dec!(10000));
    let replaced = booked.replaced.expect("long position displaced");
    assert_eq!(replaced.quantity, 10);
    assert_eq!(replaced.reserved_capital, dec!(25000));
    assert_eq!(booked.position.quantity, 4);
    assert_eq!(pm.len(), 1);
}
