use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal_macros::dec;
use tradeflow_core::{
    BrokerError, EventSink, ExecutionConfig, Instrument, Order, OrderKey, OrderState, OrderType,
    PipelineEvent, PriceTick, QuoteBook, RejectReason, Side,
};
use tradeflow_execution::{ExecutionOutcome, OrderExecutor, PaperFault, PaperGateway};

#[derive(Default)]
struct Transitions(Mutex<Vec<(OrderState, OrderState)>>);

impl EventSink for Transitions {
    fn publish(&self, event: &PipelineEvent) {
        if let PipelineEvent::OrderTransition { from, to, .. } = event {
            self.0.lock().push((*from, *to));
        }
    }
}

struct Harness {
    paper: Arc<PaperGateway>,
    quotes: Arc<QuoteBook>,
    transitions: Arc<Transitions>,
    executor: OrderExecutor,
}

fn harness(config: ExecutionConfig) -> Harness {
    let quotes = Arc::new(QuoteBook::new());
    let paper = Arc::new(PaperGateway::new(Arc::clone(&quotes)));
    let transitions = Arc::new(Transitions::default());
    let executor = OrderExecutor::new(
        paper.clone(),
        Arc::clone(&quotes),
        transitions.clone(),
        config,
    );
    Harness {
        paper,
        quotes,
        transitions,
        executor,
    }
}

fn order() -> Order {
    Order::new(
        "sig-1",
        OrderKey::new("HDFCBANK", "momentum"),
        Instrument::equity("HDFCBANK", "NSE"),
        Side::Buy,
        5,
        OrderType::Market,
    )
    .with_reference_price(dec!(1600))
}

#[tokio::test(start_paused = true)]
async fn fills_on_first_attempt() {
    let h = harness(ExecutionConfig::default());
    let mut o = order();

    let outcome = h.executor.execute(&mut o).await;
    match outcome {
        ExecutionOutcome::Filled(fill) => {
            assert_eq!(fill.price, dec!(1600));
            assert_eq!(fill.quantity, 5);
            assert!(!fill.simulated);
        }
        other => panic!("expected fill, got {other:?}"),
    }
    assert_eq!(o.state, OrderState::Filled);
    assert!(o.broker_order_id.is_some());
    assert_eq!(
        *h.transitions.0.lock(),
        vec![
            (OrderState::Created, OrderState::Submitted),
            (OrderState::Submitted, OrderState::Filled)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried() {
    let h = harness(ExecutionConfig::default());
    h.paper.push_fault(PaperFault::Fail(BrokerError::Throttled));
    h.paper.push_fault(PaperFault::Fail(BrokerError::Unavailable("503".into())));
    let mut o = order();

    assert!(matches!(h.executor.execute(&mut o).await, ExecutionOutcome::Filled(_)));
    assert_eq!(h.paper.place_calls(), 3);
    assert_eq!(h.paper.order_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn terminal_error_is_not_retried() {
    let h = harness(ExecutionConfig::default());
    h.paper
        .push_fault(PaperFault::Fail(BrokerError::InsufficientMargin("need 2L".into())));
    let mut o = order();

    let outcome = h.executor.execute(&mut o).await;
    assert!(matches!(
        outcome,
        ExecutionOutcome::Rejected {
            reason: RejectReason::BrokerRejected,
            error: BrokerError::InsufficientMargin(_)
        }
    ));
    assert_eq!(h.paper.place_calls(), 1);
    assert_eq!(o.state, OrderState::Rejected);
    assert_eq!(o.reject_reason.as_deref(), Some("BROKER_REJECTED"));
}

#[tokio::test(start_paused = true)]
async fn retries_exhausted_rejects() {
    let h = harness(ExecutionConfig::default());
    for _ in 0..4 {
        h.paper.push_fault(PaperFault::Fail(BrokerError::Throttled));
    }
    let mut o = order();

    let outcome = h.executor.execute(&mut o).await;
    assert!(matches!(
        outcome,
        ExecutionOutcome::Rejected {
            reason: RejectReason::RetriesExhausted,
            ..
        }
    ));
    // One attempt plus three retries
    assert_eq!(h.paper.place_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn timeout_polls_status_instead_of_resubmitting() {
    let h = harness(ExecutionConfig::default());
    // The broker receives and fills the order but the reply never arrives
    h.paper.push_fault(PaperFault::Hang(Duration::from_secs(30)));
    let mut o = order();

    let outcome = h.executor.execute(&mut o).await;
    assert!(matches!(outcome, ExecutionOutcome::Filled(_)));
    assert_eq!(h.paper.place_calls(), 1, "no duplicate submission");
    assert_eq!(h.paper.order_count(), 1);
    assert_eq!(
        h.transitions.0.lock()[0],
        (OrderState::Created, OrderState::Reconcile)
    );
}

#[tokio::test(start_paused = true)]
async fn timeout_with_unreachable_status_stays_in_reconcile() {
    let h = harness(ExecutionConfig::default());
    h.paper.push_fault(PaperFault::Hang(Duration::from_secs(30)));
    h.paper
        .push_status_fault(BrokerError::Network("connection reset".into()));
    let mut o = order();

    assert_eq!(h.executor.execute(&mut o).await, ExecutionOutcome::Reconcile);
    assert_eq!(o.state, OrderState::Reconcile);

    // The next sweep finds the fill
    assert!(matches!(
        h.executor.reconcile(&mut o).await,
        ExecutionOutcome::Filled(_)
    ));
    assert_eq!(o.state, OrderState::Filled);
    assert_eq!(h.paper.place_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn degraded_mode_records_simulated_fill_at_last_quote() {
    let h = harness(ExecutionConfig {
        degraded_mode: true,
        ..ExecutionConfig::default()
    });
    h.quotes.update(PriceTick::new("HDFCBANK", dec!(1612.5)));
    for _ in 0..4 {
        h.paper
            .push_fault(PaperFault::Fail(BrokerError::Unavailable("down".into())));
    }
    let mut o = order();

    match h.executor.execute(&mut o).await {
        ExecutionOutcome::Filled(fill) => {
            assert!(fill.simulated);
            assert_eq!(fill.price, dec!(1612.5));
        }
        other => panic!("expected simulated fill, got {other:?}"),
    }
    assert!(o.is_simulated());
    assert_eq!(h.paper.order_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn open_order_is_working_then_cancellable() {
    let h = harness(ExecutionConfig::default());
    h.paper.push_fault(PaperFault::Open);
    let mut o = order();

    assert_eq!(h.executor.execute(&mut o).await, ExecutionOutcome::Working);
    assert_eq!(o.state, OrderState::Submitted);

    assert_eq!(h.executor.cancel(&mut o).await.unwrap(), ExecutionOutcome::Cancelled);
    assert_eq!(o.state, OrderState::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn cancel_after_partial_fill_reports_the_executed_units() {
    let h = harness(ExecutionConfig::default());
    h.paper.push_fault(PaperFault::Partial(2));
    let mut o = order();

    assert_eq!(h.executor.execute(&mut o).await, ExecutionOutcome::Working);

    match h.executor.cancel(&mut o).await.unwrap() {
        ExecutionOutcome::Filled(fill) => {
            assert_eq!(fill.quantity, 2);
            assert_eq!(fill.price, dec!(1600));
            assert!(!fill.simulated);
        }
        other => panic!("expected a partial fill, got {other:?}"),
    }
    assert_eq!(o.state, OrderState::Cancelled);
    assert_eq!(o.fill.as_ref().map(|f| f.quantity), Some(2));

    // A later sweep sees the same final answer
    assert!(matches!(
        h.executor.reconcile(&mut o).await,
        ExecutionOutcome::Filled(ref fill) if fill.quantity == 2
    ));
}
