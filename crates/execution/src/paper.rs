//! In-process broker used for paper trading and tests.
//!
//! Orders fill immediately at the limit price, the last quote, or the
//! request's reference price. A fault script lets callers inject broker
//! failures one call at a time.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::debug;
use tradeflow_core::{
    BrokerError, BrokerGateway, BrokerOrder, BrokerPosition, Instrument, OrderRequest, OrderState,
    OrderType, QuoteBook, Side,
};

/// Scripted behaviour for the next `place_order` call.
#[derive(Debug, Clone)]
pub enum PaperFault {
    /// Return this error without recording the order.
    Fail(BrokerError),
    /// Record and fill the order, then stall before answering.
    Hang(Duration),
    /// Accept the order but leave it unfilled.
    Open,
    /// Fill this many units and leave the rest working.
    Partial(u32),
}

#[derive(Debug, Clone)]
struct PaperOrder {
    status: BrokerOrder,
    symbol: String,
    side: Side,
    quantity: u32,
}

#[derive(Debug, Default)]
pub struct PaperGateway {
    catalog: RwLock<Vec<Instrument>>,
    quotes: Arc<QuoteBook>,
    orders: Mutex<HashMap<String, PaperOrder>>,
    place_faults: Mutex<VecDeque<PaperFault>>,
    status_faults: Mutex<VecDeque<BrokerError>>,
    next_id: AtomicU64,
    place_calls: AtomicU64,
}

impl PaperGateway {
    #[must_use]
    pub fn new(quotes: Arc<QuoteBook>) -> Self {
        Self {
            quotes,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_catalog(self, instruments: Vec<Instrument>) -> Self {
        *self.catalog.write() = instruments;
        self
    }

    pub fn set_catalog(&self, instruments: Vec<Instrument>) {
        *self.catalog.write() = instruments;
    }

    pub fn push_fault(&self, fault: PaperFault) {
        self.place_faults.lock().push_back(fault);
    }

    /// Makes the next `order_status` call fail with `error`.
    pub fn push_status_fault(&self, error: BrokerError) {
        self.status_faults.lock().push_back(error);
    }

    /// Number of `place_order` calls received, failed ones included.
    #[must_use]
    pub fn place_calls(&self) -> u64 {
        self.place_calls.load(Ordering::SeqCst)
    }

    /// Orders the broker holds, i.e. ones that actually reached it.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders.lock().len()
    }

    /// Fills a resting order, as the exchange would.
    pub fn fill_open(&self, client_order_id: &str, price: Decimal) -> bool {
        let mut orders = self.orders.lock();
        let Some(order) = orders.get_mut(client_order_id) else {
            return false;
        };
        if order.status.state.is_terminal() {
            return false;
        }
        order.status.state = OrderState::Filled;
        order.status.filled_quantity = order.quantity;
        order.status.average_price = Some(price);
        true
    }

    fn fill_price(&self, request: &OrderRequest) -> Option<Decimal> {
        match request.order_type {
            OrderType::Limit { price } => Some(price),
            OrderType::Market => self
                .quotes
                .last_price(&request.instrument.symbol)
                .or(request.reference_price),
        }
        .filter(|p| *p > Decimal::ZERO)
    }

    /// Records an order with `filled` of its units executed.
    fn record(&self, request: &OrderRequest, filled: u32) -> Result<String, BrokerError> {
        let price = self.fill_price(request).ok_or_else(|| {
            BrokerError::Rejected(format!("no price for {}", request.instrument.symbol))
        })?;
        let broker_order_id = format!("PAPER-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let status = BrokerOrder {
            broker_order_id: broker_order_id.clone(),
            client_order_id: request.client_order_id.clone(),
            state: if filled >= request.quantity {
                OrderState::Filled
            } else {
                OrderState::Submitted
            },
            filled_quantity: filled,
            average_price: (filled > 0).then_some(price),
            message: None,
        };
        self.orders.lock().insert(
            request.client_order_id.clone(),
            PaperOrder {
                status,
                symbol: request.instrument.symbol.clone(),
                side: request.side,
                quantity: request.quantity,
            },
        );
        debug!(
            broker_order_id = %broker_order_id,
            symbol = %request.instrument.symbol,
            quantity = request.quantity,
            filled,
            "Paper order recorded"
        );
        Ok(broker_order_id)
    }
}

#[async_trait]
impl BrokerGateway for PaperGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<String, BrokerError> {
        self.place_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.place_faults.lock().pop_front();
        match fault {
            Some(PaperFault::Fail(error)) => Err(error),
            Some(PaperFault::Hang(stall)) => {
                let id = self.record(request, request.quantity)?;
                tokio::time::sleep(stall).await;
                Ok(id)
            }
            Some(PaperFault::Open) => self.record(request, 0),
            Some(PaperFault::Partial(units)) => self.record(request, units.min(request.quantity)),
            None => self.record(request, request.quantity),
        }
    }

    async fn order_status(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrder>, BrokerError> {
        if let Some(error) = self.status_faults.lock().pop_front() {
            return Err(error);
        }
        Ok(self
            .orders
            .lock()
            .get(client_order_id)
            .map(|o| o.status.clone()))
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        let mut orders = self.orders.lock();
        let order = orders
            .values_mut()
            .find(|o| o.status.broker_order_id == broker_order_id)
            .ok_or_else(|| BrokerError::Rejected(format!("unknown order {broker_order_id}")))?;
        if order.status.state.is_terminal() {
            return Err(BrokerError::Rejected(format!(
                "order {broker_order_id} already {}",
                order.status.state
            )));
        }
        order.status.state = OrderState::Cancelled;
        Ok(())
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let mut net: HashMap<String, (i64, Decimal)> = HashMap::new();
        for order in self.orders.lock().values() {
            if order.status.filled_quantity == 0 {
                continue;
            }
            let price = order.status.average_price.unwrap_or_default();
            let qty = i64::from(order.status.filled_quantity);
            let entry = net.entry(order.symbol.clone()).or_default();
            match order.side {
                Side::Buy => {
                    entry.0 += qty;
                    entry.1 += price * Decimal::from(qty);
                }
                Side::Sell => {
                    entry.0 -= qty;
                    entry.1 -= price * Decimal::from(qty);
                }
            }
        }
        let mut positions: Vec<_> = net
            .into_iter()
            .filter(|(_, (qty, _))| *qty != 0)
            .map(|(symbol, (quantity, cost))| BrokerPosition {
                symbol,
                quantity,
                average_price: (cost / Decimal::from(quantity)).abs(),
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn get_orders(&self) -> Result<Vec<BrokerOrder>, BrokerError> {
        Ok(self
            .orders
            .lock()
            .values()
            .map(|o| o.status.clone())
            .collect())
    }

    async fn get_instrument_catalog(&self, exchange: &str) -> Result<Vec<Instrument>, BrokerError> {
        Ok(self
            .catalog
            .read()
            .iter()
            .filter(|i| i.exchange.eq_ignore_ascii_case(exchange))
            .cloned()
            .collect())
    }
}
