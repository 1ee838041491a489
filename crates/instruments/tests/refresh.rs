use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tradeflow_core::{
    BrokerError, BrokerGateway, BrokerOrder, BrokerPosition, Instrument, InstrumentConfig,
    InstrumentRequest, OrderRequest, QuoteBook, SignalNormalizer,
};
use tradeflow_instruments::InstrumentResolver;

/// Serves a fixed equity listing and counts catalog fetches. Fails every
/// fetch once `fail` is set.
struct CatalogGateway {
    fetches: AtomicUsize,
    fail: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl BrokerGateway for CatalogGateway {
    async fn place_order(&self, _request: &OrderRequest) -> Result<String, BrokerError> {
        Err(BrokerError::Unavailable("catalog only".into()))
    }

    async fn order_status(&self, _id: &str) -> Result<Option<BrokerOrder>, BrokerError> {
        Ok(None)
    }

    async fn cancel_order(&self, _id: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(Vec::new())
    }

    async fn get_orders(&self) -> Result<Vec<BrokerOrder>, BrokerError> {
        Ok(Vec::new())
    }

    async fn get_instrument_catalog(&self, exchange: &str) -> Result<Vec<Instrument>, BrokerError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(BrokerError::Network("connection reset".into()));
        }
        if exchange == "NSE" {
            Ok(vec![Instrument::equity("INFY", "NSE")])
        } else {
            Ok(Vec::new())
        }
    }
}

fn infy_signal() -> tradeflow_core::Signal {
    let mut s = SignalNormalizer::new()
        .normalize_json(
            r#"{"symbol":"INFY","action":"BUY","strategy":"s","confidence":5,"entry_price":1800,"quantity":1}"#,
        )
        .unwrap();
    s.instrument = InstrumentRequest::default();
    s
}

#[tokio::test]
async fn refresh_failure_keeps_previous_snapshot() {
    let gateway = CatalogGateway {
        fetches: AtomicUsize::new(0),
        fail: false.into(),
    };
    let resolver = InstrumentResolver::new(InstrumentConfig::default(), Arc::new(QuoteBook::new()));

    assert_eq!(resolver.refresh(&gateway).await.unwrap(), 1);
    assert!(resolver.resolve(&infy_signal()).is_ok());

    gateway.fail.store(true, Ordering::SeqCst);
    assert!(resolver.refresh(&gateway).await.is_err());
    assert!(resolver.resolve(&infy_signal()).is_ok());
}

#[tokio::test]
async fn background_refresh_loads_catalog_and_stops_on_shutdown() {
    let gateway = Arc::new(CatalogGateway {
        fetches: AtomicUsize::new(0),
        fail: false.into(),
    });
    let resolver = Arc::new(InstrumentResolver::new(
        InstrumentConfig::default(),
        Arc::new(QuoteBook::new()),
    ));
    let (stop_tx, stop_rx) = watch::channel(false);

    let handle = Arc::clone(&resolver).spawn_refresh(gateway.clone(), stop_rx);

    // The first interval tick fires immediately.
    for _ in 0..50 {
        if resolver.resolve(&infy_signal()).is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(resolver.resolve(&infy_signal()).is_ok());
    // One fetch per configured exchange
    assert_eq!(gateway.fetches.load(Ordering::SeqCst), 2);

    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("refresh task stops")
        .unwrap();
}
