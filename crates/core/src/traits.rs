use async_trait::async_trait;

use crate::error::BrokerError;
use crate::events::PipelineEvent;
use crate::instrument::Instrument;
use crate::order::{BrokerOrder, BrokerPosition, OrderRequest};

/// Broker connectivity. The wire protocol lives behind this seam.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Places an order and returns the broker order id.
    async fn place_order(&self, request: &OrderRequest) -> Result<String, BrokerError>;

    /// Looks up an order by the client order id attached at placement.
    /// `Ok(None)` means the broker never received it.
    async fn order_status(&self, client_order_id: &str) -> Result<Option<BrokerOrder>, BrokerError>;

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError>;

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    async fn get_orders(&self) -> Result<Vec<BrokerOrder>, BrokerError>;

    /// Every listed instrument on `exchange` (strikes, expiry tokens, lots).
    async fn get_instrument_catalog(&self, exchange: &str) -> Result<Vec<Instrument>, BrokerError>;
}

/// Receives audit events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &PipelineEvent);
}
