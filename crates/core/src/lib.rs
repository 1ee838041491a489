pub mod config;
pub mod config_loader;
pub mod decision;
pub mod error;
pub mod events;
pub mod greeks;
pub mod instrument;
pub mod kelly;
pub mod normalizer;
pub mod order;
pub mod position;
pub mod quotes;
pub mod signal;
pub mod traits;

pub use config::{
    BreakerConfig, CapitalConfig, ExecutionConfig, GreeksLimits, HardLimitsConfig,
    InstrumentConfig, PipelineConfig, PositionConfig, RateLimitConfig, RiskConfig, RiskWeights,
    SessionConfig, StrikeBand,
};
pub use config_loader::ConfigLoader;
pub use decision::RiskDecision;
pub use error::{BrokerError, PipelineError, RejectReason, ValidationError};
pub use events::PipelineEvent;
pub use greeks::Greeks;
pub use instrument::{Instrument, InstrumentKind, OptionRight};
pub use kelly::TradeStats;
pub use normalizer::SignalNormalizer;
pub use order::{
    BrokerOrder, BrokerPosition, Fill, Order, OrderKey, OrderRequest, OrderState, OrderType, Side,
};
pub use position::{Position, PositionSide};
pub use quotes::{PriceTick, QuoteBook};
pub use signal::{Action, InstrumentRequest, RawSignal, Signal, SignalFlags};
pub use traits::{BrokerGateway, EventSink};
