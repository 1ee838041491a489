use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tradeflow_core::{BrokerGateway, EventSink, PipelineConfig, QuoteBook, SignalNormalizer};
use tradeflow_execution::{CircuitBreaker, HardLimits, OrderExecutor, OrderRateLimiter};
use tradeflow_instruments::InstrumentResolver;
use tradeflow_positions::PositionManager;
use tradeflow_risk::{CapitalAllocator, PortfolioGreeks, RiskValidator};

/// Every pipeline component, built once from configuration.
pub struct TradingContext {
    pub config: PipelineConfig,
    pub gateway: Arc<dyn BrokerGateway>,
    pub sink: Arc<dyn EventSink>,
    pub quotes: Arc<QuoteBook>,
    pub normalizer: SignalNormalizer,
    pub validator: RiskValidator,
    pub allocator: CapitalAllocator,
    pub portfolio: PortfolioGreeks,
    pub resolver: Arc<InstrumentResolver>,
    pub limiter: OrderRateLimiter,
    pub executor: OrderExecutor,
    pub breaker: CircuitBreaker,
    pub hard_limits: HardLimits,
    pub positions: PositionManager,
}

impl TradingContext {
    /// # Errors
    /// Returns an error if the configuration fails validation.
    pub fn new(
        config: PipelineConfig,
        gateway: Arc<dyn BrokerGateway>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        Self::with_quotes(config, gateway, sink, Arc::new(QuoteBook::new()))
    }

    /// Builds the context around an existing quote book, e.g. one a paper
    /// gateway also prices from.
    ///
    /// # Errors
    /// Returns an error if the configuration fails validation.
    pub fn with_quotes(
        config: PipelineConfig,
        gateway: Arc<dyn BrokerGateway>,
        sink: Arc<dyn EventSink>,
        quotes: Arc<QuoteBook>,
    ) -> Result<Self> {
        config.validate().context("invalid pipeline configuration")?;

        let resolver = Arc::new(InstrumentResolver::new(
            config.instruments.clone(),
            Arc::clone(&quotes),
        ));
        let executor = OrderExecutor::new(
            Arc::clone(&gateway),
            Arc::clone(&quotes),
            Arc::clone(&sink),
            config.execution.clone(),
        );

        info!(
            strategies = config.capital.allocations.len(),
            total_capital = %config.capital.total_capital,
            degraded_mode = config.execution.degraded_mode,
            "Trading context initialised"
        );

        Ok(Self {
            normalizer: SignalNormalizer::new(),
            validator: RiskValidator::new(config.risk.clone(), config.session.clone()),
            allocator: CapitalAllocator::new(&config.capital),
            portfolio: PortfolioGreeks::new(config.risk.greeks_limits.clone()),
            limiter: OrderRateLimiter::new(&config.rate_limits),
            breaker: CircuitBreaker::new(&config.breaker),
            hard_limits: HardLimits::new(&config.limits),
            positions: PositionManager::new(config.positions.clone(), Arc::clone(&sink)),
            resolver,
            executor,
            quotes,
            gateway,
            sink,
            config,
        })
    }
}

impl std::fmt::Debug for TradingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingContext")
            .field("limiter", &self.limiter)
            .field("breaker", &self.breaker)
            .field("positions", &self.positions)
            .finish_non_exhaustive()
    }
}
