use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One price update from the market data feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    pub fn new(symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp: Utc::now(),
        }
    }
}

/// Last known price per symbol.
#[derive(Debug, Default)]
pub struct QuoteBook {
    last: RwLock<HashMap<String, PriceTick>>,
}

impl QuoteBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the tick unless a newer one is already present.
    pub fn update(&self, tick: PriceTick) {
        let mut last = self.last.write();
        match last.get(&tick.symbol) {
            Some(existing) if existing.timestamp > tick.timestamp => {}
            _ => {
                last.insert(tick.symbol.clone(), tick);
            }
        }
    }

    #[must_use]
    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.last.read().get(symbol).map(|t| t.price)
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<PriceTick> {
        self.last.read().get(symbol).cloned()
    }
}
