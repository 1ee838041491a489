//! Per-order hard limits, checked after sizing and before any broker call.
//! These never depend on strategy, score, or capital: a bug upstream cannot
//! push an order past them.

use rust_decimal::Decimal;
use thiserror::Error;
use tradeflow_core::{HardLimitsConfig, Order, PipelineError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HardLimitError {
    #[error("order quantity is zero")]
    ZeroQuantity,

    #[error("order quantity {quantity} exceeds maximum {max}")]
    QuantityExceeded { quantity: u32, max: u32 },

    #[error("order notional {notional} exceeds maximum {max}")]
    NotionalExceeded { notional: Decimal, max: Decimal },
}

impl From<HardLimitError> for PipelineError {
    fn from(err: HardLimitError) -> Self {
        PipelineError::HardLimit(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct HardLimits {
    max_quantity: u32,
    max_notional: Decimal,
}

impl HardLimits {
    #[must_use]
    pub fn new(config: &HardLimitsConfig) -> Self {
        Self {
            max_quantity: config.max_order_quantity,
            max_notional: config.max_order_notional,
        }
    }

    /// # Errors
    ///
    /// The first limit `order` breaks.
    pub fn check(&self, order: &Order) -> Result<(), HardLimitError> {
        if order.quantity == 0 {
            return Err(HardLimitError::ZeroQuantity);
        }
        if order.quantity > self.max_quantity {
            return Err(HardLimitError::QuantityExceeded {
                quantity: order.quantity,
                max: self.max_quantity,
            });
        }
        let notional = order.notional();
        if notional > self.max_notional {
            return Err(HardLimitError::NotionalExceeded {
                notional,
                max: self.max_notional,
            });
        }
        Ok(())
    }
}
