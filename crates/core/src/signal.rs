//! Raw strategy output and the canonical [`Signal`] it normalizes into.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::greeks::Greeks;
use crate::instrument::{InstrumentKind, OptionRight};
use crate::order::{OrderKey, Side};

/// Trading direction of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    /// Accepts both current (`BUY`/`SELL`) and legacy direction words.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BUY" | "LONG" | "BULLISH" | "UP" => Some(Self::Buy),
            "SELL" | "SHORT" | "BEARISH" | "DOWN" => Some(Self::Sell),
            _ => None,
        }
    }

    #[must_use]
    pub const fn side(self) -> Side {
        match self {
            Self::Buy => Side::Buy,
            Self::Sell => Side::Sell,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => f.write_str("BUY"),
            Self::Sell => f.write_str("SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalFlags {
    /// Adjusts an existing position (partial exit, stop move).
    pub management_action: bool,
    /// Closes an existing position.
    pub closing_action: bool,
}

/// What the strategy wants to trade, before resolution to a concrete
/// instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRequest {
    /// `None` means the plain equity.
    pub kind: Option<InstrumentKind>,
    pub option_right: Option<OptionRight>,
    /// Spot price of the underlying if the strategy supplied one.
    pub underlying_price: Option<Decimal>,
    /// Requested expiry token; the nearest listed expiry otherwise.
    pub expiry: Option<String>,
    /// Strike steps away from at-the-money (positive is further OTM).
    pub strike_offset: i32,
    /// Exact trading symbol, set on management signals so they hit the
    /// instrument that is already held.
    pub pinned_symbol: Option<String>,
}

/// Strategy output as it arrives on the wire. Both the current
/// (`action`, `strategy_name`, `confidence`) and the legacy
/// (`direction`, `strategy`, `quality_score`) field names are accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSignal {
    #[serde(default, alias = "signal_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub underlying: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub strategy_name: Option<String>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub entry_price: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub target: Option<Decimal>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub quantity_hint: Option<u32>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub management_action: Option<bool>,
    #[serde(default)]
    pub closing_action: Option<bool>,
    #[serde(default, alias = "instrument_type")]
    pub instrument: Option<String>,
    #[serde(default, alias = "option_type")]
    pub option_right: Option<String>,
    #[serde(default, alias = "spot_price")]
    pub underlying_price: Option<Decimal>,
    #[serde(default)]
    pub expiry: Option<String>,
    #[serde(default)]
    pub strike_offset: Option<i32>,
    #[serde(default)]
    pub tradingsymbol: Option<String>,
    /// Anything else the strategy attached (Greeks, indicator values).
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Canonical trading intent. Downstream components never look at which
/// schema the strategy used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub underlying: String,
    pub action: Action,
    pub strategy_name: String,
    /// Always within `[0, 10]`.
    pub confidence: f64,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub target: Option<Decimal>,
    /// Upper bound on quantity; zero means no bound.
    pub quantity_hint: u32,
    pub timestamp: DateTime<Utc>,
    pub flags: SignalFlags,
    pub instrument: InstrumentRequest,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Signal {
    /// Dedup key: at most one live order per (symbol, strategy).
    #[must_use]
    pub fn key(&self) -> OrderKey {
        OrderKey::new(&self.symbol, &self.strategy_name)
    }

    /// True for signals that manage or close an existing position.
    #[must_use]
    pub fn is_management(&self) -> bool {
        self.flags.management_action || self.flags.closing_action
    }

    #[must_use]
    pub fn side(&self) -> Side {
        self.action.side()
    }

    /// Greeks the strategy attached per unit, if any.
    #[must_use]
    pub fn greeks(&self) -> Greeks {
        let read = |name: &str| {
            self.metadata
                .get(name)
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0)
        };
        Greeks {
            delta: read("delta"),
            gamma: read("gamma"),
            theta: read("theta"),
            vega: read("vega"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_accepts_legacy_words() {
        assert_eq!(Action::parse("long"), Some(Action::Buy));
        assert_eq!(Action::parse(" SELL "), Some(Action::Sell));
        assert_eq!(Action::parse("Bearish"), Some(Action::Sell));
        assert_eq!(Action::parse("hold"), None);
    }

    #[test]
    fn raw_signal_collects_unknown_fields() {
        let raw: RawSignal = serde_json::from_str(
            r#"{"symbol":"NIFTY","action":"BUY","confidence":7,"entry_price":24500,
                "quantity":50,"delta":0.52,"rsi":61.2}"#,
        )
        .unwrap();
        assert_eq!(raw.symbol.as_deref(), Some("NIFTY"));
        assert!(raw.extra.contains_key("delta"));
        assert!(raw.extra.contains_key("rsi"));
        assert!(!raw.extra.contains_key("symbol"));
    }
}
