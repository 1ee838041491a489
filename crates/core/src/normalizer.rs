//! Structural validation of strategy output.
//!
//! No business rules live here: a signal that normalizes may still be
//! rejected by risk, capital or instrument checks further down.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::instrument::{InstrumentKind, OptionRight};
use crate::signal::{Action, InstrumentRequest, RawSignal, Signal, SignalFlags};

pub const MIN_CONFIDENCE: f64 = 0.0;
pub const MAX_CONFIDENCE: f64 = 10.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct SignalNormalizer;

impl SignalNormalizer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Parses and normalizes one JSON record.
    ///
    /// # Errors
    /// Returns [`ValidationError`] for malformed JSON or any structural
    /// problem reported by [`Self::normalize`].
    pub fn normalize_json(&self, json: &str) -> Result<Signal, ValidationError> {
        let raw: RawSignal =
            serde_json::from_str(json).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        self.normalize(raw)
    }

    /// Maps either signal schema onto one canonical [`Signal`], assigning an
    /// id and timestamp when the strategy left them out.
    ///
    /// # Errors
    /// Returns [`ValidationError`] if a required field is missing or out of
    /// range.
    pub fn normalize(&self, raw: RawSignal) -> Result<Signal, ValidationError> {
        let symbol = non_empty(raw.symbol).ok_or(ValidationError::MissingField("symbol"))?;

        let action_word = raw
            .action
            .or(raw.direction)
            .ok_or(ValidationError::MissingField("action"))?;
        let action = Action::parse(&action_word)
            .ok_or_else(|| ValidationError::InvalidAction(action_word.clone()))?;

        let strategy_name = non_empty(raw.strategy_name.or(raw.strategy))
            .ok_or(ValidationError::MissingField("strategy_name"))?;

        let confidence = raw
            .confidence
            .or(raw.quality_score)
            .ok_or(ValidationError::MissingField("confidence"))?;
        if !confidence.is_finite() || !(MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(confidence));
        }

        let entry_price = raw
            .entry_price
            .ok_or(ValidationError::MissingField("entry_price"))?;
        positive("entry_price", entry_price)?;
        if let Some(stop) = raw.stop_loss {
            positive("stop_loss", stop)?;
        }
        if let Some(target) = raw.target {
            positive("target", target)?;
        }

        let quantity_hint = raw
            .quantity_hint
            .or(raw.quantity)
            .ok_or(ValidationError::MissingField("quantity"))?;

        let kind = match raw.instrument.as_deref() {
            Some(value) => Some(InstrumentKind::parse(value).ok_or_else(|| {
                ValidationError::InvalidValue {
                    field: "instrument",
                    value: value.to_string(),
                }
            })?),
            None => None,
        };
        let option_right = match raw.option_right.as_deref() {
            Some(value) => Some(OptionRight::parse(value).ok_or_else(|| {
                ValidationError::InvalidValue {
                    field: "option_right",
                    value: value.to_string(),
                }
            })?),
            None => None,
        };
        // An explicit right implies an option even without `instrument`.
        let kind = kind.or(option_right.map(|_| InstrumentKind::Option));

        let id = non_empty(raw.id).unwrap_or_else(|| Uuid::new_v4().to_string());
        let underlying = non_empty(raw.underlying).unwrap_or_else(|| symbol.clone());

        let signal = Signal {
            id,
            underlying,
            action,
            strategy_name,
            confidence,
            entry_price,
            stop_loss: raw.stop_loss,
            target: raw.target,
            quantity_hint,
            timestamp: raw.timestamp.unwrap_or_else(Utc::now),
            flags: SignalFlags {
                management_action: raw.management_action.unwrap_or(false),
                closing_action: raw.closing_action.unwrap_or(false),
            },
            instrument: InstrumentRequest {
                kind,
                option_right,
                underlying_price: raw.underlying_price,
                expiry: non_empty(raw.expiry),
                strike_offset: raw.strike_offset.unwrap_or(0),
                pinned_symbol: non_empty(raw.tradingsymbol),
            },
            metadata: raw.extra,
            symbol,
        };

        debug!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            strategy = %signal.strategy_name,
            action = %signal.action,
            "Signal normalized"
        );
        Ok(signal)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn positive(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::InvalidValue {
            field,
            value: value.to_string(),
        })
    }
}
