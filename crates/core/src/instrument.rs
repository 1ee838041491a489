//! Exchange instruments as published by the broker's instrument catalog.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstrumentKind {
    Equity,
    Option,
    Future,
}

impl InstrumentKind {
    /// Parses catalog and signal spellings ("EQ", "OPT", "CE", "FUT", ...).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "EQUITY" | "EQ" | "STOCK" => Some(Self::Equity),
            "OPTION" | "OPT" | "OPTIONS" | "CE" | "PE" => Some(Self::Option),
            "FUTURE" | "FUT" | "FUTURES" => Some(Self::Future),
            _ => None,
        }
    }
}

/// Call or put. Displays as the NSE suffix (`CE`/`PE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionRight {
    #[serde(rename = "CE", alias = "CALL")]
    Call,
    #[serde(rename = "PE", alias = "PUT")]
    Put,
}

impl OptionRight {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CE" | "CALL" | "C" => Some(Self::Call),
            "PE" | "PUT" | "P" => Some(Self::Put),
            _ => None,
        }
    }
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => f.write_str("CE"),
            Self::Put => f.write_str("PE"),
        }
    }
}

/// A concrete, exchange-valid tradable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Broker trading symbol (e.g. `NIFTY24OCT24500CE`).
    pub symbol: String,
    pub underlying: String,
    pub exchange: String,
    pub kind: InstrumentKind,
    #[serde(default)]
    pub strike: Option<Decimal>,
    #[serde(default)]
    pub option_right: Option<OptionRight>,
    /// Broker-canonical expiry string, used verbatim.
    #[serde(default)]
    pub expiry_token: Option<String>,
    /// Calendar date of the expiry as published by the catalog; used only
    /// to order tokens.
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    pub lot_size: u32,
    pub tick_size: Decimal,
}

impl Instrument {
    /// Builds a plain cash-segment equity instrument.
    pub fn equity(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        let symbol = symbol.into();
        Self {
            underlying: symbol.clone(),
            symbol,
            exchange: exchange.into(),
            kind: InstrumentKind::Equity,
            strike: None,
            option_right: None,
            expiry_token: None,
            expiry: None,
            lot_size: 1,
            tick_size: Decimal::new(5, 2),
        }
    }

    #[must_use]
    pub fn is_option(&self) -> bool {
        self.kind == InstrumentKind::Option
    }

    /// Rounds a price down to the instrument's tick.
    #[must_use]
    pub fn round_to_tick(&self, price: Decimal) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return price;
        }
        (price / self.tick_size).floor() * self.tick_size
    }

    /// Rounds a quantity down to whole lots.
    #[must_use]
    pub fn round_to_lot(&self, quantity: u32) -> u32 {
        let lot = self.lot_size.max(1);
        quantity - quantity % lot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parse_kind_and_right() {
        assert_eq!(InstrumentKind::parse("opt"), Some(InstrumentKind::Option));
        assert_eq!(InstrumentKind::parse("EQ"), Some(InstrumentKind::Equity));
        assert_eq!(InstrumentKind::parse("swap"), None);
        assert_eq!(OptionRight::parse("put"), Some(OptionRight::Put));
        assert_eq!(OptionRight::Call.to_string(), "CE");
    }

    #[test]
    fn rounding_to_tick_and_lot() {
        let mut inst = Instrument::equity("RELIANCE", "NSE");
        assert_eq!(inst.round_to_tick(dec!(2451.37)), dec!(2451.35));
        inst.lot_size = 50;
        assert_eq!(inst.round_to_lot(149), 100);
        assert_eq!(inst.round_to_lot(49), 0);
    }
}
