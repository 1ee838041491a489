//! JSON-lines input shared by `run` and `replay`.
//!
//! Each line is either a strategy signal (forwarded raw, so malformed
//! signals reach the pipeline and are audited as `VALIDATION_ERROR`) or a
//! price tick: an object with `price` and no `action`/`direction`.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tradeflow_core::{Instrument, PriceTick};

#[derive(Debug, Clone)]
pub enum FeedRecord {
    Signal(String),
    Tick(PriceTick),
}

#[derive(Deserialize)]
struct TickLine {
    symbol: String,
    price: Decimal,
    timestamp: Option<DateTime<Utc>>,
}

/// Parses one line. Blank lines and `#` comments yield `None`.
///
/// # Errors
/// Returns an error for lines that are not JSON objects or ticks missing a
/// symbol or price.
pub fn parse_line(line: &str) -> Result<Option<FeedRecord>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(line).context("feed line is not valid JSON")?;
    let Some(object) = value.as_object() else {
        anyhow::bail!("feed line is not a JSON object");
    };

    let is_tick = object.contains_key("price")
        && !object.contains_key("action")
        && !object.contains_key("direction");
    if !is_tick {
        return Ok(Some(FeedRecord::Signal(line.to_string())));
    }

    let tick: TickLine = serde_json::from_value(value).context("malformed tick")?;
    let mut record = PriceTick::new(tick.symbol, tick.price);
    if let Some(at) = tick.timestamp {
        record.timestamp = at;
    }
    Ok(Some(FeedRecord::Tick(record)))
}

/// Equity listings on `exchange` for every symbol the feed mentions.
pub fn equity_catalog(records: &[FeedRecord], exchange: &str) -> Vec<Instrument> {
    let symbols: BTreeSet<String> = records
        .iter()
        .filter_map(|record| match record {
            FeedRecord::Tick(tick) => Some(tick.symbol.clone()),
            FeedRecord::Signal(raw) => serde_json::from_str::<Value>(raw)
                .ok()?
                .get("symbol")?
                .as_str()
                .map(|s| s.trim().to_string()),
        })
        .filter(|s| !s.is_empty())
        .collect();
    symbols
        .into_iter()
        .map(|symbol| Instrument::equity(symbol, exchange))
        .collect()
}

/// Reads a JSON array of instruments.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn load_catalog(path: &std::path::Path) -> Result<Vec<Instrument>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse catalog {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signals_and_ticks_are_told_apart() {
        let signal = r#"{"symbol":"INFY","action":"BUY","price":1800,"confidence":7}"#;
        assert!(matches!(parse_line(signal).unwrap(), Some(FeedRecord::Signal(_))));

        let tick = r#"{"symbol":"INFY","price":1801.5,"timestamp":"2024-10-15T05:00:00Z"}"#;
        let Some(FeedRecord::Tick(tick)) = parse_line(tick).unwrap() else {
            panic!("expected a tick");
        };
        assert_eq!(tick.price, dec!(1801.5));
        assert_eq!(tick.timestamp.to_rfc3339(), "2024-10-15T05:00:00+00:00");
    }

    #[test]
    fn blanks_and_comments_are_skipped() {
        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line("# morning session").unwrap().is_none());
        assert!(parse_line("[1, 2]").is_err());
        assert!(parse_line(r#"{"price": 10}"#).is_err());
    }

    #[test]
    fn catalog_covers_every_symbol_once() {
        let records = vec![
            parse_line(r#"{"symbol":" INFY","action":"BUY","confidence":7}"#).unwrap().unwrap(),
            parse_line(r#"{"symbol":"INFY","price":1800}"#).unwrap().unwrap(),
            parse_line(r#"{"symbol":"TCS","direction":"SELL","confidence":7}"#).unwrap().unwrap(),
        ];
        let catalog = equity_catalog(&records, "NSE");
        let symbols: Vec<_> = catalog.iter().map(|i| i.symbol.as_str()).collect();
        assert_eq!(symbols, ["INFY", "TCS"]);
    }
}
