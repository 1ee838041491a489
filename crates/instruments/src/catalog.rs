//! Immutable, indexed snapshot of the broker instrument catalog.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tradeflow_core::{Instrument, InstrumentKind, OptionRight};

/// All strikes listed for one expiry of one underlying.
#[derive(Debug, Clone)]
pub struct ExpirySeries {
    /// Broker-canonical token, used verbatim.
    pub token: String,
    pub date: Option<NaiveDate>,
    calls: BTreeMap<Decimal, Instrument>,
    puts: BTreeMap<Decimal, Instrument>,
}

impl ExpirySeries {
    fn new(token: String, date: Option<NaiveDate>) -> Self {
        Self {
            token,
            date,
            calls: BTreeMap::new(),
            puts: BTreeMap::new(),
        }
    }

    fn side(&self, right: OptionRight) -> &BTreeMap<Decimal, Instrument> {
        match right {
            OptionRight::Call => &self.calls,
            OptionRight::Put => &self.puts,
        }
    }

    /// The published strike ladder for `right`, ascending.
    pub fn ladder(&self, right: OptionRight) -> impl Iterator<Item = &Decimal> {
        self.side(right).keys()
    }

    #[must_use]
    pub fn contract(&self, right: OptionRight, strike: Decimal) -> Option<&Instrument> {
        self.side(right).get(&strike)
    }
}

#[derive(Debug)]
pub struct CatalogSnapshot {
    by_symbol: HashMap<String, Instrument>,
    /// Underlying to its option expiries, nearest first.
    chains: HashMap<String, Vec<ExpirySeries>>,
    /// Underlying to its futures, nearest first.
    futures: HashMap<String, Vec<Instrument>>,
    fetched_at: Instant,
}

impl CatalogSnapshot {
    /// Indexes a flat catalog listing.
    #[must_use]
    pub fn build(instruments: Vec<Instrument>) -> Self {
        let mut by_symbol = HashMap::with_capacity(instruments.len());
        let mut chains: HashMap<String, Vec<ExpirySeries>> = HashMap::new();
        let mut futures: HashMap<String, Vec<Instrument>> = HashMap::new();

        for inst in instruments {
            match inst.kind {
                InstrumentKind::Option => {
                    if let (Some(token), Some(strike), Some(right)) =
                        (inst.expiry_token.clone(), inst.strike, inst.option_right)
                    {
                        let series = chains
                            .entry(inst.underlying.to_ascii_uppercase())
                            .or_default();
                        let idx = match series.iter().position(|s| s.token == token) {
                            Some(idx) => idx,
                            None => {
                                series.push(ExpirySeries::new(token, inst.expiry));
                                series.len() - 1
                            }
                        };
                        let book = match right {
                            OptionRight::Call => &mut series[idx].calls,
                            OptionRight::Put => &mut series[idx].puts,
                        };
                        book.insert(strike, inst.clone());
                    }
                }
                InstrumentKind::Future => {
                    futures
                        .entry(inst.underlying.to_ascii_uppercase())
                        .or_default()
                        .push(inst.clone());
                }
                InstrumentKind::Equity => {}
            }
            by_symbol.insert(inst.symbol.to_ascii_uppercase(), inst);
        }

        // Undated entries sort last; the catalog order decides among them.
        for series in chains.values_mut() {
            series.sort_by_key(|s| (s.date.is_none(), s.date));
        }
        for list in futures.values_mut() {
            list.sort_by_key(|f| (f.expiry.is_none(), f.expiry));
        }

        Self {
            by_symbol,
            chains,
            futures,
            fetched_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&Instrument> {
        self.by_symbol.get(&symbol.to_ascii_uppercase())
    }

    /// Option expiries listed for `underlying`, nearest first.
    #[must_use]
    pub fn expiries(&self, underlying: &str) -> &[ExpirySeries] {
        self.chains
            .get(&underlying.to_ascii_uppercase())
            .map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn futures(&self, underlying: &str) -> &[Instrument] {
        self.futures
            .get(&underlying.to_ascii_uppercase())
            .map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn option(strike: Decimal, right: OptionRight, token: &str, date: NaiveDate) -> Instrument {
        Instrument {
            symbol: format!("NIFTY{token}{strike}{right}"),
            underlying: "NIFTY".into(),
            exchange: "NFO".into(),
            kind: InstrumentKind::Option,
            strike: Some(strike),
            option_right: Some(right),
            expiry_token: Some(token.into()),
            expiry: Some(date),
            lot_size: 25,
            tick_size: dec!(0.05),
        }
    }

    #[test]
    fn indexes_chains_by_expiry_and_right() {
        let near = NaiveDate::from_ymd_opt(2024, 10, 17).unwrap();
        let far = NaiveDate::from_ymd_opt(2024, 10, 24).unwrap();
        let snap = CatalogSnapshot::build(vec![
            option(dec!(24550), OptionRight::Call, "24O24", far),
            option(dec!(24500), OptionRight::Call, "24O17", near),
            option(dec!(24550), OptionRight::Call, "24O17", near),
            option(dec!(24500), OptionRight::Put, "24O17", near),
            Instrument::equity("INFY", "NSE"),
        ]);

        assert_eq!(snap.len(), 5);
        let expiries = snap.expiries("nifty");
        assert_eq!(expiries.len(), 2);
        assert_eq!(expiries[0].token, "24O17");
        let calls: Vec<_> = expiries[0].ladder(OptionRight::Call).copied().collect();
        assert_eq!(calls, vec![dec!(24500), dec!(24550)]);
        assert_eq!(expiries[0].ladder(OptionRight::Put).count(), 1);
        assert!(snap.get("infy").is_some());
        assert!(snap.expiries("BANKNIFTY").is_empty());
    }
}
