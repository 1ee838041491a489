//! Signal to concrete instrument resolution.
//!
//! Resolution only ever reads the cached catalog snapshot. The snapshot is
//! replaced wholesale by the background refresh task, so a resolve call
//! never waits on the network.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tradeflow_core::{
    Action, BrokerError, BrokerGateway, Instrument, InstrumentConfig, InstrumentKind, OptionRight,
    PipelineError, QuoteBook, RejectReason, Signal,
};

use crate::catalog::{CatalogSnapshot, ExpirySeries};
use crate::ladder::{atm_strike, nearest_strike, StrikeIntervals};

/// A resolved instrument and whether it came from an expired snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub instrument: Instrument,
    pub stale: bool,
}

pub struct InstrumentResolver {
    config: InstrumentConfig,
    intervals: StrikeIntervals,
    snapshot: RwLock<Option<Arc<CatalogSnapshot>>>,
    quotes: Arc<QuoteBook>,
}

impl InstrumentResolver {
    #[must_use]
    pub fn new(config: InstrumentConfig, quotes: Arc<QuoteBook>) -> Self {
        Self {
            intervals: StrikeIntervals::from_config(&config),
            config,
            snapshot: RwLock::new(None),
            quotes,
        }
    }

    /// Replaces the cached catalog.
    pub fn install(&self, instruments: Vec<Instrument>) -> usize {
        let snapshot = Arc::new(CatalogSnapshot::build(instruments));
        let count = snapshot.len();
        *self.snapshot.write() = Some(snapshot);
        count
    }

    fn current(&self) -> Option<Arc<CatalogSnapshot>> {
        self.snapshot.read().clone()
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.current()
            .map_or(true, |s| s.age() > Duration::from_secs(self.config.ttl_secs))
    }

    /// Fetches every configured exchange catalog and swaps in the new
    /// snapshot. On error the previous snapshot stays in place.
    ///
    /// # Errors
    /// Returns the first gateway error encountered.
    pub async fn refresh(&self, gateway: &dyn BrokerGateway) -> Result<usize, BrokerError> {
        let mut all = Vec::new();
        for exchange in &self.config.exchanges {
            let listing = gateway.get_instrument_catalog(exchange).await?;
            debug!(exchange = %exchange, count = listing.len(), "Fetched instrument catalog");
            all.extend(listing);
        }
        let count = self.install(all);
        info!(instruments = count, "Instrument catalog refreshed");
        Ok(count)
    }

    /// Runs [`Self::refresh`] every `refresh_interval_secs` until `shutdown`
    /// flips to true. Failures keep the last good snapshot.
    pub fn spawn_refresh(
        self: Arc<Self>,
        gateway: Arc<dyn BrokerGateway>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.refresh_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh(gateway.as_ref()).await {
                            warn!(
                                error = %e,
                                stale = self.is_stale(),
                                "Instrument catalog refresh failed"
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Instrument refresh task stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Resolves a signal to an exchange-valid instrument.
    ///
    /// # Errors
    /// Returns [`PipelineError::InstrumentNotFound`] with the specific reason
    /// when no valid instrument exists. There is no fallback to the equity
    /// when an option cannot be resolved.
    pub fn resolve(&self, signal: &Signal) -> Result<Resolved, PipelineError> {
        let snapshot = self.current().ok_or_else(|| {
            PipelineError::instrument_not_found(
                RejectReason::CatalogUnavailable,
                "no catalog loaded",
            )
        })?;
        let stale = snapshot.age() > Duration::from_secs(self.config.ttl_secs);
        if stale {
            warn!(
                symbol = %signal.symbol,
                age_secs = snapshot.age().as_secs(),
                "Resolving against stale catalog"
            );
        }

        let request = &signal.instrument;
        let instrument = if let Some(pinned) = &request.pinned_symbol {
            snapshot.get(pinned).cloned().ok_or_else(|| {
                PipelineError::instrument_not_found(
                    RejectReason::InstrumentNotListed,
                    pinned.clone(),
                )
            })?
        } else {
            match request.kind.unwrap_or(InstrumentKind::Equity) {
                InstrumentKind::Equity => snapshot
                    .get(&signal.symbol)
                    .filter(|i| i.kind == InstrumentKind::Equity)
                    .cloned()
                    .ok_or_else(|| {
                        PipelineError::instrument_not_found(
                            RejectReason::InstrumentNotListed,
                            signal.symbol.clone(),
                        )
                    })?,
                InstrumentKind::Future => self.resolve_future(&snapshot, signal)?,
                InstrumentKind::Option => self.resolve_option(&snapshot, signal)?,
            }
        };

        debug!(
            signal_id = %signal.id,
            instrument = %instrument.symbol,
            strike = ?instrument.strike,
            expiry = ?instrument.expiry_token,
            stale,
            "Instrument resolved"
        );
        Ok(Resolved { instrument, stale })
    }

    fn resolve_future(
        &self,
        snapshot: &CatalogSnapshot,
        signal: &Signal,
    ) -> Result<Instrument, PipelineError> {
        let listed = snapshot.futures(&signal.underlying);
        if listed.is_empty() {
            return Err(PipelineError::instrument_not_found(
                RejectReason::InstrumentNotListed,
                format!("no futures for {}", signal.underlying),
            ));
        }
        let today = signal.timestamp.date_naive();
        let chosen = match &signal.instrument.expiry {
            Some(token) => listed
                .iter()
                .find(|f| f.expiry_token.as_deref().is_some_and(|t| t.eq_ignore_ascii_case(token))),
            None => listed.iter().find(|f| f.expiry.map_or(true, |d| d >= today)),
        };
        chosen.cloned().ok_or_else(|| {
            PipelineError::instrument_not_found(
                RejectReason::ExpiryNotAvailable,
                format!("{} future", signal.underlying),
            )
        })
    }

    fn resolve_option(
        &self,
        snapshot: &CatalogSnapshot,
        signal: &Signal,
    ) -> Result<Instrument, PipelineError> {
        let request = &signal.instrument;
        let underlying = signal.underlying.as_str();

        let spot = request
            .underlying_price
            .or_else(|| self.quotes.last_price(underlying))
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| {
                PipelineError::instrument_not_found(
                    RejectReason::UnderlyingPriceUnavailable,
                    underlying.to_string(),
                )
            })?;

        let series = Self::select_expiry(snapshot, signal)?;

        let right = request.option_right.unwrap_or(match signal.action {
            Action::Buy => OptionRight::Call,
            Action::Sell => OptionRight::Put,
        });
        let target = self.target_strike(underlying, spot, right, request.strike_offset);

        let strike = nearest_strike(
            series.ladder(right),
            target,
            self.config.strike_tolerance_pct,
        )
        .ok_or_else(|| {
            PipelineError::instrument_not_found(
                RejectReason::StrikeNotAvailable,
                format!("{underlying} {target}{right} {}", series.token),
            )
        })?;

        series.contract(right, strike).cloned().ok_or_else(|| {
            PipelineError::instrument_not_found(
                RejectReason::StrikeNotAvailable,
                strike.to_string(),
            )
        })
    }

    /// ATM strike shifted by `offset` steps; positive offsets move out of
    /// the money for either right.
    #[must_use]
    pub fn target_strike(
        &self,
        underlying: &str,
        spot: Decimal,
        right: OptionRight,
        offset: i32,
    ) -> Decimal {
        let interval = self.intervals.interval(underlying, spot);
        let atm = atm_strike(spot, interval);
        let shift = interval * Decimal::from(offset);
        match right {
            OptionRight::Call => atm + shift,
            OptionRight::Put => atm - shift,
        }
    }

    /// Expiry tokens always come from the catalog. A requested token must
    /// be listed; otherwise the nearest expiry not before the signal date.
    fn select_expiry<'a>(
        snapshot: &'a CatalogSnapshot,
        signal: &Signal,
    ) -> Result<&'a ExpirySeries, PipelineError> {
        let expiries = snapshot.expiries(&signal.underlying);
        if expiries.is_empty() {
            return Err(PipelineError::instrument_not_found(
                RejectReason::InstrumentNotListed,
                format!("no options for {}", signal.underlying),
            ));
        }
        let today = signal.timestamp.date_naive();
        let found = match &signal.instrument.expiry {
            Some(token) => expiries.iter().find(|s| s.token.eq_ignore_ascii_case(token)),
            None => expiries.iter().find(|s| s.date.map_or(true, |d| d >= today)),
        };
        found.ok_or_else(|| {
            PipelineError::instrument_not_found(
                RejectReason::ExpiryNotAvailable,
                signal
                    .instrument
                    .expiry
                    .clone()
                    .unwrap_or_else(|| format!("no upcoming expiry for {}", signal.underlying)),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use tradeflow_core::{InstrumentRequest, SignalFlags};

    fn option(
        underlying: &str,
        strike: Decimal,
        right: OptionRight,
        token: &str,
        date: NaiveDate,
    ) -> Instrument {
        Instrument {
            symbol: format!("{underlying}{token}{strike}{right}"),
            underlying: underlying.into(),
            exchange: "NFO".into(),
            kind: InstrumentKind::Option,
            strike: Some(strike),
            option_right: Some(right),
            expiry_token: Some(token.into()),
            expiry: Some(date),
            lot_size: 50,
            tick_size: dec!(0.05),
        }
    }

    fn signal(symbol: &str, request: InstrumentRequest) -> Signal {
        Signal {
            id: "sig".into(),
            symbol: symbol.into(),
            underlying: symbol.into(),
            action: Action::Buy,
            strategy_name: "test".into(),
            confidence: 5.0,
            entry_price: dec!(100),
            stop_loss: None,
            target: None,
            quantity_hint: 0,
            timestamp: Utc.with_ymd_and_hms(2024, 10, 15, 5, 0, 0).unwrap(),
            flags: SignalFlags::default(),
            instrument: request,
            metadata: HashMap::new(),
        }
    }

    fn config() -> InstrumentConfig {
        let mut cfg = InstrumentConfig::default();
        // Unit interval so the spot price is the target strike.
        cfg.index_strike_intervals.insert("TEST".into(), dec!(1));
        cfg
    }

    fn resolver() -> InstrumentResolver {
        let expiry = NaiveDate::from_ymd_opt(2024, 10, 17).unwrap();
        let resolver = InstrumentResolver::new(config(), Arc::new(QuoteBook::new()));
        let mut listing: Vec<Instrument> = [90, 95, 100, 105]
            .into_iter()
            .map(|k| option("TEST", Decimal::from(k), OptionRight::Call, "E", expiry))
            .collect();
        listing.push(Instrument::equity("INFY", "NSE"));
        resolver.install(listing);
        resolver
    }

    fn option_request(spot: Decimal) -> InstrumentRequest {
        InstrumentRequest {
            kind: Some(InstrumentKind::Option),
            option_right: Some(OptionRight::Call),
            underlying_price: Some(spot),
            ..InstrumentRequest::default()
        }
    }

    fn reason(err: PipelineError) -> &'static str {
        err.reason_code()
    }

    #[test]
    fn target_98_resolves_to_listed_100() {
        let r = resolver();
        let resolved = r.resolve(&signal("TEST", option_request(dec!(98)))).unwrap();
        assert_eq!(resolved.instrument.strike, Some(dec!(100)));
        assert!(!resolved.stale);
    }

    #[test]
    fn target_outside_tolerance_fails_closed() {
        let r = resolver();
        let err = r.resolve(&signal("TEST", option_request(dec!(140)))).unwrap_err();
        assert_eq!(reason(err), "STRIKE_NOT_AVAILABLE");
    }

    #[test]
    fn unknown_expiry_token_is_rejected() {
        let r = resolver();
        let mut req = option_request(dec!(100));
        req.expiry = Some("24NOV".into());
        let err = r.resolve(&signal("TEST", req)).unwrap_err();
        assert_eq!(reason(err), "EXPIRY_NOT_AVAILABLE");
    }

    #[test]
    fn missing_underlying_price_is_rejected() {
        let r = resolver();
        let mut req = option_request(dec!(100));
        req.underlying_price = None;
        let err = r.resolve(&signal("TEST", req)).unwrap_err();
        assert_eq!(reason(err), "UNDERLYING_PRICE_UNAVAILABLE");
    }

    #[test]
    fn spot_from_quote_book_is_used() {
        let quotes = Arc::new(QuoteBook::new());
        quotes.update(tradeflow_core::PriceTick::new("TEST", dec!(96)));
        let r = InstrumentResolver::new(config(), quotes);
        let expiry = NaiveDate::from_ymd_opt(2024, 10, 17).unwrap();
        r.install(vec![option("TEST", dec!(95), OptionRight::Call, "E", expiry)]);
        let mut req = option_request(dec!(1));
        req.underlying_price = None;
        let resolved = r.resolve(&signal("TEST", req)).unwrap();
        assert_eq!(resolved.instrument.strike, Some(dec!(95)));
    }

    #[test]
    fn equity_must_be_listed() {
        let r = resolver();
        let ok = r.resolve(&signal("INFY", InstrumentRequest::default())).unwrap();
        assert_eq!(ok.instrument.kind, InstrumentKind::Equity);
        let err = r.resolve(&signal("WIPRO", InstrumentRequest::default())).unwrap_err();
        assert_eq!(reason(err), "INSTRUMENT_NOT_LISTED");
    }

    #[test]
    fn no_catalog_means_unavailable() {
        let r = InstrumentResolver::new(config(), Arc::new(QuoteBook::new()));
        let err = r.resolve(&signal("INFY", InstrumentRequest::default())).unwrap_err();
        assert_eq!(reason(err), "CATALOG_UNAVAILABLE");
        assert!(r.is_stale());
    }

    #[test]
    fn pinned_symbol_bypasses_strike_selection() {
        let r = resolver();
        let req = InstrumentRequest {
            kind: Some(InstrumentKind::Option),
            pinned_symbol: Some("TESTE105CE".into()),
            ..InstrumentRequest::default()
        };
        let resolved = r.resolve(&signal("TEST", req)).unwrap();
        assert_eq!(resolved.instrument.strike, Some(dec!(105)));
    }

    #[test]
    fn offsets_move_out_of_the_money() {
        let r = resolver();
        assert_eq!(
            r.target_strike("NIFTY", dec!(24512), OptionRight::Call, 2),
            dec!(24600)
        );
        assert_eq!(
            r.target_strike("NIFTY", dec!(24512), OptionRight::Put, 2),
            dec!(24400)
        );
    }
}
