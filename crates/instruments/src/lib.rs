//! Instrument catalog cache and resolution of signals to exchange-valid
//! instruments (equity, futures, and options by strike and expiry).

pub mod catalog;
pub mod ladder;
pub mod resolver;

pub use catalog::{CatalogSnapshot, ExpirySeries};
pub use ladder::{atm_strike, nearest_strike, StrikeIntervals};
pub use resolver::{InstrumentResolver, Resolved};
