//! Position management.
//!
//! Tracks open positions per (symbol, strategy), marks them on every price
//! tick and trails their stops. Stops, targets and end-of-session flattening
//! produce closing signals that go back through the pipeline; nothing here
//! talks to the broker.

pub mod manager;
pub mod stops;
pub mod targets;
pub mod types;

pub use manager::PositionManager;
pub use types::{CloseReason, EntryFill, ExitAction, ExitFill};
