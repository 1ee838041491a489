//! Risk gating and capital allocation.
//!
//! [`RiskValidator`] is authoritative for go/no-go; [`CapitalAllocator`] is
//! authoritative for quantity.

pub mod allocator;
pub mod portfolio;
pub mod session;
pub mod validator;

pub use allocator::{CapitalAllocator, LedgerSnapshot, Reservation, SliceSnapshot};
pub use portfolio::PortfolioGreeks;
pub use session::{SessionGate, SessionWindow};
pub use validator::{RiskValidator, ScoreBreakdown};
