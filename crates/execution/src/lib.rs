pub mod circuit_breaker;
pub mod executor;
pub mod hard_limits;
pub mod paper;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError};
pub use executor::{ExecutionOutcome, OrderExecutor};
pub use hard_limits::{HardLimitError, HardLimits};
pub use paper::{PaperFault, PaperGateway};
pub use rate_limiter::{Admission, OrderRateLimiter};
