//! Broker circuit breaker.
//!
//! Opens after a run of consecutive broker failures and blocks new entries
//! for a cool-down. Once the cool-down expires the breaker is half-open: the
//! next order is let through, a success closes it and a failure re-opens it
//! immediately. An operator trip blocks until [`CircuitBreaker::reset`].

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};
use tradeflow_core::BreakerConfig;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CircuitBreakerError {
    #[error("paused after {failures} consecutive broker failures, {remaining_secs}s remaining")]
    Paused { failures: u32, remaining_secs: u64 },

    #[error("manually tripped")]
    ManuallyTripped,
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    pause_started: Option<Instant>,
    successful_orders: u32,
    failed_orders: u32,
    manually_tripped: bool,
}

// =============================================================================
// Circuit Breaker
// =============================================================================

pub struct CircuitBreaker {
    max_consecutive_failures: u32,
    pause_duration: Duration,
    state: RwLock<BreakerState>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("CircuitBreaker")
            .field("max_consecutive_failures", &self.max_consecutive_failures)
            .field("pause_duration", &self.pause_duration)
            .field("consecutive_failures", &state.consecutive_failures)
            .field("is_paused", &state.pause_started.is_some())
            .field("manually_tripped", &state.manually_tripped)
            .finish()
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            pause_duration: Duration::from_secs(config.pause_secs),
            state: RwLock::new(BreakerState::default()),
        }
    }

    #[must_use]
    pub fn with_pause_duration(mut self, duration: Duration) -> Self {
        self.pause_duration = duration;
        self
    }

    /// Checks whether a new order may be sent.
    ///
    /// # Errors
    ///
    /// [`CircuitBreakerError::ManuallyTripped`] after [`trip`](Self::trip),
    /// [`CircuitBreakerError::Paused`] during the cool-down.
    pub fn can_trade(&self) -> Result<(), CircuitBreakerError> {
        let state = self.state.read();

        if state.manually_tripped {
            return Err(CircuitBreakerError::ManuallyTripped);
        }

        if let Some(started) = state.pause_started {
            let elapsed = started.elapsed();
            if elapsed < self.pause_duration {
                return Err(CircuitBreakerError::Paused {
                    failures: state.consecutive_failures,
                    remaining_secs: (self.pause_duration - elapsed).as_secs(),
                });
            }
        }

        Ok(())
    }

    /// Records an order the broker accepted. Closes a half-open breaker.
    pub fn record_success(&self) {
        let mut state = self.state.write();
        state.successful_orders += 1;
        if state.pause_started.take().is_some() {
            info!(
                failures = state.consecutive_failures,
                "Circuit breaker closed after successful order"
            );
        }
        state.consecutive_failures = 0;
    }

    /// Records a broker failure (retries exhausted or unreachable).
    pub fn record_failure(&self) {
        let mut state = self.state.write();
        state.failed_orders += 1;
        state.consecutive_failures += 1;

        let half_open = state
            .pause_started
            .is_some_and(|started| started.elapsed() >= self.pause_duration);

        if state.consecutive_failures >= self.max_consecutive_failures
            && (state.pause_started.is_none() || half_open)
        {
            state.pause_started = Some(Instant::now());
            warn!(
                failures = state.consecutive_failures,
                max_failures = self.max_consecutive_failures,
                pause_secs = self.pause_duration.as_secs(),
                "Circuit breaker opened"
            );
        }
    }

    pub fn trip(&self) {
        self.state.write().manually_tripped = true;
        warn!("Circuit breaker manually tripped");
    }

    pub fn reset(&self) {
        let mut state = self.state.write();
        *state = BreakerState::default();
        info!("Circuit breaker reset");
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.can_trade().is_err()
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.state.read().consecutive_failures
    }

    #[must_use]
    pub fn remaining_pause(&self) -> Option<Duration> {
        let state = self.state.read();
        let started = state.pause_started?;
        self.pause_duration.checked_sub(started.elapsed()).filter(|d| !d.is_zero())
    }

    /// (successful, failed) orders since the last reset.
    #[must_use]
    pub fn counts(&self) -> (u32, u32) {
        let state = self.state.read();
        (state.successful_orders, state.failed_orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(pause: Duration) -> CircuitBreaker {
        CircuitBreaker::new(&BreakerConfig {
            max_consecutive_failures: 3,
            pause_secs: 0,
        })
        .with_pause_duration(pause)
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = breaker(Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert!(cb.can_trade().is_ok());

        cb.record_failure();
        match cb.can_trade() {
            Err(CircuitBreakerError::Paused { failures, .. }) => assert_eq!(failures, 3),
            other => panic!("expected pause, got {other:?}"),
        }
        assert!(cb.remaining_pause().is_some());
    }

    #[test]
    fn success_resets_the_failure_run() {
        let cb = breaker(Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert!(cb.can_trade().is_ok());
        assert_eq!(cb.consecutive_failures(), 1);
        assert_eq!(cb.counts(), (1, 3));
    }

    #[test]
    fn half_open_after_cool_down() {
        let cb = breaker(Duration::from_millis(20));
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(cb.is_open());

        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.can_trade().is_ok());

        // A failure while half-open re-opens straight away
        cb.record_failure();
        assert!(cb.is_open());

        std::thread::sleep(Duration::from_millis(30));
        cb.record_success();
        assert!(cb.can_trade().is_ok());
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn manual_trip_holds_until_reset() {
        let cb = breaker(Duration::from_millis(1));
        cb.trip();
        assert_eq!(cb.can_trade(), Err(CircuitBreakerError::ManuallyTripped));
        cb.reset();
        assert!(cb.can_trade().is_ok());
    }
}
