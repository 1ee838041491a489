use parking_lot::Mutex;
use tradeflow_core::{Greeks, GreeksLimits};

/// Aggregate options Greeks across open positions, behind the single
/// portfolio-level lock.
#[derive(Debug)]
pub struct PortfolioGreeks {
    limits: GreeksLimits,
    current: Mutex<Greeks>,
}

impl PortfolioGreeks {
    #[must_use]
    pub fn new(limits: GreeksLimits) -> Self {
        Self {
            limits,
            current: Mutex::new(Greeks::default()),
        }
    }

    #[must_use]
    pub fn current(&self) -> Greeks {
        *self.current.lock()
    }

    pub fn add(&self, exposure: Greeks) {
        *self.current.lock() += exposure;
    }

    pub fn remove(&self, exposure: Greeks) {
        let mut current = self.current.lock();
        *current = *current - exposure;
    }

    pub fn reset(&self) {
        *self.current.lock() = Greeks::default();
    }

    /// Largest `|greek| / limit` ratio of `exposure`, ignoring unlimited
    /// (zero) limits. Zero when nothing is limited.
    #[must_use]
    pub fn utilisation(&self, exposure: &Greeks) -> f64 {
        let pairs = [
            (exposure.delta, self.limits.delta),
            (exposure.gamma, self.limits.gamma),
            (exposure.theta, self.limits.theta),
            (exposure.vega, self.limits.vega),
        ];
        pairs
            .iter()
            .filter(|(_, limit)| *limit > 0.0)
            .map(|(value, limit)| value.abs() / limit)
            .filter(|ratio| ratio.is_finite())
            .fold(0.0, f64::max)
    }

    /// Names of the Greeks `exposure` would push past their limits.
    #[must_use]
    pub fn breaches(&self, exposure: &Greeks) -> Vec<&'static str> {
        let checks = [
            ("delta", exposure.delta, self.limits.delta),
            ("gamma", exposure.gamma, self.limits.gamma),
            ("theta", exposure.theta, self.limits.theta),
            ("vega", exposure.vega, self.limits.vega),
        ];
        checks
            .into_iter()
            .filter(|(_, value, limit)| *limit > 0.0 && value.abs() > *limit)
            .map(|(name, _, _)| name)
            .collect()
    }
}
