use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Sub};

/// Options risk sensitivities. Aggregated across the portfolio in
/// position-weighted units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

impl Greeks {
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.delta == 0.0 && self.gamma == 0.0 && self.theta == 0.0 && self.vega == 0.0
    }
}

impl Add for Greeks {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            delta: self.delta + rhs.delta,
            gamma: self.gamma + rhs.gamma,
            theta: self.theta + rhs.theta,
            vega: self.vega + rhs.vega,
        }
    }
}

impl AddAssign for Greeks {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Greeks {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self + rhs * -1.0
    }
}

impl Mul<f64> for Greeks {
    type Output = Self;

    fn mul(self, k: f64) -> Self {
        Self {
            delta: self.delta * k,
            gamma: self.gamma * k,
            theta: self.theta * k,
            vega: self.vega * k,
        }
    }
}
