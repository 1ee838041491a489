use serde::{Deserialize, Serialize};

use crate::error::RejectReason;

/// Go/no-go verdict on a signal. Logged for audit, never retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub approved: bool,
    pub reason: Option<RejectReason>,
    /// Blended score in `[0, 100]`; higher is riskier.
    pub risk_score: f64,
    pub notes: Vec<String>,
}

impl RiskDecision {
    #[must_use]
    pub fn approve(risk_score: f64) -> Self {
        Self {
            approved: true,
            reason: None,
            risk_score: risk_score.clamp(0.0, 100.0),
            notes: Vec::new(),
        }
    }

    #[must_use]
    pub fn reject(reason: RejectReason, risk_score: f64) -> Self {
        Self {
            approved: false,
            reason: Some(reason),
            risk_score: risk_score.clamp(0.0, 100.0),
            notes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Reason code, or `APPROVED`.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        self.reason.map_or("APPROVED", RejectReason::as_str)
    }
}
