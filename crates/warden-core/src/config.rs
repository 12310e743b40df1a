//! Kernel configuration.
//!
//! ```toml
//! [coherence]
//! baseline = 1.0
//! [coherence.penalties]
//! violation = 0.15
//!
//! [budget.tokens]
//! limit = 200000
//!
//! [feedback]
//! deny_signal = "violation"
//! critical_gates = ["destructive"]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use warden_budget::BudgetConfig;
use warden_coherence::CoherenceConfig;
use warden_contracts::{
    coherence::CoherenceSignal,
    error::{WardenError, WardenResult},
};

/// How gate outcomes feed back into coherence.
///
/// Only the four gate verdicts count; context verdicts (budget, privilege)
/// never produce a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Signal recorded when any gate denies.
    pub deny_signal: CoherenceSignal,
    pub deny_magnitude: f64,
    /// Signal recorded when the strictest gate verdict is `warn`.
    pub warn_signal: CoherenceSignal,
    pub warn_magnitude: f64,
    /// Gates whose `deny` is recorded as a critical violation.
    pub critical_gates: Vec<String>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            deny_signal: CoherenceSignal::Violation,
            deny_magnitude: 1.0,
            warn_signal: CoherenceSignal::Drift,
            warn_magnitude: 1.0,
            critical_gates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub coherence: CoherenceConfig,
    pub budget: BudgetConfig,
    pub feedback: FeedbackConfig,
}

impl KernelConfig {
    pub fn from_toml_str(s: &str) -> WardenResult<Self> {
        let config: KernelConfig = toml::from_str(s).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to parse kernel TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> WardenResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to read kernel config '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> WardenResult<()> {
        self.coherence.validate()?;
        for (name, magnitude) in [
            ("deny_magnitude", self.feedback.deny_magnitude),
            ("warn_magnitude", self.feedback.warn_magnitude),
        ] {
            if !magnitude.is_finite() || magnitude < 0.0 {
                return Err(WardenError::ConfigError {
                    reason: format!("feedback.{} must be non-negative, got {}", name, magnitude),
                });
            }
        }
        Ok(())
    }
}
