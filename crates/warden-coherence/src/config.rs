//! Coherence scheduler configuration.
//!
//! Thresholds, penalty weights and the recovery curve are configuration, not
//! constants. Loaded from the `[coherence]` section of the kernel TOML.
//!
//! ```toml
//! baseline = 1.0
//! recovery_half_life_secs = 3600.0
//!
//! [thresholds]
//! restricted = 0.8
//! read_only = 0.5
//! suspended = 0.2
//!
//! [penalties]
//! violation = 0.15
//! critical_violation = 1.0
//! rework = 0.05
//! drift = 0.02
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use warden_contracts::{
    coherence::{CoherenceSignal, PrivilegeLevel},
    error::{WardenError, WardenResult},
};

/// Gap kept below a threshold when recovery is capped at a band boundary.
const RECOVERY_MARGIN: f64 = 1e-9;

/// Score boundaries between privilege levels.
///
/// Must satisfy `1 >= restricted > read_only > suspended >= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub restricted: f64,
    pub read_only: f64,
    pub suspended: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            restricted: 0.8,
            read_only: 0.5,
            suspended: 0.2,
        }
    }
}

/// Score penalty per unit of magnitude for each signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Penalties {
    pub violation: f64,
    pub critical_violation: f64,
    pub rework: f64,
    pub drift: f64,
}

impl Default for Penalties {
    fn default() -> Self {
        Self {
            violation: 0.15,
            critical_violation: 1.0,
            rework: 0.05,
            drift: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoherenceConfig {
    pub thresholds: Thresholds,
    pub penalties: Penalties,
    /// Score that recovery decays toward and that a reset restores.
    pub baseline: f64,
    /// Time for half of the gap to `baseline` to recover. `None` disables
    /// recovery entirely.
    pub recovery_half_life_secs: Option<f64>,
}

impl Default for CoherenceConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            penalties: Penalties::default(),
            baseline: 1.0,
            recovery_half_life_secs: Some(3600.0),
        }
    }
}

impl CoherenceConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> WardenResult<Self> {
        let config: CoherenceConfig = toml::from_str(s).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to parse coherence TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> WardenResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to read coherence config '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> WardenResult<()> {
        let t = &self.thresholds;
        let ordered = t.restricted <= 1.0
            && t.restricted > t.read_only
            && t.read_only > t.suspended
            && t.suspended >= 0.0;
        if !ordered {
            return Err(config_error(format!(
                "thresholds must satisfy 1 >= restricted > read_only > suspended >= 0, got {} / {} / {}",
                t.restricted, t.read_only, t.suspended
            )));
        }

        let p = &self.penalties;
        for (name, weight) in [
            ("violation", p.violation),
            ("critical_violation", p.critical_violation),
            ("rework", p.rework),
            ("drift", p.drift),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(config_error(format!(
                    "penalty '{}' must be a finite non-negative number, got {}",
                    name, weight
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.baseline) {
            return Err(config_error(format!(
                "baseline must be within [0, 1], got {}",
                self.baseline
            )));
        }

        if let Some(half_life) = self.recovery_half_life_secs {
            if !half_life.is_finite() || half_life <= 0.0 {
                return Err(config_error(format!(
                    "recovery_half_life_secs must be positive, got {}",
                    half_life
                )));
            }
        }

        Ok(())
    }

    /// The privilege level a score maps to, before overrides.
    pub fn level_for(&self, score: f64) -> PrivilegeLevel {
        let t = &self.thresholds;
        if score >= t.restricted {
            PrivilegeLevel::Full
        } else if score >= t.read_only {
            PrivilegeLevel::Restricted
        } else if score >= t.suspended {
            PrivilegeLevel::ReadOnly
        } else {
            PrivilegeLevel::Suspended
        }
    }

    pub fn penalty(&self, signal: CoherenceSignal, magnitude: f64) -> f64 {
        let weight = match signal {
            CoherenceSignal::Violation => self.penalties.violation,
            CoherenceSignal::CriticalViolation => self.penalties.critical_violation,
            CoherenceSignal::Rework => self.penalties.rework,
            CoherenceSignal::Drift => self.penalties.drift,
        };
        weight * magnitude
    }

    /// Highest score recovery may reach while the agent holds `level`.
    ///
    /// Sits just below the threshold of the next level up, so recovery alone
    /// never maps to a higher level.
    pub fn band_ceiling(&self, level: PrivilegeLevel) -> f64 {
        let t = &self.thresholds;
        match level {
            PrivilegeLevel::Full => 1.0,
            PrivilegeLevel::Restricted => t.restricted - RECOVERY_MARGIN,
            PrivilegeLevel::ReadOnly => t.read_only - RECOVERY_MARGIN,
            PrivilegeLevel::Suspended => t.suspended - RECOVERY_MARGIN,
        }
    }
}

fn config_error(reason: String) -> WardenError {
    WardenError::ConfigError { reason }
}
