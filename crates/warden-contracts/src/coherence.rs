//! Coherence signals, privilege levels and per-agent coherence state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The privilege an agent currently holds.
///
/// Levels only move downward automatically. Moving up requires an explicit
/// reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrivilegeLevel {
    Full,
    Restricted,
    ReadOnly,
    Suspended,
}

impl PrivilegeLevel {
    /// Higher rank means more privilege.
    pub fn rank(self) -> u8 {
        match self {
            PrivilegeLevel::Full => 3,
            PrivilegeLevel::Restricted => 2,
            PrivilegeLevel::ReadOnly => 1,
            PrivilegeLevel::Suspended => 0,
        }
    }

    /// Return whichever of the two levels grants less privilege.
    pub fn most_restrictive(self, other: PrivilegeLevel) -> PrivilegeLevel {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrivilegeLevel::Full => "full",
            PrivilegeLevel::Restricted => "restricted",
            PrivilegeLevel::ReadOnly => "read-only",
            PrivilegeLevel::Suspended => "suspended",
        }
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A behavioral signal fed back into the coherence scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoherenceSignal {
    Violation,
    /// A violation severe enough to suspend the agent regardless of score.
    CriticalViolation,
    Rework,
    Drift,
}

impl CoherenceSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoherenceSignal::Violation => "violation",
            CoherenceSignal::CriticalViolation => "critical-violation",
            CoherenceSignal::Rework => "rework",
            CoherenceSignal::Drift => "drift",
        }
    }
}

impl fmt::Display for CoherenceSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trust state for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoherenceState {
    /// Always within `[0, 1]`.
    pub score: f64,
    pub violation_count: u64,
    pub rework_count: u64,
    pub drift_score: f64,
    pub privilege_level: PrivilegeLevel,
    pub last_updated: DateTime<Utc>,
}

impl CoherenceState {
    /// State of an agent that has never been penalized.
    pub fn pristine(at: DateTime<Utc>) -> Self {
        Self {
            score: 1.0,
            violation_count: 0,
            rework_count: 0,
            drift_score: 0.0,
            privilege_level: PrivilegeLevel::Full,
            last_updated: at,
        }
    }
}
