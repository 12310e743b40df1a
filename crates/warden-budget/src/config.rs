//! Budget limits, loaded from the `[budget]` section of the kernel TOML.
//!
//! ```toml
//! [tokens]
//! limit = 200000
//! cap = "hard"
//!
//! [cost_usd]
//! limit = 5000000   # micro-USD
//! cap = "soft"
//! ```
//!
//! A dimension without an entry is unmetered.

use std::path::Path;

use serde::{Deserialize, Serialize};

use warden_contracts::{
    budget::{BudgetDimension, CapKind},
    error::{WardenError, WardenResult},
};

/// Limit and enforcement mode for one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionLimit {
    pub limit: u64,
    #[serde(default)]
    pub cap: CapKind,
}

impl DimensionLimit {
    pub fn hard(limit: u64) -> Self {
        Self {
            limit,
            cap: CapKind::Hard,
        }
    }

    pub fn soft(limit: u64) -> Self {
        Self {
            limit,
            cap: CapKind::Soft,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub tokens: Option<DimensionLimit>,
    pub tool_calls: Option<DimensionLimit>,
    pub storage_bytes: Option<DimensionLimit>,
    pub wall_clock_ms: Option<DimensionLimit>,
    /// Micro-USD.
    pub cost_usd: Option<DimensionLimit>,
}

impl BudgetConfig {
    pub fn from_toml_str(s: &str) -> WardenResult<Self> {
        toml::from_str(s).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to parse budget TOML: {}", e),
        })
    }

    pub fn from_file(path: &Path) -> WardenResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to read budget config '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn limit_for(&self, dimension: BudgetDimension) -> Option<DimensionLimit> {
        match dimension {
            BudgetDimension::Tokens => self.tokens,
            BudgetDimension::ToolCalls => self.tool_calls,
            BudgetDimension::StorageBytes => self.storage_bytes,
            BudgetDimension::WallClockMs => self.wall_clock_ms,
            BudgetDimension::CostUsd => self.cost_usd,
        }
    }

    /// Builder used by tests and the demo.
    pub fn with_limit(mut self, dimension: BudgetDimension, limit: DimensionLimit) -> Self {
        let slot = match dimension {
            BudgetDimension::Tokens => &mut self.tokens,
            BudgetDimension::ToolCalls => &mut self.tool_calls,
            BudgetDimension::StorageBytes => &mut self.storage_bytes,
            BudgetDimension::WallClockMs => &mut self.wall_clock_ms,
            BudgetDimension::CostUsd => &mut self.cost_usd,
        };
        *slot = Some(limit);
        self
    }
}
