//! A fixed, in-process `CapabilitySource`.
//!
//! ```toml
//! [[default.grants]]
//! resource = "Read"
//!
//! [[tasks.refactor-42.grants]]
//! resource = "mcp__github__*"
//! rate_limit = { max_calls = 10, used = 0 }
//! ```

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use warden_contracts::{
    agent::TaskId,
    capability::{CapabilityGrant, CapabilitySet},
    error::{WardenError, WardenResult},
};

use crate::traits::CapabilitySource;

/// Grants per task, plus a default set for tasks without an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticCapabilities {
    pub default: CapabilitySet,
    pub tasks: BTreeMap<TaskId, CapabilitySet>,
}

impl StaticCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `resource` to every task that has no explicit entry.
    pub fn with_default(mut self, grant: CapabilityGrant) -> Self {
        self.default.grant(grant);
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>, grant: CapabilityGrant) -> Self {
        self.tasks
            .entry(TaskId::new(task_id))
            .or_default()
            .grant(grant);
        self
    }

    pub fn from_toml_str(s: &str) -> WardenResult<Self> {
        toml::from_str(s).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to parse grants TOML: {}", e),
        })
    }

    pub fn from_file(path: &Path) -> WardenResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to read grants file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }
}

impl CapabilitySource for StaticCapabilities {
    fn grants_for(&self, task_id: &TaskId) -> CapabilitySet {
        self.tasks
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}
