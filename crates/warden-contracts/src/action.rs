//! Action requests submitted by agents for a decision.
//!
//! An `ActionRequest` is created once per attempted action and never
//! persisted directly. Only its summary reaches the ledger, via the envelope.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    agent::{AgentId, TaskId},
    budget::{BudgetDimension, Usage},
    error::{WardenError, WardenResult},
};

/// The kind of action an agent wants to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    ToolCall,
    MemoryWrite,
    Command,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ToolCall => "tool-call",
            ActionType::MemoryWrite => "memory-write",
            ActionType::Command => "command",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource name used for command actions that do not name a tool.
pub const SHELL_RESOURCE: &str = "shell";
/// Resource name used for memory writes that do not name a tool.
pub const MEMORY_RESOURCE: &str = "memory";

/// A proposed action, evaluated before it is allowed to execute.
///
/// `payload` is a JSON object. The kernel reads these keys when present:
/// `tool`, `command`, `diff {added, removed}`, `patch`, `old_string`,
/// `new_string`, `content`, `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub agent_id: AgentId,
    pub task_id: TaskId,
    pub action_type: ActionType,
    pub payload: Value,
    /// Resource usage the caller declares this action will consume.
    #[serde(default)]
    pub usage: Vec<Usage>,
    pub timestamp: DateTime<Utc>,
}

impl ActionRequest {
    /// Build a request stamped with the current time.
    pub fn new(
        agent_id: impl Into<String>,
        task_id: impl Into<String>,
        action_type: ActionType,
        payload: Value,
    ) -> Self {
        Self {
            agent_id: AgentId::new(agent_id),
            task_id: TaskId::new(task_id),
            action_type,
            payload,
            usage: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_usage(mut self, dimension: BudgetDimension, amount: u64) -> Self {
        self.usage.push(Usage::new(dimension, amount));
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Reject requests with missing or malformed required fields.
    ///
    /// Runs before any gate. A request that fails here is never treated as
    /// `allow`.
    pub fn validate(&self) -> WardenResult<()> {
        if self.agent_id.0.trim().is_empty() {
            return Err(invalid("agent_id must not be empty"));
        }
        if self.task_id.0.trim().is_empty() {
            return Err(invalid("task_id must not be empty"));
        }
        if !self.payload.is_object() {
            return Err(invalid("payload must be a JSON object"));
        }

        match self.action_type {
            ActionType::ToolCall => {
                if self.tool().is_none() {
                    return Err(invalid("tool-call payload requires a non-empty 'tool' string"));
                }
            }
            ActionType::Command => {
                if self.command().is_none() {
                    return Err(invalid(
                        "command payload requires a non-empty 'command' string",
                    ));
                }
            }
            ActionType::MemoryWrite => {
                if self.non_empty_str("key").is_none() {
                    return Err(invalid(
                        "memory-write payload requires a non-empty 'key' string",
                    ));
                }
            }
        }

        Ok(())
    }

    /// The tool named by the payload, if any.
    pub fn tool(&self) -> Option<&str> {
        self.non_empty_str("tool")
    }

    /// The shell command text, if any.
    pub fn command(&self) -> Option<&str> {
        self.non_empty_str("command")
    }

    /// The memory key written by a memory-write action.
    pub fn memory_key(&self) -> Option<&str> {
        self.non_empty_str("key")
    }

    /// The tool or resource the action needs a capability grant for.
    pub fn resource(&self) -> &str {
        match (self.tool(), self.action_type) {
            (Some(tool), _) => tool,
            (None, ActionType::Command) => SHELL_RESOURCE,
            (None, ActionType::MemoryWrite) => MEMORY_RESOURCE,
            (None, ActionType::ToolCall) => "",
        }
    }

    /// Every string leaf of the payload, newline-joined, for pattern scans.
    ///
    /// Object keys are visited in sorted order so the result is stable.
    pub fn scan_text(&self) -> String {
        let mut parts = Vec::new();
        collect_strings(&self.payload, &mut parts);
        parts.join("\n")
    }

    /// Byte length of the `content` field.
    pub fn content_bytes(&self) -> u64 {
        match self.payload.get("content") {
            Some(Value::String(s)) => s.len() as u64,
            Some(Value::Null) | None => 0,
            Some(other) => serde_json::to_vec(other).map(|b| b.len() as u64).unwrap_or(0),
        }
    }

    /// Resource usage this action consumes if it executes.
    ///
    /// Tool calls cost one tool call, memory writes cost their content
    /// length in storage bytes, and declared usage is added on top. Amounts
    /// for the same dimension are summed; the result is ordered by dimension.
    pub fn implied_usage(&self) -> Vec<Usage> {
        let mut totals = [0u64; BudgetDimension::ALL.len()];

        match self.action_type {
            ActionType::ToolCall => totals[BudgetDimension::ToolCalls.index()] += 1,
            ActionType::MemoryWrite => {
                totals[BudgetDimension::StorageBytes.index()] += self.content_bytes()
            }
            ActionType::Command => {}
        }
        for usage in &self.usage {
            let slot = &mut totals[usage.dimension.index()];
            *slot = slot.saturating_add(usage.amount);
        }

        BudgetDimension::ALL
            .iter()
            .zip(totals)
            .filter(|(_, amount)| *amount > 0)
            .map(|(d, amount)| Usage::new(*d, amount))
            .collect()
    }

    fn non_empty_str(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

fn invalid(reason: &str) -> WardenError {
    WardenError::RequestInvalid {
        reason: reason.to_string(),
    }
}

fn collect_strings<'v>(value: &'v Value, out: &mut Vec<&'v str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}
