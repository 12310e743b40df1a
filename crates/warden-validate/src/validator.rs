//! `RequestValidator`: turns untrusted JSON into an `ActionRequest`.
//!
//! Validation runs in three phases, and every failure found is collected
//! before returning so callers see the full set in one pass:
//!
//! 1. **Structural**: the raw document against [`request_schema`].
//! 2. **Semantic**: the field rules of `ActionRequest::validate` (non-blank
//!    identifiers, the payload keys each action type requires).
//! 3. **Tool payloads**: tool-call payloads against any schema registered
//!    for that tool.
//!
//! A request that fails any phase never reaches a gate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use warden_contracts::{
    action::{ActionRequest, ActionType},
    agent::{AgentId, TaskId},
    budget::Usage,
    error::{WardenError, WardenResult},
};

use crate::schema::{request_schema, REQUEST_SCHEMA_RULE};

/// One problem found in a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub rule_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub failures: Vec<ValidationFailure>,
}

impl ValidationReport {
    fn from_failures(failures: Vec<ValidationFailure>) -> Self {
        Self {
            passed: failures.is_empty(),
            failures,
        }
    }

    /// `RequestInvalid` listing every failure, or `Ok` if none.
    pub fn into_result(self) -> WardenResult<()> {
        if self.passed {
            return Ok(());
        }
        let reason = self
            .failures
            .iter()
            .map(|f| format!("[{}] {}", f.rule_id, f.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(WardenError::RequestInvalid { reason })
    }
}

/// Wire form of a request, before stamping.
#[derive(Deserialize)]
struct RawRequest {
    agent_id: AgentId,
    task_id: TaskId,
    action_type: ActionType,
    payload: Value,
    #[serde(default)]
    usage: Vec<Usage>,
    timestamp: Option<DateTime<Utc>>,
}

impl RawRequest {
    fn stamp(self, now: DateTime<Utc>) -> ActionRequest {
        ActionRequest {
            agent_id: self.agent_id,
            task_id: self.task_id,
            action_type: self.action_type,
            payload: self.payload,
            usage: self.usage,
            timestamp: self.timestamp.unwrap_or(now),
        }
    }
}

pub struct RequestValidator {
    request: jsonschema::Validator,
    /// Payload schemas keyed by exact tool name.
    tools: HashMap<String, jsonschema::Validator>,
}

impl std::fmt::Debug for RequestValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tools: Vec<&String> = self.tools.keys().collect();
        tools.sort();
        f.debug_struct("RequestValidator")
            .field("tools", &tools)
            .finish_non_exhaustive()
    }
}

impl RequestValidator {
    pub fn new() -> WardenResult<Self> {
        Ok(Self {
            request: compile(&request_schema(), "request")?,
            tools: HashMap::new(),
        })
    }

    /// Require tool-call payloads for `tool` to satisfy `schema`.
    ///
    /// Registering the same tool twice replaces the previous schema.
    pub fn register_tool_schema(&mut self, tool: impl Into<String>, schema: &Value) -> WardenResult<()> {
        let tool = tool.into();
        let validator = compile(schema, &tool)?;
        self.tools.insert(tool, validator);
        Ok(())
    }

    /// Check `raw` without building a request.
    pub fn validate(&self, raw: &Value) -> ValidationReport {
        self.check(raw, Utc::now()).0
    }

    /// Validate `raw` and convert it. Requests without a timestamp get `now`.
    pub fn parse(&self, raw: &Value) -> WardenResult<ActionRequest> {
        let (report, request) = self.check(raw, Utc::now());
        if !report.passed {
            warn!(failures = report.failures.len(), "request rejected at the boundary");
        }
        report.into_result()?;
        request.ok_or_else(|| WardenError::RequestInvalid {
            reason: "request could not be decoded".to_string(),
        })
    }

    pub fn parse_str(&self, text: &str) -> WardenResult<ActionRequest> {
        let raw: Value = serde_json::from_str(text).map_err(|e| WardenError::RequestInvalid {
            reason: format!("malformed JSON: {}", e),
        })?;
        self.parse(&raw)
    }

    fn check(&self, raw: &Value, now: DateTime<Utc>) -> (ValidationReport, Option<ActionRequest>) {
        let mut failures = Vec::new();

        // ── Phase 1: structure ───────────────────────────────────────────────
        for error in self.request.iter_errors(raw) {
            failures.push(ValidationFailure {
                rule_id: REQUEST_SCHEMA_RULE.to_string(),
                message: format!("at '{}': {}", error.instance_path, error),
            });
        }
        if !failures.is_empty() {
            return (ValidationReport::from_failures(failures), None);
        }

        let request = match RawRequest::deserialize(raw) {
            Ok(wire) => wire.stamp(now),
            Err(e) => {
                failures.push(ValidationFailure {
                    rule_id: "request-decode".to_string(),
                    message: e.to_string(),
                });
                return (ValidationReport::from_failures(failures), None);
            }
        };

        // ── Phase 2: field rules ─────────────────────────────────────────────
        if let Err(WardenError::RequestInvalid { reason }) = request.validate() {
            failures.push(ValidationFailure {
                rule_id: "request-fields".to_string(),
                message: reason,
            });
        }

        // ── Phase 3: tool payloads ───────────────────────────────────────────
        if request.action_type == ActionType::ToolCall {
            let schema = request.tool().and_then(|tool| self.tools.get(tool).map(|v| (tool, v)));
            if let Some((tool, validator)) = schema {
                for error in validator.iter_errors(&request.payload) {
                    failures.push(ValidationFailure {
                        rule_id: format!("tool-schema:{}", tool),
                        message: format!("at '{}': {}", error.instance_path, error),
                    });
                }
            }
        }

        debug!(
            agent_id = %request.agent_id,
            passed = failures.is_empty(),
            failure_count = failures.len(),
            "request validated"
        );
        (ValidationReport::from_failures(failures), Some(request))
    }
}

fn compile(schema: &Value, name: &str) -> WardenResult<jsonschema::Validator> {
    jsonschema::validator_for(schema).map_err(|e| WardenError::ConfigError {
        reason: format!("invalid JSON Schema for '{}': {}", name, e),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use warden_contracts::budget::BudgetDimension;

    use super::*;

    fn validator() -> RequestValidator {
        RequestValidator::new().unwrap()
    }

    fn read_request() -> Value {
        json!({
            "agent_id": "agent-1",
            "task_id": "task-1",
            "action_type": "tool-call",
            "payload": { "tool": "Read", "file_path": "src/lib.rs" }
        })
    }

    // ── Structural ───────────────────────────────────────────────────────────

    #[test]
    fn well_formed_request_parses() {
        let raw = json!({
            "agent_id": "agent-1",
            "task_id": "task-1",
            "action_type": "command",
            "payload": { "command": "cargo fmt" },
            "usage": [{ "dimension": "tokens", "amount": 1200 }],
            "timestamp": "2026-05-01T12:00:00Z"
        });
        let request = validator().parse(&raw).unwrap();

        assert_eq!(request.action_type, ActionType::Command);
        assert_eq!(request.usage, vec![Usage::new(BudgetDimension::Tokens, 1200)]);
        assert_eq!(
            request.timestamp,
            Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn missing_timestamp_is_stamped() {
        let before = Utc::now();
        let request = validator().parse(&read_request()).unwrap();
        assert!(request.timestamp >= before);
    }

    #[test]
    fn every_structural_failure_is_reported() {
        let raw = json!({
            "agent_id": "",
            "action_type": "launch-missiles",
            "payload": "rm -rf /",
            "priority": 1
        });
        let report = validator().validate(&raw);

        assert!(!report.passed);
        assert!(report.failures.len() >= 4, "failures: {:?}", report.failures);
        assert!(report.failures.iter().all(|f| f.rule_id == REQUEST_SCHEMA_RULE));
    }

    #[test]
    fn negative_usage_is_rejected() {
        let mut raw = read_request();
        raw["usage"] = json!([{ "dimension": "cost-usd", "amount": -5 }]);
        let report = validator().validate(&raw);
        assert!(!report.passed);
        assert!(report.failures[0].message.contains("/usage/0/amount"));
    }

    // ── Field rules ──────────────────────────────────────────────────────────

    #[test]
    fn tool_call_without_tool_fails_field_rules() {
        let mut raw = read_request();
        raw["payload"] = json!({ "file_path": "x" });
        let report = validator().validate(&raw);

        assert!(!report.passed);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].rule_id, "request-fields");
        assert!(report.failures[0].message.contains("tool"));
    }

    #[test]
    fn blank_agent_id_fails_field_rules() {
        let mut raw = read_request();
        raw["agent_id"] = json!("   ");
        let report = validator().validate(&raw);
        assert_eq!(report.failures[0].rule_id, "request-fields");
    }

    // ── Tool payload schemas ─────────────────────────────────────────────────

    #[test]
    fn registered_tool_schema_is_enforced() {
        let mut validator = validator();
        validator
            .register_tool_schema(
                "Read",
                &json!({
                    "type": "object",
                    "required": ["file_path"],
                    "properties": { "file_path": { "type": "string" } }
                }),
            )
            .unwrap();

        assert!(validator.validate(&read_request()).passed);

        let mut raw = read_request();
        raw["payload"] = json!({ "tool": "Read", "file_path": 7 });
        let report = validator.validate(&raw);
        assert!(!report.passed);
        assert_eq!(report.failures[0].rule_id, "tool-schema:Read");

        // other tools are unaffected
        raw["payload"] = json!({ "tool": "Grep", "file_path": 7 });
        assert!(validator.validate(&raw).passed);
    }

    #[test]
    fn invalid_tool_schema_is_a_config_error() {
        let mut validator = validator();
        let result = validator.register_tool_schema("Read", &json!({ "type": "no-such-type" }));
        assert!(matches!(result, Err(WardenError::ConfigError { .. })));
    }

    // ── Errors ───────────────────────────────────────────────────────────────

    #[test]
    fn parse_folds_failures_into_request_invalid() {
        let raw = json!({ "agent_id": "a", "task_id": "t", "action_type": "command", "payload": {} });
        match validator().parse(&raw) {
            Err(WardenError::RequestInvalid { reason }) => {
                assert!(reason.contains("[request-fields]"), "reason: {reason}")
            }
            other => panic!("expected RequestInvalid, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_request_invalid() {
        assert!(matches!(
            validator().parse_str("{\"agent_id\": "),
            Err(WardenError::RequestInvalid { .. })
        ));
    }

    #[test]
    fn unparseable_timestamp_is_reported() {
        let mut raw = read_request();
        raw["timestamp"] = json!("yesterday");
        let report = validator().validate(&raw);
        assert!(!report.passed);
        assert_eq!(report.failures[0].rule_id, "request-decode");
    }
}
