//! # warden-contracts
//!
//! Shared types, the envelope format, and the error contract for the WARDEN
//! decision-and-audit kernel.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions, request validation and error types.

pub mod action;
pub mod agent;
pub mod budget;
pub mod capability;
pub mod coherence;
pub mod envelope;
pub mod error;
pub mod verdict;

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use action::{ActionRequest, ActionType};
    use budget::{BudgetDimension, BudgetState, CapKind, Usage};
    use capability::{CapabilityGrant, CapabilitySet};
    use coherence::PrivilegeLevel;
    use envelope::Effect;
    use error::WardenError;
    use verdict::{Decision, Evaluation, GateVerdict};

    // ── ActionRequest validation ─────────────────────────────────────────────

    #[test]
    fn tool_call_without_tool_is_invalid() {
        let request = ActionRequest::new("agent-1", "task-1", ActionType::ToolCall, json!({}));
        match request.validate() {
            Err(WardenError::RequestInvalid { reason }) => assert!(reason.contains("tool")),
            other => panic!("expected RequestInvalid, got {:?}", other),
        }
    }

    #[test]
    fn empty_agent_id_is_invalid() {
        let request =
            ActionRequest::new("  ", "task-1", ActionType::Command, json!({ "command": "ls" }));
        assert!(matches!(
            request.validate(),
            Err(WardenError::RequestInvalid { .. })
        ));
    }

    #[test]
    fn non_object_payload_is_invalid() {
        let request = ActionRequest::new("a", "t", ActionType::Command, json!("ls"));
        assert!(request.validate().is_err());
    }

    #[test]
    fn well_formed_requests_validate() {
        let cmd = ActionRequest::new("a", "t", ActionType::Command, json!({ "command": "ls" }));
        let tool = ActionRequest::new("a", "t", ActionType::ToolCall, json!({ "tool": "Read" }));
        let mem = ActionRequest::new(
            "a",
            "t",
            ActionType::MemoryWrite,
            json!({ "key": "notes", "content": "hi" }),
        );
        assert!(cmd.validate().is_ok());
        assert!(tool.validate().is_ok());
        assert!(mem.validate().is_ok());
    }

    #[test]
    fn resource_defaults_by_action_type() {
        let cmd = ActionRequest::new("a", "t", ActionType::Command, json!({ "command": "ls" }));
        let mem = ActionRequest::new("a", "t", ActionType::MemoryWrite, json!({ "key": "k" }));
        let tool = ActionRequest::new("a", "t", ActionType::ToolCall, json!({ "tool": "Edit" }));
        assert_eq!(cmd.resource(), action::SHELL_RESOURCE);
        assert_eq!(mem.resource(), action::MEMORY_RESOURCE);
        assert_eq!(tool.resource(), "Edit");
    }

    #[test]
    fn scan_text_collects_nested_strings() {
        let request = ActionRequest::new(
            "a",
            "t",
            ActionType::ToolCall,
            json!({ "tool": "Bash", "args": { "argv": ["rm", "-rf"], "n": 3 } }),
        );
        let text = request.scan_text();
        assert!(text.contains("Bash"));
        assert!(text.contains("rm"));
        assert!(text.contains("-rf"));
    }

    // ── Implied usage ────────────────────────────────────────────────────────

    #[test]
    fn implied_usage_sums_declared_and_intrinsic_costs() {
        let request = ActionRequest::new("a", "t", ActionType::ToolCall, json!({ "tool": "Read" }))
            .with_usage(BudgetDimension::Tokens, 100)
            .with_usage(BudgetDimension::Tokens, 20)
            .with_usage(BudgetDimension::ToolCalls, 1);

        let usage = request.implied_usage();
        assert_eq!(
            usage,
            vec![
                Usage::new(BudgetDimension::Tokens, 120),
                Usage::new(BudgetDimension::ToolCalls, 2),
            ]
        );
    }

    #[test]
    fn memory_write_consumes_storage_bytes() {
        let request = ActionRequest::new(
            "a",
            "t",
            ActionType::MemoryWrite,
            json!({ "key": "k", "content": "12345" }),
        );
        assert_eq!(
            request.implied_usage(),
            vec![Usage::new(BudgetDimension::StorageBytes, 5)]
        );
    }

    // ── Capabilities ─────────────────────────────────────────────────────────

    #[test]
    fn exact_grant_wins_over_pattern() {
        let caps = CapabilitySet::default()
            .with(CapabilityGrant::new("mcp__*"))
            .with(CapabilityGrant::new("mcp__github__create_pr").with_rate_limit(5, 1));

        let found = caps.find("mcp__github__create_pr").unwrap();
        assert!(found.rate_limit.is_some());
        assert_eq!(caps.find("mcp__slack__post").unwrap().resource, "mcp__*");
        assert!(caps.find("Write").is_none());
    }

    #[test]
    fn star_grant_matches_everything() {
        let caps = CapabilitySet::default().with(CapabilityGrant::new("*"));
        assert!(caps.has("Write"));
        assert!(caps.has("shell"));
    }

    // ── Decisions ────────────────────────────────────────────────────────────

    #[test]
    fn strictest_wins_ordering() {
        assert_eq!(Decision::Allow.strictest(Decision::Warn), Decision::Warn);
        assert_eq!(Decision::Deny.strictest(Decision::Warn), Decision::Deny);
        assert_eq!(Decision::Allow.strictest(Decision::Allow), Decision::Allow);
    }

    #[test]
    fn evaluation_aggregates_context_and_gates() {
        let evaluation = Evaluation::aggregate(
            vec![GateVerdict::allow("a", "ok"), GateVerdict::warn("b", "close")],
            vec![GateVerdict::deny("privilege", "suspended")],
        );
        assert_eq!(evaluation.decision, Decision::Deny);
        assert_eq!(evaluation.gate_decision(), Decision::Warn);
        assert_eq!(evaluation.reasons(), vec!["[privilege] suspended".to_string()]);
    }

    #[test]
    fn decision_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&Decision::Deny).unwrap(), "\"deny\"");
        assert_eq!(
            serde_json::to_string(&PrivilegeLevel::ReadOnly).unwrap(),
            "\"read-only\""
        );
    }

    // ── Budget state ─────────────────────────────────────────────────────────

    #[test]
    fn budget_state_exceeded_at_limit() {
        let state = BudgetState {
            dimension: BudgetDimension::Tokens,
            limit: Some(10),
            consumed: 10,
            cap: CapKind::Hard,
        };
        assert!(state.exceeded());
        assert_eq!(state.remaining(), 0);
        assert!(state.would_overflow(1));
        assert!(!BudgetState::unlimited(BudgetDimension::Tokens).exceeded());
    }

    // ── Privilege ordering ───────────────────────────────────────────────────

    #[test]
    fn most_restrictive_picks_lower_rank() {
        assert_eq!(
            PrivilegeLevel::Full.most_restrictive(PrivilegeLevel::ReadOnly),
            PrivilegeLevel::ReadOnly
        );
        assert_eq!(
            PrivilegeLevel::Suspended.most_restrictive(PrivilegeLevel::Restricted),
            PrivilegeLevel::Suspended
        );
    }

    // ── Effects ──────────────────────────────────────────────────────────────

    #[test]
    fn effect_is_internally_tagged() {
        let effect = Effect::Usage {
            dimension: BudgetDimension::CostUsd,
            amount: 1_500,
        };
        let value = serde_json::to_value(&effect).unwrap();
        assert_eq!(value["effect"], "usage");
        assert_eq!(value["dimension"], "cost-usd");
    }

    // ── WardenError display messages ─────────────────────────────────────────

    #[test]
    fn error_write_failed_display() {
        let err = WardenError::WriteFailed {
            attempts: 3,
            reason: "disk full".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn error_integrity_violation_display() {
        let err = WardenError::IntegrityViolation {
            sequence: 7,
            reason: "hash mismatch".to_string(),
        };
        assert!(err.to_string().contains("sequence 7"));
    }
}
