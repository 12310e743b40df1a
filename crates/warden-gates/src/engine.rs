//! The gate evaluator.
//!
//! `GateEvaluator` compiles a `GateConfig` once and then evaluates requests
//! as a pure function of its inputs:
//!
//! 1. Validate the request; malformed requests are an error, never `allow`.
//! 2. Run all four gates. Every gate runs, whatever the others decide.
//! 3. Derive the `budget` and `privilege` context verdicts from the caller's
//!    coherence and budget views.
//! 4. Fold everything into one decision, strictest wins.

use std::{collections::BTreeSet, path::Path};

use serde_json::json;
use tracing::debug;

use warden_contracts::{
    action::{ActionRequest, ActionType},
    budget::{BudgetSnapshot, CapKind},
    capability::CapabilitySet,
    coherence::{CoherenceState, PrivilegeLevel},
    error::{WardenError, WardenResult},
    verdict::{Evaluation, GateVerdict},
};

use crate::{
    config::GateConfig,
    gates::{AllowlistGate, DestructiveGate, DiffGate, Gate, GateContext, SecretGate},
};

pub const BUDGET: &str = "budget";
pub const PRIVILEGE: &str = "privilege";

#[derive(Debug)]
pub struct GateEvaluator {
    gates: Vec<Gate>,
    read_only_tools: BTreeSet<String>,
    edit_tools: BTreeSet<String>,
}

impl GateEvaluator {
    /// Compile `config`, rejecting invalid patterns and thresholds.
    pub fn from_config(config: &GateConfig) -> WardenResult<Self> {
        validate(config)?;

        Ok(Self {
            gates: vec![
                Gate::Destructive(DestructiveGate::new(&config.destructive)?),
                Gate::ToolAllowlist(AllowlistGate::new(&config.allowlist)),
                Gate::DiffSize(DiffGate::new(&config.diff)),
                Gate::SecretDetection(SecretGate::new(&config.secrets)?),
            ],
            read_only_tools: config.read_only_tools.iter().cloned().collect(),
            edit_tools: config.edit_tools.iter().cloned().collect(),
        })
    }

    /// Built-in signatures and thresholds.
    pub fn with_defaults() -> WardenResult<Self> {
        Self::from_config(&GateConfig::default())
    }

    /// Returns `WardenError::ConfigError` if the TOML is malformed or any
    /// pattern fails to compile.
    pub fn from_toml_str(s: &str) -> WardenResult<Self> {
        let config: GateConfig = toml::from_str(s).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to parse gate TOML: {}", e),
        })?;
        Self::from_config(&config)
    }

    pub fn from_file(path: &Path) -> WardenResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to read gate config '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Gate names in evaluation order.
    pub fn gate_names(&self) -> Vec<&'static str> {
        self.gates.iter().map(Gate::name).collect()
    }

    /// Evaluate one request against every gate and the caller's context.
    ///
    /// Holds no state and mutates nothing.
    pub fn evaluate(
        &self,
        request: &ActionRequest,
        coherence: &CoherenceState,
        budget: &BudgetSnapshot,
        capabilities: &CapabilitySet,
    ) -> WardenResult<Evaluation> {
        request.validate()?;

        let ctx = GateContext::new(request, capabilities, self.is_edit_action(request));
        let verdicts: Vec<GateVerdict> = self.gates.iter().map(|gate| gate.check(&ctx)).collect();

        let context = vec![
            budget_verdict(request, budget),
            privilege_verdict(self.is_read_action(request), coherence.privilege_level),
        ];

        let evaluation = Evaluation::aggregate(verdicts, context);
        debug!(
            agent_id = %request.agent_id,
            action_type = %request.action_type,
            resource = %request.resource(),
            decision = %evaluation.decision,
            "request evaluated"
        );
        Ok(evaluation)
    }

    /// Tool calls to a configured read-only tool.
    pub fn is_read_action(&self, request: &ActionRequest) -> bool {
        request.action_type == ActionType::ToolCall
            && request
                .tool()
                .is_some_and(|tool| self.read_only_tools.contains(tool))
    }

    /// Tool calls to a configured edit tool, or any payload carrying a diff.
    pub fn is_edit_action(&self, request: &ActionRequest) -> bool {
        let edit_tool = request.action_type == ActionType::ToolCall
            && request
                .tool()
                .is_some_and(|tool| self.edit_tools.contains(tool));
        edit_tool || request.payload.get("diff").is_some() || request.payload.get("patch").is_some()
    }
}

fn validate(config: &GateConfig) -> WardenResult<()> {
    if config.diff.warn_lines > config.diff.max_lines {
        return Err(WardenError::ConfigError {
            reason: format!(
                "diff.warn_lines ({}) must not exceed diff.max_lines ({})",
                config.diff.warn_lines, config.diff.max_lines
            ),
        });
    }
    let warn = config.allowlist.warn_utilization;
    if !(warn > 0.0 && warn <= 1.0) {
        return Err(WardenError::ConfigError {
            reason: format!("allowlist.warn_utilization must be in (0, 1], got {}", warn),
        });
    }
    let entropy = config.secrets.entropy_threshold;
    if !entropy.is_finite() || entropy <= 0.0 {
        return Err(WardenError::ConfigError {
            reason: format!("secrets.entropy_threshold must be positive, got {}", entropy),
        });
    }
    // A string of n chars carries at most log2(n) bits per char.
    let min_len = config.secrets.min_token_length;
    if (min_len.max(1) as f64).log2() < entropy {
        return Err(WardenError::ConfigError {
            reason: format!(
                "secrets.min_token_length ({}) is too short to reach entropy_threshold ({}); \
                 tokens need at least {} chars",
                min_len,
                entropy,
                entropy.exp2().ceil()
            ),
        });
    }
    Ok(())
}

/// Exhausted dimensions and usage that would overflow a limit.
///
/// Hard caps deny, soft caps warn.
fn budget_verdict(request: &ActionRequest, budget: &BudgetSnapshot) -> GateVerdict {
    let mut hard = Vec::new();
    let mut soft = Vec::new();

    for state in &budget.states {
        if state.exceeded() {
            let entry = format!(
                "{} exhausted ({}/{})",
                state.dimension,
                state.consumed,
                state.limit.unwrap_or(0)
            );
            match state.cap {
                CapKind::Hard => hard.push(entry),
                CapKind::Soft => soft.push(entry),
            }
        }
    }

    for usage in request.implied_usage() {
        let Some(state) = budget.get(usage.dimension) else {
            continue;
        };
        if !state.exceeded() && state.would_overflow(usage.amount) {
            let entry = format!(
                "{} would overflow: requested {}, remaining {}",
                usage.dimension,
                usage.amount,
                state.remaining()
            );
            match state.cap {
                CapKind::Hard => hard.push(entry),
                CapKind::Soft => soft.push(entry),
            }
        }
    }

    if !hard.is_empty() {
        GateVerdict::deny(BUDGET, hard.join("; "))
            .with_evidence(json!({ "hard": hard, "soft": soft }))
    } else if !soft.is_empty() {
        GateVerdict::warn(BUDGET, soft.join("; ")).with_evidence(json!({ "soft": soft }))
    } else {
        GateVerdict::allow(BUDGET, "within budget")
    }
}

fn privilege_verdict(is_read: bool, level: PrivilegeLevel) -> GateVerdict {
    let evidence = json!({ "privilege_level": level, "read_action": is_read });
    let verdict = match (level, is_read) {
        (PrivilegeLevel::Suspended, _) => GateVerdict::deny(PRIVILEGE, "agent is suspended"),
        (PrivilegeLevel::ReadOnly, false) => {
            GateVerdict::deny(PRIVILEGE, "agent is read-only; non-read action refused")
        }
        (PrivilegeLevel::Restricted, false) => {
            GateVerdict::warn(PRIVILEGE, "agent is restricted; non-read action flagged")
        }
        _ => GateVerdict::allow(PRIVILEGE, format!("privilege level {}", level)),
    };
    verdict.with_evidence(evidence)
}
