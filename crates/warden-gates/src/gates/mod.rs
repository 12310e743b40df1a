//! The four pre-execution gates.
//!
//! Gates are independent: each sees the same [`GateContext`] and returns
//! exactly one verdict. None of them can short-circuit another.

mod allowlist;
mod destructive;
mod diff;
mod secrets;

pub use allowlist::AllowlistGate;
pub use destructive::DestructiveGate;
pub use diff::{line_delta, DiffGate};
pub use secrets::{shannon_entropy, SecretGate};

use regex::Regex;

use warden_contracts::{
    action::ActionRequest,
    capability::CapabilitySet,
    error::{WardenError, WardenResult},
    verdict::GateVerdict,
};

use crate::config::SignatureRule;

pub const DESTRUCTIVE: &str = "destructive";
pub const TOOL_ALLOWLIST: &str = "tool-allowlist";
pub const DIFF_SIZE: &str = "diff-size";
pub const SECRET_DETECTION: &str = "secret-detection";

/// Everything a gate may look at for one request.
#[derive(Debug)]
pub struct GateContext<'a> {
    pub request: &'a ActionRequest,
    pub capabilities: &'a CapabilitySet,
    /// All string leaves of the payload, computed once per evaluation.
    pub scan_text: String,
    /// Whether the diff-size gate applies to this request.
    pub is_edit: bool,
}

impl<'a> GateContext<'a> {
    pub fn new(request: &'a ActionRequest, capabilities: &'a CapabilitySet, is_edit: bool) -> Self {
        Self {
            request,
            capabilities,
            scan_text: request.scan_text(),
            is_edit,
        }
    }
}

/// A closed set of gate kinds sharing one `check` entry point.
#[derive(Debug)]
pub enum Gate {
    Destructive(DestructiveGate),
    ToolAllowlist(AllowlistGate),
    DiffSize(DiffGate),
    SecretDetection(SecretGate),
}

impl Gate {
    pub fn name(&self) -> &'static str {
        match self {
            Gate::Destructive(_) => DESTRUCTIVE,
            Gate::ToolAllowlist(_) => TOOL_ALLOWLIST,
            Gate::DiffSize(_) => DIFF_SIZE,
            Gate::SecretDetection(_) => SECRET_DETECTION,
        }
    }

    pub fn check(&self, ctx: &GateContext<'_>) -> GateVerdict {
        match self {
            Gate::Destructive(gate) => gate.check(ctx),
            Gate::ToolAllowlist(gate) => gate.check(ctx),
            Gate::DiffSize(gate) => gate.check(ctx),
            Gate::SecretDetection(gate) => gate.check(ctx),
        }
    }
}

/// A signature rule with its regex compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub description: String,
    pub regex: Regex,
}

impl CompiledRule {
    pub fn compile(rule: &SignatureRule) -> WardenResult<Self> {
        let regex = Regex::new(&rule.pattern).map_err(|e| WardenError::ConfigError {
            reason: format!("invalid pattern for rule '{}': {}", rule.id, e),
        })?;
        Ok(Self {
            id: rule.id.clone(),
            description: rule.description.clone(),
            regex,
        })
    }
}

pub(crate) fn compile_all(rules: &[SignatureRule]) -> WardenResult<Vec<CompiledRule>> {
    rules.iter().map(CompiledRule::compile).collect()
}
