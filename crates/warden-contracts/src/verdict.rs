//! Gate verdicts and the aggregate evaluation.
//!
//! Each gate emits one `GateVerdict`. The `Evaluation` keeps every verdict
//! for audit and folds them into one decision, strictest wins.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a check. Declaration order is severity order:
/// `Allow < Warn < Deny`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    Allow,
    Warn,
    Deny,
}

impl Decision {
    /// Strictest-wins combination: `deny > warn > allow`.
    pub fn strictest(self, other: Decision) -> Decision {
        self.max(other)
    }

    pub fn is_deny(self) -> bool {
        self == Decision::Deny
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Warn => "warn",
            Decision::Deny => "deny",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The verdict of one gate for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub gate_name: String,
    pub decision: Decision,
    /// Human-readable explanation, written to the ledger.
    pub reason: String,
    /// Structured detail. Never contains raw secrets.
    #[serde(default)]
    pub evidence: Value,
}

impl GateVerdict {
    pub fn new(gate_name: impl Into<String>, decision: Decision, reason: impl Into<String>) -> Self {
        Self {
            gate_name: gate_name.into(),
            decision,
            reason: reason.into(),
            evidence: Value::Null,
        }
    }

    pub fn allow(gate_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(gate_name, Decision::Allow, reason)
    }

    pub fn warn(gate_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(gate_name, Decision::Warn, reason)
    }

    pub fn deny(gate_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(gate_name, Decision::Deny, reason)
    }

    pub fn with_evidence(mut self, evidence: Value) -> Self {
        self.evidence = evidence;
        self
    }
}

/// The full result of evaluating one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// One verdict per gate, in gate order.
    pub verdicts: Vec<GateVerdict>,
    /// Verdicts derived from caller-supplied context (budget, privilege).
    pub context: Vec<GateVerdict>,
    /// Strictest decision across `verdicts` and `context`.
    pub decision: Decision,
}

impl Evaluation {
    pub fn aggregate(verdicts: Vec<GateVerdict>, context: Vec<GateVerdict>) -> Self {
        let decision = verdicts
            .iter()
            .chain(context.iter())
            .map(|v| v.decision)
            .fold(Decision::Allow, Decision::strictest);
        Self {
            verdicts,
            context,
            decision,
        }
    }

    /// Strictest decision across the gate verdicts alone, ignoring context.
    pub fn gate_decision(&self) -> Decision {
        self.verdicts
            .iter()
            .map(|v| v.decision)
            .fold(Decision::Allow, Decision::strictest)
    }

    /// Look up a verdict (gate or context) by name.
    pub fn verdict(&self, gate_name: &str) -> Option<&GateVerdict> {
        self.all_verdicts().find(|v| v.gate_name == gate_name)
    }

    pub fn all_verdicts(&self) -> impl Iterator<Item = &GateVerdict> {
        self.verdicts.iter().chain(self.context.iter())
    }

    /// Reasons of every verdict at the aggregate decision's severity.
    pub fn reasons(&self) -> Vec<String> {
        self.all_verdicts()
            .filter(|v| v.decision == self.decision && v.decision != Decision::Allow)
            .map(|v| format!("[{}] {}", v.gate_name, v.reason))
            .collect()
    }
}
