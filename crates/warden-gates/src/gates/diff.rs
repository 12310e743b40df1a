use serde_json::{json, Value};

use warden_contracts::verdict::GateVerdict;

use super::{GateContext, DIFF_SIZE};
use crate::config::DiffConfig;

/// Bounds the number of changed lines in edit-type actions.
#[derive(Debug)]
pub struct DiffGate {
    max_lines: u64,
    warn_lines: u64,
}

impl DiffGate {
    pub fn new(config: &DiffConfig) -> Self {
        Self {
            max_lines: config.max_lines,
            warn_lines: config.warn_lines,
        }
    }

    pub fn check(&self, ctx: &GateContext<'_>) -> GateVerdict {
        if !ctx.is_edit {
            return GateVerdict::allow(DIFF_SIZE, "not an edit action");
        }
        let Some(delta) = line_delta(&ctx.request.payload) else {
            return GateVerdict::allow(DIFF_SIZE, "edit carries no diff content");
        };

        let evidence = json!({
            "changed_lines": delta,
            "max_lines": self.max_lines,
            "warn_lines": self.warn_lines,
        });

        if delta > self.max_lines {
            GateVerdict::deny(
                DIFF_SIZE,
                format!("{} changed lines exceeds ceiling of {}", delta, self.max_lines),
            )
            .with_evidence(evidence)
        } else if delta >= self.warn_lines {
            GateVerdict::warn(
                DIFF_SIZE,
                format!(
                    "{} changed lines is close to ceiling of {}",
                    delta, self.max_lines
                ),
            )
            .with_evidence(evidence)
        } else {
            GateVerdict::allow(DIFF_SIZE, format!("{} changed lines", delta)).with_evidence(evidence)
        }
    }
}

/// Added plus removed lines described by an edit payload.
///
/// Sources, first present wins: `diff {added, removed}`, a unified `patch`,
/// `old_string` + `new_string`, then `content`.
pub fn line_delta(payload: &Value) -> Option<u64> {
    if let Some(diff) = payload.get("diff").filter(|d| d.is_object()) {
        let count = |key: &str| diff.get(key).and_then(Value::as_u64).unwrap_or(0);
        return Some(count("added").saturating_add(count("removed")));
    }

    if let Some(patch) = payload.get("patch").and_then(Value::as_str) {
        let changed = patch
            .lines()
            .filter(|line| {
                (line.starts_with('+') && !line.starts_with("+++"))
                    || (line.starts_with('-') && !line.starts_with("---"))
            })
            .count();
        return Some(changed as u64);
    }

    let old = payload.get("old_string").and_then(Value::as_str);
    let new = payload.get("new_string").and_then(Value::as_str);
    if old.is_some() || new.is_some() {
        let lines = |s: Option<&str>| s.map(|s| s.lines().count() as u64).unwrap_or(0);
        return Some(lines(old) + lines(new));
    }

    payload
        .get("content")
        .and_then(Value::as_str)
        .map(|content| content.lines().count() as u64)
}
