use serde_json::json;

use warden_contracts::{error::WardenResult, verdict::GateVerdict};

use super::{compile_all, CompiledRule, GateContext, DESTRUCTIVE};
use crate::config::DestructiveConfig;

/// Denies payloads matching a known destructive signature.
#[derive(Debug)]
pub struct DestructiveGate {
    rules: Vec<CompiledRule>,
}

impl DestructiveGate {
    pub fn new(config: &DestructiveConfig) -> WardenResult<Self> {
        Ok(Self {
            rules: compile_all(&config.patterns)?,
        })
    }

    pub fn check(&self, ctx: &GateContext<'_>) -> GateVerdict {
        let matched: Vec<&CompiledRule> = self
            .rules
            .iter()
            .filter(|rule| rule.regex.is_match(&ctx.scan_text))
            .collect();

        match matched.first() {
            None => GateVerdict::allow(DESTRUCTIVE, "no destructive signature matched"),
            Some(first) => GateVerdict::deny(
                DESTRUCTIVE,
                format!("destructive operation: {} ({})", first.description, first.id),
            )
            .with_evidence(json!({
                "matched": matched.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            })),
        }
    }
}
