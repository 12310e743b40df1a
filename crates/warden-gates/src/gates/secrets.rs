use serde_json::json;

use warden_contracts::{error::WardenResult, verdict::GateVerdict};

use super::{compile_all, CompiledRule, GateContext, SECRET_DETECTION};
use crate::config::SecretConfig;

/// Denies payloads that appear to carry credentials.
///
/// Two detectors run: the regex families, and a Shannon-entropy check on
/// long token-like substrings. Evidence never includes the matched text,
/// only a short redacted preview.
#[derive(Debug)]
pub struct SecretGate {
    rules: Vec<CompiledRule>,
    entropy_threshold: f64,
    min_token_length: usize,
}

impl SecretGate {
    pub fn new(config: &SecretConfig) -> WardenResult<Self> {
        Ok(Self {
            rules: compile_all(&config.patterns)?,
            entropy_threshold: config.entropy_threshold,
            min_token_length: config.min_token_length,
        })
    }

    pub fn check(&self, ctx: &GateContext<'_>) -> GateVerdict {
        let text = &ctx.scan_text;

        for rule in &self.rules {
            if let Some(m) = rule.regex.find(text) {
                return GateVerdict::deny(
                    SECRET_DETECTION,
                    format!("possible credential: {} ({})", rule.description, rule.id),
                )
                .with_evidence(json!({
                    "detector": "pattern",
                    "rule": rule.id,
                    "preview": redact(m.as_str()),
                }));
            }
        }

        if let Some((token, entropy)) = self.high_entropy_token(text) {
            return GateVerdict::deny(
                SECRET_DETECTION,
                format!(
                    "high-entropy token ({:.2} bits/char, {} chars)",
                    entropy,
                    token.len()
                ),
            )
            .with_evidence(json!({
                "detector": "entropy",
                "entropy": entropy,
                "preview": redact(token),
            }));
        }

        GateVerdict::allow(SECRET_DETECTION, "no credential-shaped content")
    }

    fn high_entropy_token<'t>(&self, text: &'t str) -> Option<(&'t str, f64)> {
        text.split(|c: char| !is_token_char(c))
            .filter(|token| token.len() >= self.min_token_length)
            .map(|token| (token, shannon_entropy(token)))
            .find(|(_, entropy)| *entropy >= self.entropy_threshold)
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '_' | '-')
}

/// Shannon entropy in bits per byte.
pub fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for b in s.bytes() {
        counts[b as usize] += 1;
    }
    let len = s.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{}… ({} chars redacted)", prefix, secret.chars().count())
}
