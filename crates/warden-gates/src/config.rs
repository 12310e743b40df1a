//! Gate configuration schema.
//!
//! A `GateConfig` is deserialized from TOML (see `policies/gates.toml`).
//! Every section is optional; missing sections fall back to the built-in
//! defaults below, including the default signature lists.
//!
//! Example:
//! ```toml
//! read_only_tools = ["Read", "Grep", "Glob", "LS"]
//! edit_tools = ["Edit", "Write", "MultiEdit", "NotebookEdit"]
//!
//! [diff]
//! max_lines = 500
//! warn_lines = 400
//!
//! [[destructive.patterns]]
//! id = "rm-recursive"
//! description = "recursive file deletion"
//! pattern = '\brm\s+-[A-Za-z]*[rR]'
//! ```

use serde::{Deserialize, Serialize};

/// A named regular expression.
///
/// `pattern` uses the `regex` crate syntax (no look-around).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRule {
    /// Stable identifier, reported in verdict evidence.
    pub id: String,
    pub pattern: String,
    #[serde(default)]
    pub description: String,
}

impl SignatureRule {
    pub fn new(id: &str, pattern: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            pattern: pattern.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Tools whose calls count as read actions for privilege checks.
    pub read_only_tools: Vec<String>,
    /// Tools whose calls are subject to the diff-size gate.
    pub edit_tools: Vec<String>,
    pub destructive: DestructiveConfig,
    pub allowlist: AllowlistConfig,
    pub diff: DiffConfig,
    pub secrets: SecretConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            read_only_tools: ["Read", "Grep", "Glob", "LS"]
                .map(String::from)
                .to_vec(),
            edit_tools: ["Edit", "Write", "MultiEdit", "NotebookEdit"]
                .map(String::from)
                .to_vec(),
            destructive: DestructiveConfig::default(),
            allowlist: AllowlistConfig::default(),
            diff: DiffConfig::default(),
            secrets: SecretConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestructiveConfig {
    #[serde(default = "default_destructive_patterns")]
    pub patterns: Vec<SignatureRule>,
}

impl Default for DestructiveConfig {
    fn default() -> Self {
        Self {
            patterns: default_destructive_patterns(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowlistConfig {
    /// Rate-limit utilization at or above which a granted call warns.
    pub warn_utilization: f64,
}

impl Default for AllowlistConfig {
    fn default() -> Self {
        Self {
            warn_utilization: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Changed lines above this deny.
    pub max_lines: u64,
    /// Changed lines at or above this (and within `max_lines`) warn.
    pub warn_lines: u64,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            max_lines: 500,
            warn_lines: 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretConfig {
    #[serde(default = "default_secret_patterns")]
    pub patterns: Vec<SignatureRule>,
    /// Shannon entropy (bits per char) at or above which a token is flagged.
    #[serde(default = "default_entropy_threshold")]
    pub entropy_threshold: f64,
    /// Tokens shorter than this are never entropy-checked. Must be at least
    /// `2^entropy_threshold`, the shortest length that can reach the
    /// threshold.
    #[serde(default = "default_min_token_length")]
    pub min_token_length: usize,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            patterns: default_secret_patterns(),
            entropy_threshold: default_entropy_threshold(),
            min_token_length: default_min_token_length(),
        }
    }
}

fn default_entropy_threshold() -> f64 {
    4.5
}

fn default_min_token_length() -> usize {
    24
}

pub fn default_destructive_patterns() -> Vec<SignatureRule> {
    vec![
        SignatureRule::new(
            "rm-recursive",
            r"\brm\s+(?:-{1,2}[A-Za-z-]+\s+)*(?:-[A-Za-z]*[rR][A-Za-z]*|--recursive)\b",
            "recursive file deletion",
        ),
        SignatureRule::new(
            "git-force-push",
            r"\bgit\s+push\b.*(?:\s--force\b|\s-f\b)",
            "force push rewrites remote history",
        ),
        SignatureRule::new(
            "git-reset-hard",
            r"\bgit\s+reset\b.*\s--hard\b",
            "hard reset discards uncommitted work",
        ),
        SignatureRule::new(
            "disk-format",
            r"\bmkfs(?:\.[a-z0-9]+)?\b",
            "filesystem formatting",
        ),
        SignatureRule::new(
            "disk-overwrite",
            r"\bdd\b.*\bof=/dev/",
            "raw write to a block device",
        ),
        SignatureRule::new(
            "fork-bomb",
            r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
            "shell fork bomb",
        ),
        SignatureRule::new(
            "chmod-root",
            r"\bchmod\s+-R\s+777\s+/(?:\s|$)",
            "world-writable root filesystem",
        ),
        SignatureRule::new(
            "pipe-to-shell",
            r"\b(?:curl|wget)\b[^|\n]*\|\s*(?:sudo\s+)?(?:ba|z)?sh\b",
            "remote script piped into a shell",
        ),
        SignatureRule::new(
            "credential-exfiltration",
            r"(?:\.ssh/|\.aws/credentials|\.env\b|/etc/shadow)[^|\n]*\|\s*(?:curl|nc|ncat|wget)\b",
            "credential file piped to a network tool",
        ),
        SignatureRule::new(
            "credential-upload",
            r"\bcurl\b.*(?:-d|--data(?:-binary)?|-F)\s+@\S*(?:\.ssh/|\.aws/|\.env)",
            "credential file uploaded with curl",
        ),
        SignatureRule::new(
            "sql-drop",
            r"(?i)\bdrop\s+(?:table|database)\b",
            "destructive SQL statement",
        ),
    ]
}

pub fn default_secret_patterns() -> Vec<SignatureRule> {
    vec![
        SignatureRule::new(
            "aws-access-key",
            r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b",
            "AWS access key id",
        ),
        SignatureRule::new(
            "github-token",
            r"\bgh[pousr]_[A-Za-z0-9_]{36,}",
            "GitHub token",
        ),
        SignatureRule::new(
            "private-key",
            r"-----BEGIN\s+(?:[A-Z]+\s+)?PRIVATE\s+KEY-----",
            "PEM private key",
        ),
        SignatureRule::new(
            "slack-token",
            r"\bxox[baprs]-[A-Za-z0-9-]{10,}",
            "Slack token",
        ),
        SignatureRule::new(
            "api-secret-key",
            r"\bsk-[A-Za-z0-9_-]{20,}",
            "API secret key",
        ),
        SignatureRule::new(
            "generic-secret",
            r#"(?i)(?:api[_-]?key|secret|password|passwd|access[_-]?token|auth[_-]?token)['"]?\s*[:=]\s*['"]?[^\s'"]{16,}"#,
            "credential assignment",
        ),
    ]
}
