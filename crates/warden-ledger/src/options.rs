//! Ledger tuning: lock staleness and retry policies.
//!
//! ```toml
//! lock_stale_after_ms = 30000
//!
//! [lock_retry]
//! attempts = 50
//! initial_backoff_ms = 1
//! max_backoff_ms = 50
//!
//! [write_retry]
//! attempts = 3
//! initial_backoff_ms = 10
//! max_backoff_ms = 100
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use warden_contracts::error::{WardenError, WardenResult};

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    fn validate(&self, name: &str) -> WardenResult<()> {
        if self.attempts == 0 {
            return Err(WardenError::ConfigError {
                reason: format!("{}.attempts must be at least 1", name),
            });
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(WardenError::ConfigError {
                reason: format!(
                    "{}.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                    name, self.initial_backoff_ms, self.max_backoff_ms
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerOptions {
    /// A lock marker older than this is presumed abandoned and reclaimed.
    pub lock_stale_after_ms: u64,
    pub lock_retry: RetryPolicy,
    pub write_retry: RetryPolicy,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            lock_stale_after_ms: 30_000,
            lock_retry: RetryPolicy {
                attempts: 50,
                initial_backoff_ms: 1,
                max_backoff_ms: 50,
            },
            write_retry: RetryPolicy {
                attempts: 3,
                initial_backoff_ms: 10,
                max_backoff_ms: 100,
            },
        }
    }
}

impl LedgerOptions {
    pub fn from_toml_str(s: &str) -> WardenResult<Self> {
        let options: LedgerOptions = toml::from_str(s).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to parse ledger options: {}", e),
        })?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_file(path: &Path) -> WardenResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| WardenError::ConfigError {
            reason: format!("failed to read ledger options '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> WardenResult<()> {
        self.lock_retry.validate("lock_retry")?;
        self.write_retry.validate("write_retry")
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_millis(self.lock_stale_after_ms)
    }
}
