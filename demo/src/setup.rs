//! Signing key, policy loading and kernel construction shared by every
//! subcommand.

use std::path::{Path, PathBuf};

use clap::Args;
use tracing::warn;

use warden_contracts::error::{WardenError, WardenResult};
use warden_core::{Kernel, KernelConfig, StaticCapabilities};
use warden_gates::GateEvaluator;
use warden_ledger::{FileLedger, LedgerOptions, MemoryLedger, RecoveryReport};
use warden_proof::SigningKey;

/// Environment variable holding the hex-encoded HMAC key.
pub const KEY_ENV: &str = "WARDEN_SIGNING_KEY";

const DEMO_KEY: &[u8] = b"warden-demo-signing-key-do-not-deploy";

const GATES_TOML: &str = include_str!("../../policies/gates.toml");
const GRANTS_TOML: &str = include_str!("../../policies/grants.toml");
const KERNEL_TOML: &str = include_str!("../../policies/kernel.toml");

/// Policy files; each falls back to the bundled copy under `policies/`.
#[derive(Args, Debug, Clone, Default)]
pub struct PolicyArgs {
    /// Gate configuration TOML.
    #[arg(long, value_name = "FILE")]
    pub gates: Option<PathBuf>,
    /// Capability grants TOML.
    #[arg(long, value_name = "FILE")]
    pub grants: Option<PathBuf>,
    /// Kernel configuration TOML (coherence, budget, feedback).
    #[arg(long = "kernel-config", value_name = "FILE")]
    pub kernel_config: Option<PathBuf>,
    /// Ledger options TOML (lock staleness, retry policy).
    #[arg(long = "ledger-options", value_name = "FILE")]
    pub ledger_options: Option<PathBuf>,
}

impl PolicyArgs {
    pub fn evaluator(&self) -> WardenResult<GateEvaluator> {
        match &self.gates {
            Some(path) => GateEvaluator::from_file(path),
            None => GateEvaluator::from_toml_str(GATES_TOML),
        }
    }

    pub fn grants(&self) -> WardenResult<StaticCapabilities> {
        match &self.grants {
            Some(path) => StaticCapabilities::from_file(path),
            None => StaticCapabilities::from_toml_str(GRANTS_TOML),
        }
    }

    pub fn kernel_config(&self) -> WardenResult<KernelConfig> {
        match &self.kernel_config {
            Some(path) => KernelConfig::from_file(path),
            None => KernelConfig::from_toml_str(KERNEL_TOML),
        }
    }

    pub fn ledger_options(&self) -> WardenResult<LedgerOptions> {
        match &self.ledger_options {
            Some(path) => LedgerOptions::from_file(path),
            None => Ok(LedgerOptions::default()),
        }
    }
}

/// The key from `WARDEN_SIGNING_KEY`, or the built-in demo key.
pub fn signing_key() -> WardenResult<SigningKey> {
    match std::env::var(KEY_ENV) {
        Ok(encoded) => SigningKey::from_hex(encoded.trim()),
        Err(_) => {
            warn!("{} not set; using the built-in demo key", KEY_ENV);
            demo_key()
        }
    }
}

/// Open the ledger in `dir` and a kernel on top of it.
pub fn open_kernel(
    dir: &Path,
    key: &SigningKey,
    policies: &PolicyArgs,
) -> WardenResult<(Kernel, RecoveryReport)> {
    let (ledger, report) = FileLedger::open(dir, key.clone(), policies.ledger_options()?)?;
    let kernel = Kernel::builder(key.clone())
        .config(policies.kernel_config()?)
        .evaluator(policies.evaluator()?)
        .capabilities(policies.grants()?)
        .open(ledger)?;
    Ok((kernel, report))
}

/// A throwaway kernel on an in-memory ledger, for scenarios.
pub fn scenario_kernel(
    config: KernelConfig,
    grants: StaticCapabilities,
) -> WardenResult<(Kernel, MemoryLedger)> {
    let ledger = MemoryLedger::new();
    let kernel = Kernel::builder(demo_key()?)
        .config(config)
        .evaluator(GateEvaluator::from_toml_str(GATES_TOML)?)
        .capabilities(grants)
        .open(ledger.clone())?;
    Ok((kernel, ledger))
}

pub fn demo_key() -> WardenResult<SigningKey> {
    SigningKey::new(DEMO_KEY.to_vec())
}

pub fn read_file(path: &Path) -> WardenResult<String> {
    std::fs::read_to_string(path).map_err(|e| WardenError::ConfigError {
        reason: format!("failed to read '{}': {}", path.display(), e),
    })
}

pub fn write_file(path: &Path, bytes: &[u8]) -> WardenResult<()> {
    std::fs::write(path, bytes).map_err(|e| WardenError::LedgerIo {
        reason: format!("failed to write '{}': {}", path.display(), e),
    })
}

pub fn temp_dir() -> WardenResult<tempfile::TempDir> {
    tempfile::tempdir().map_err(|e| WardenError::LedgerIo {
        reason: format!("failed to create temporary ledger directory: {}", e),
    })
}
