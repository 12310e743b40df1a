//! Error types for the WARDEN kernel.
//!
//! All fallible operations return `WardenResult<T>`. Variants carry enough
//! context to be surfaced to callers and operators without further lookup.

use thiserror::Error;

/// The unified error type for the WARDEN crates.
#[derive(Debug, Error)]
pub enum WardenError {
    /// The action request is malformed or missing required fields.
    ///
    /// Raised before any gate runs; no state has been mutated.
    #[error("request invalid: {reason}")]
    RequestInvalid { reason: String },

    /// Stored chain values diverge from recomputed ones.
    #[error("integrity violation at sequence {sequence}: {reason}")]
    IntegrityViolation { sequence: u64, reason: String },

    /// The ledger could not persist a record after exhausting retries.
    ///
    /// Fatal to the writer role: the record was not written.
    #[error("ledger write failed after {attempts} attempt(s): {reason}")]
    WriteFailed { attempts: u32, reason: String },

    /// Another writer holds the ledger lock and it is not stale.
    #[error("ledger lock held by '{holder}' since {acquired_at}")]
    LockContended { holder: String, acquired_at: String },

    /// Recording usage would push a hard-capped dimension past its limit.
    #[error(
        "budget '{dimension}' exhausted for agent '{agent_id}': requested {requested}, remaining {remaining}"
    )]
    BudgetExceeded {
        agent_id: String,
        dimension: String,
        requested: u64,
        remaining: u64,
    },

    /// An envelope does not continue the chain at the expected position.
    #[error("sequence mismatch: expected {expected}, found {found}")]
    SequenceMismatch { expected: u64, found: u64 },

    /// Compaction was asked for a range it cannot honor.
    #[error("compaction rejected: {reason}")]
    CompactionRejected { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// A value could not be encoded or decoded.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    /// An exported proof could not be imported.
    #[error("proof import failed: {reason}")]
    ImportFailed { reason: String },

    /// A complete ledger line could not be parsed.
    ///
    /// Incomplete trailing lines are not reported here; recovery discards
    /// them.
    #[error("ledger corrupt at line {line}: {reason}")]
    LedgerCorrupt { line: u64, reason: String },

    /// A non-append ledger I/O operation failed.
    #[error("ledger I/O error: {reason}")]
    LedgerIo { reason: String },
}

/// Convenience alias used throughout the WARDEN crates.
pub type WardenResult<T> = Result<T, WardenError>;
