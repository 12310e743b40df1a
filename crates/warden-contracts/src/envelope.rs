//! Decision envelopes: the immutable, hash-linked unit of the audit trail.
//!
//! Every decision and every explicit override (reset, suspend, recorded
//! outcome or usage) becomes exactly one `DecisionEnvelope`. The `effects`
//! list records the state mutations that came with it, which is what lets the
//! ledger be replayed into the same coherence and budget state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    action::ActionType,
    agent::{AgentId, RunId, TaskId},
    budget::BudgetDimension,
    coherence::CoherenceSignal,
    verdict::{Decision, GateVerdict},
};

/// The `previous_hash` of the envelope at sequence 0.
///
/// 64 hex zeros.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Version of the canonical hashing layout. Stored in every envelope.
pub const ENVELOPE_FORMAT_VERSION: u16 = 1;

/// What produced an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    /// A gate evaluation of an action request.
    Decision,
    /// An externally recorded coherence outcome.
    Outcome,
    /// Externally recorded resource usage.
    Usage,
    /// Explicit operator reset of an agent's coherence.
    Reset,
    /// Explicit suspension of an agent.
    Suspend,
    /// A new budget run started for an agent.
    RunReset,
}

/// A state mutation applied together with an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "kebab-case")]
pub enum Effect {
    Signal {
        signal: CoherenceSignal,
        magnitude: f64,
    },
    Usage {
        dimension: BudgetDimension,
        amount: u64,
    },
    Reset {
        reason: String,
    },
    Suspend {
        reason: String,
    },
    RunReset {
        run_id: RunId,
    },
}

/// Redacted description of the evaluated action.
///
/// Raw payloads may hold secrets, so only a digest and the payload size are
/// kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub action_type: ActionType,
    pub resource: String,
    /// SHA-256 (hex) of the canonical JSON payload.
    pub payload_digest: String,
    pub payload_bytes: u64,
    /// Timestamp carried by the request itself.
    pub requested_at: DateTime<Utc>,
}

/// Redacted description of one memory operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryOpSummary {
    pub key: String,
    pub operation: String,
    pub content_bytes: u64,
    /// SHA-256 (hex) of the content.
    pub content_hash: String,
}

/// One entry in the hash chain.
///
/// `hash` commits to every other field except `mac`; `mac` authenticates
/// `hash` with the signing key. Modifying any field breaks verification at
/// this envelope's sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEnvelope {
    pub format_version: u16,
    /// Position in the chain, starting at 0, no gaps.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EntryKind,
    pub agent_id: AgentId,
    pub task_id: Option<TaskId>,
    pub action_summary: Option<ActionSummary>,
    pub tool_call_hashes: Vec<String>,
    pub memory_op_summaries: Vec<MemoryOpSummary>,
    pub verdicts: Vec<GateVerdict>,
    /// Aggregate decision; absent for override entries.
    pub decision: Option<Decision>,
    pub effects: Vec<Effect>,
    /// `hash` of the previous envelope, or [`GENESIS_HASH`] at sequence 0.
    pub previous_hash: String,
    pub hash: String,
    pub mac: String,
}

/// The point a compacted chain resumes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAnchor {
    /// Last sequence folded into the snapshot.
    pub compacted_through: u64,
    /// `hash` of the envelope at `compacted_through`.
    pub root_hash: String,
}

impl ChainAnchor {
    /// Sequence of the first envelope after the anchor.
    pub fn next_sequence(&self) -> u64 {
        self.compacted_through + 1
    }
}

/// Result of walking a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    /// Earliest sequence whose stored values diverge from recomputed ones.
    pub broken_at_sequence: Option<u64>,
    pub reason: Option<String>,
    /// Number of envelopes checked successfully.
    pub verified: u64,
    /// Hash of the last verified envelope (or the anchor/genesis).
    pub head_hash: String,
}

impl ChainVerification {
    pub fn intact(verified: u64, head_hash: impl Into<String>) -> Self {
        Self {
            valid: true,
            broken_at_sequence: None,
            reason: None,
            verified,
            head_hash: head_hash.into(),
        }
    }

    pub fn broken(
        sequence: u64,
        reason: impl Into<String>,
        verified: u64,
        head_hash: impl Into<String>,
    ) -> Self {
        Self {
            valid: false,
            broken_at_sequence: Some(sequence),
            reason: Some(reason.into()),
            verified,
            head_hash: head_hash.into(),
        }
    }
}
