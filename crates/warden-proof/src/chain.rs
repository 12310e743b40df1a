//! Hash-chain primitives: canonical hashing, sealing and verification.
//!
//! Hash input layout (bytes, in order):
//!   1. the domain tag `warden.envelope.v1\0`
//!   2. compact JSON of the envelope body: every field except
//!      `previous_hash`, `hash` and `mac`, in declaration order
//!   3. `previous_hash` as 64 ASCII hex characters
//!
//! `mac` is HMAC-SHA256 over the hex `hash`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use warden_contracts::{
    agent::{AgentId, TaskId},
    envelope::{
        ActionSummary, ChainAnchor, ChainVerification, DecisionEnvelope, Effect, EntryKind,
        MemoryOpSummary, ENVELOPE_FORMAT_VERSION, GENESIS_HASH,
    },
    error::{WardenError, WardenResult},
    verdict::{Decision, GateVerdict},
};

use crate::key::SigningKey;

pub const HASH_DOMAIN: &[u8] = b"warden.envelope.v1\0";

/// The hashed portion of an envelope, borrowed.
#[derive(Serialize)]
struct EnvelopeBody<'a> {
    format_version: u16,
    sequence: u64,
    timestamp: &'a DateTime<Utc>,
    kind: EntryKind,
    agent_id: &'a AgentId,
    task_id: &'a Option<TaskId>,
    action_summary: &'a Option<ActionSummary>,
    tool_call_hashes: &'a [String],
    memory_op_summaries: &'a [MemoryOpSummary],
    verdicts: &'a [GateVerdict],
    decision: Option<Decision>,
    effects: &'a [Effect],
}

/// Compact JSON of the hashed fields.
pub fn canonical_body(envelope: &DecisionEnvelope) -> WardenResult<Vec<u8>> {
    let body = EnvelopeBody {
        format_version: envelope.format_version,
        sequence: envelope.sequence,
        timestamp: &envelope.timestamp,
        kind: envelope.kind,
        agent_id: &envelope.agent_id,
        task_id: &envelope.task_id,
        action_summary: &envelope.action_summary,
        tool_call_hashes: &envelope.tool_call_hashes,
        memory_op_summaries: &envelope.memory_op_summaries,
        verdicts: &envelope.verdicts,
        decision: envelope.decision,
        effects: &envelope.effects,
    };
    serde_json::to_vec(&body).map_err(|e| WardenError::SerializationError {
        reason: format!("failed to encode envelope {}: {}", envelope.sequence, e),
    })
}

/// Recompute the hash of `envelope` from its body and `previous_hash`.
///
/// Returns a lowercase 64-character hex string.
pub fn hash_envelope(envelope: &DecisionEnvelope) -> WardenResult<String> {
    let body = canonical_body(envelope)?;

    let mut hasher = Sha256::new();
    hasher.update(HASH_DOMAIN);
    hasher.update(&body);
    hasher.update(envelope.previous_hash.as_bytes());

    Ok(hex::encode(hasher.finalize()))
}

/// Fill in `hash` and `mac`.
pub fn seal_envelope(envelope: &mut DecisionEnvelope, key: &SigningKey) -> WardenResult<()> {
    envelope.hash = hash_envelope(envelope)?;
    envelope.mac = key.sign(envelope.hash.as_bytes())?;
    Ok(())
}

/// SHA-256 of arbitrary bytes, hex encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Incremental chain walker.
///
/// Feed envelopes in order with [`ChainVerifier::push`]; the first failure
/// names the earliest sequence whose stored values diverge.
#[derive(Debug)]
pub struct ChainVerifier<'k> {
    key: &'k SigningKey,
    next_sequence: u64,
    last_hash: String,
    verified: u64,
}

impl<'k> ChainVerifier<'k> {
    /// Start at genesis.
    pub fn new(key: &'k SigningKey) -> Self {
        Self::resume(key, 0, GENESIS_HASH)
    }

    /// Start after a compaction anchor, or at genesis without one.
    pub fn from_anchor(key: &'k SigningKey, anchor: Option<&ChainAnchor>) -> Self {
        match anchor {
            Some(anchor) => Self::resume(key, anchor.next_sequence(), &anchor.root_hash),
            None => Self::new(key),
        }
    }

    /// Continue from a known position.
    pub fn resume(key: &'k SigningKey, next_sequence: u64, last_hash: &str) -> Self {
        Self {
            key,
            next_sequence,
            last_hash: last_hash.to_string(),
            verified: 0,
        }
    }

    /// Check one envelope without advancing.
    pub fn check(&self, envelope: &DecisionEnvelope) -> WardenResult<()> {
        let broken = |reason: String| WardenError::IntegrityViolation {
            sequence: self.next_sequence,
            reason,
        };

        if envelope.format_version != ENVELOPE_FORMAT_VERSION {
            return Err(broken(format!(
                "unsupported envelope format version {}",
                envelope.format_version
            )));
        }
        if envelope.sequence != self.next_sequence {
            return Err(broken(format!(
                "expected sequence {}, found {}",
                self.next_sequence, envelope.sequence
            )));
        }
        if envelope.previous_hash != self.last_hash {
            return Err(broken("previous_hash does not link to the prior envelope".to_string()));
        }
        if hash_envelope(envelope)? != envelope.hash {
            return Err(broken("stored hash does not match recomputed hash".to_string()));
        }
        if !self.key.verify(envelope.hash.as_bytes(), &envelope.mac) {
            return Err(broken("mac does not authenticate hash".to_string()));
        }
        Ok(())
    }

    /// Check and advance past one envelope.
    pub fn push(&mut self, envelope: &DecisionEnvelope) -> WardenResult<()> {
        self.check(envelope)?;
        self.next_sequence += 1;
        self.last_hash.clone_from(&envelope.hash);
        self.verified += 1;
        Ok(())
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    pub fn verified(&self) -> u64 {
        self.verified
    }

    /// Result for everything pushed so far.
    pub fn finish(self) -> ChainVerification {
        ChainVerification::intact(self.verified, self.last_hash)
    }
}

/// Walk a sequence of envelopes from `anchor` (or genesis).
pub fn verify_envelopes<'e>(
    envelopes: impl IntoIterator<Item = &'e DecisionEnvelope>,
    key: &SigningKey,
    anchor: Option<&ChainAnchor>,
) -> ChainVerification {
    let mut verifier = ChainVerifier::from_anchor(key, anchor);
    for envelope in envelopes {
        if let Err(err) = verifier.push(envelope) {
            return broken_result(err, &verifier);
        }
    }
    verifier.finish()
}

/// Convert a verifier error into a `ChainVerification`.
pub fn broken_result(err: WardenError, verifier: &ChainVerifier<'_>) -> ChainVerification {
    let (sequence, reason) = match err {
        WardenError::IntegrityViolation { sequence, reason } => (sequence, reason),
        other => (verifier.next_sequence(), other.to_string()),
    };
    ChainVerification::broken(sequence, reason, verifier.verified(), verifier.last_hash())
}
