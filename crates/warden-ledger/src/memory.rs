//! In-memory implementation of `LedgerBackend`.
//!
//! `MemoryLedger` enforces the same append rules as `FileLedger` (sequence
//! continuity and hash linkage) without touching disk. Clones share one
//! store, so a kernel can be reopened on the same contents.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::info;

use warden_contracts::{
    envelope::{ChainAnchor, DecisionEnvelope, GENESIS_HASH},
    error::{WardenError, WardenResult},
};
use warden_core::traits::{EnvelopeIter, LedgerBackend, SnapshotInfo};

struct MemoryState {
    snapshot: Option<SnapshotInfo>,
    envelopes: Vec<DecisionEnvelope>,
    next_sequence: u64,
    head_hash: String,
}

#[derive(Clone)]
pub struct MemoryLedger {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                snapshot: None,
                envelopes: Vec::new(),
                next_sequence: 0,
                head_hash: GENESIS_HASH.to_string(),
            })),
        }
    }

    /// Copy of every retained envelope.
    pub fn envelopes(&self) -> Vec<DecisionEnvelope> {
        self.lock().envelopes.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryLedger")
            .field("envelopes", &state.envelopes.len())
            .field("next_sequence", &state.next_sequence)
            .finish()
    }
}

impl LedgerBackend for MemoryLedger {
    fn log_event(&self, envelope: &DecisionEnvelope) -> WardenResult<()> {
        let mut state = self.lock();
        if envelope.sequence != state.next_sequence {
            return Err(WardenError::SequenceMismatch {
                expected: state.next_sequence,
                found: envelope.sequence,
            });
        }
        if envelope.previous_hash != state.head_hash {
            return Err(WardenError::IntegrityViolation {
                sequence: envelope.sequence,
                reason: "previous_hash does not match the ledger head".to_string(),
            });
        }

        state.next_sequence += 1;
        state.head_hash.clone_from(&envelope.hash);
        state.envelopes.push(envelope.clone());
        Ok(())
    }

    fn read_all(&self) -> WardenResult<EnvelopeIter<'_>> {
        let envelopes = self.envelopes();
        Ok(Box::new(envelopes.into_iter().map(Ok)))
    }

    fn snapshot(&self) -> WardenResult<Option<SnapshotInfo>> {
        Ok(self.lock().snapshot.clone())
    }

    fn compact(&self, keep_from: u64, checkpoint: Option<Value>) -> WardenResult<ChainAnchor> {
        let mut state = self.lock();
        let first = state
            .snapshot
            .as_ref()
            .map_or(0, |s| s.anchor.next_sequence());
        if keep_from <= first || keep_from > state.next_sequence {
            return Err(WardenError::CompactionRejected {
                reason: format!(
                    "keep_from {} outside ({}, {}]",
                    keep_from, first, state.next_sequence
                ),
            });
        }

        let root_hash = state
            .envelopes
            .iter()
            .find(|e| e.sequence + 1 == keep_from)
            .map(|e| e.hash.clone())
            .ok_or_else(|| WardenError::CompactionRejected {
                reason: format!("envelope {} not retained", keep_from - 1),
            })?;
        let anchor = ChainAnchor {
            compacted_through: keep_from - 1,
            root_hash,
        };

        state.envelopes.retain(|e| e.sequence >= keep_from);
        state.snapshot = Some(SnapshotInfo {
            anchor: anchor.clone(),
            checkpoint,
        });
        info!(
            compacted_through = anchor.compacted_through,
            retained = state.envelopes.len(),
            "memory ledger compacted"
        );
        Ok(anchor)
    }
}
