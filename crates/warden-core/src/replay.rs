//! Rebuilding kernel state from the ledger.
//!
//! Every state change the kernel makes is an [`Effect`] stored in an
//! envelope, and [`apply_effect`] is the only function that turns an effect
//! into a mutation. The live kernel and replay both call it with the
//! envelope's timestamp, so replaying a ledger reproduces the live state
//! exactly.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use warden_budget::BudgetGovernor;
use warden_coherence::CoherenceScheduler;
use warden_contracts::{
    agent::{AgentId, RunId},
    budget::BudgetSnapshot,
    coherence::CoherenceState,
    envelope::{ChainAnchor, DecisionEnvelope, Effect},
    error::{WardenError, WardenResult},
};
use warden_proof::{ChainVerifier, SigningKey};

use crate::{config::KernelConfig, traits::LedgerBackend};

/// Coherence and budget state for every agent, plus the chain position it
/// corresponds to. Stored as the compaction checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayState {
    pub coherence: BTreeMap<AgentId, CoherenceState>,
    pub budget: BTreeMap<AgentId, BudgetSnapshot>,
    pub runs: BTreeMap<AgentId, RunId>,
    pub head_hash: String,
    pub next_sequence: u64,
}

impl ReplayState {
    pub fn to_value(&self) -> WardenResult<Value> {
        serde_json::to_value(self).map_err(|e| WardenError::SerializationError {
            reason: format!("failed to encode checkpoint: {}", e),
        })
    }

    pub fn from_value(value: Value) -> WardenResult<Self> {
        serde_json::from_value(value).map_err(|e| WardenError::SerializationError {
            reason: format!("failed to decode checkpoint: {}", e),
        })
    }
}

/// Apply one recorded effect at the time it was recorded.
pub fn apply_effect(
    coherence: &CoherenceScheduler,
    budget: &BudgetGovernor,
    agent_id: &AgentId,
    effect: &Effect,
    at: DateTime<Utc>,
) -> WardenResult<()> {
    match effect {
        Effect::Signal { signal, magnitude } => {
            coherence.record_outcome_at(agent_id, *signal, *magnitude, at)?;
        }
        Effect::Usage { dimension, amount } => budget.apply_usage(agent_id, *dimension, *amount),
        Effect::Reset { reason } => {
            coherence.reset_at(agent_id, reason, at);
        }
        Effect::Suspend { reason } => {
            coherence.suspend_at(agent_id, reason, at);
        }
        Effect::RunReset { run_id } => budget.start_run_with(agent_id, *run_id),
    }
    Ok(())
}

/// Fresh coherence and budget trackers that envelopes are replayed into.
#[derive(Debug)]
pub struct Replayer {
    coherence: CoherenceScheduler,
    budget: BudgetGovernor,
    applied: u64,
}

impl Replayer {
    pub fn new(config: &KernelConfig) -> Self {
        Self {
            coherence: CoherenceScheduler::new(config.coherence.clone()),
            budget: BudgetGovernor::new(config.budget.clone()),
            applied: 0,
        }
    }

    /// Start from a compaction checkpoint instead of empty state.
    pub fn restore(&mut self, checkpoint: &ReplayState) {
        self.coherence.restore(checkpoint.coherence.clone());
        self.budget.restore(&checkpoint.budget, &checkpoint.runs);
    }

    /// Apply every effect of one envelope, in order.
    pub fn apply(&mut self, envelope: &DecisionEnvelope) -> WardenResult<()> {
        for effect in &envelope.effects {
            apply_effect(
                &self.coherence,
                &self.budget,
                &envelope.agent_id,
                effect,
                envelope.timestamp,
            )?;
        }
        self.applied += 1;
        Ok(())
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn state(&self, head_hash: &str, next_sequence: u64) -> ReplayState {
        ReplayState {
            coherence: self.coherence.snapshot_all(),
            budget: self.budget.snapshot_all(),
            runs: self.budget.runs(),
            head_hash: head_hash.to_string(),
            next_sequence,
        }
    }

    pub fn into_parts(self) -> (CoherenceScheduler, BudgetGovernor) {
        (self.coherence, self.budget)
    }
}

/// Load the starting checkpoint recorded by the last compaction, if any.
pub(crate) fn load_checkpoint(
    ledger: &dyn LedgerBackend,
    replayer: &mut Replayer,
) -> WardenResult<Option<ChainAnchor>> {
    let Some(snapshot) = ledger.snapshot()? else {
        return Ok(None);
    };
    if let Some(value) = snapshot.checkpoint {
        let checkpoint = ReplayState::from_value(value)?;
        if checkpoint.next_sequence != snapshot.anchor.next_sequence() {
            return Err(WardenError::IntegrityViolation {
                sequence: snapshot.anchor.compacted_through,
                reason: format!(
                    "checkpoint is at sequence {} but the anchor resumes at {}",
                    checkpoint.next_sequence,
                    snapshot.anchor.next_sequence()
                ),
            });
        }
        replayer.restore(&checkpoint);
        debug!(
            next_sequence = checkpoint.next_sequence,
            agents = checkpoint.coherence.len(),
            "checkpoint restored"
        );
    }
    Ok(Some(snapshot.anchor))
}

/// Rebuild the full kernel state from a ledger, verifying every envelope.
///
/// Fails with [`WardenError::IntegrityViolation`] at the first envelope
/// that does not verify.
pub fn replay(
    config: &KernelConfig,
    key: &SigningKey,
    ledger: &dyn LedgerBackend,
) -> WardenResult<ReplayState> {
    let mut replayer = Replayer::new(config);
    let anchor = load_checkpoint(ledger, &mut replayer)?;

    let mut verifier = ChainVerifier::from_anchor(key, anchor.as_ref());
    for envelope in ledger.read_all()? {
        let envelope = envelope?;
        verifier.push(&envelope)?;
        replayer.apply(&envelope)?;
    }

    info!(
        envelopes = replayer.applied(),
        next_sequence = verifier.next_sequence(),
        "ledger replayed"
    );
    Ok(replayer.state(verifier.last_hash(), verifier.next_sequence()))
}
