//! The `Kernel`: one object that decides, records and remembers.
//!
//! Every mutation goes through the same commit phase, serialized by a single
//! mutex:
//!
//!   1. seal the envelope onto the chain head
//!   2. append it to the ledger
//!   3. link it into the in-memory chain
//!   4. apply its effects
//!
//! If step 2 fails nothing has changed, so the ledger and the in-memory state
//! cannot diverge.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use warden_budget::BudgetGovernor;
use warden_coherence::CoherenceScheduler;
use warden_contracts::{
    action::ActionRequest,
    agent::{AgentId, RunId},
    budget::{BudgetDimension, BudgetSnapshot, BudgetState, Usage},
    coherence::{CoherenceSignal, CoherenceState, PrivilegeLevel},
    envelope::{
        ChainAnchor, ChainVerification, DecisionEnvelope, Effect, EntryKind, GENESIS_HASH,
    },
    error::{WardenError, WardenResult},
    verdict::{Decision, Evaluation},
};
use warden_gates::GateEvaluator;
use warden_proof::{verify_envelopes, ChainEntry, ProofChain, SigningKey};

use crate::{
    config::KernelConfig,
    grants::StaticCapabilities,
    replay::{apply_effect, load_checkpoint, ReplayState, Replayer},
    traits::{CapabilitySource, Clock, LedgerBackend, SystemClock},
};

/// What a caller gets back from [`Kernel::decide`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionReceipt {
    pub evaluation: Evaluation,
    /// The envelope recorded for this decision.
    pub envelope: DecisionEnvelope,
    /// Agent coherence after the decision's effects were applied.
    pub coherence: CoherenceState,
}

impl DecisionReceipt {
    pub fn decision(&self) -> Decision {
        self.evaluation.decision
    }

    pub fn is_denied(&self) -> bool {
        self.evaluation.decision.is_deny()
    }
}

/// State guarded by the commit mutex.
struct CommitState {
    chain: ProofChain,
    /// Checkpoint the retained envelopes start from.
    base: Option<ReplayState>,
    /// Set once an integrity failure is found; appends are refused after.
    broken: Option<ChainVerification>,
}

/// Assembles a [`Kernel`].
pub struct KernelBuilder {
    key: SigningKey,
    config: KernelConfig,
    evaluator: Option<GateEvaluator>,
    capabilities: Box<dyn CapabilitySource>,
    clock: Box<dyn Clock>,
}

impl KernelBuilder {
    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn evaluator(mut self, evaluator: GateEvaluator) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn capabilities(mut self, source: impl CapabilitySource + 'static) -> Self {
        self.capabilities = Box::new(source);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Open the kernel on `ledger`, rebuilding state from what it holds.
    pub fn open(self, ledger: impl LedgerBackend + 'static) -> WardenResult<Kernel> {
        let evaluator = match self.evaluator {
            Some(evaluator) => evaluator,
            None => GateEvaluator::with_defaults()?,
        };
        Kernel::open_parts(
            self.key,
            self.config,
            evaluator,
            self.capabilities,
            Box::new(ledger),
            self.clock,
        )
    }
}

/// The decision-and-audit kernel.
pub struct Kernel {
    config: KernelConfig,
    evaluator: GateEvaluator,
    coherence: CoherenceScheduler,
    budget: BudgetGovernor,
    capabilities: Box<dyn CapabilitySource>,
    ledger: Box<dyn LedgerBackend>,
    clock: Box<dyn Clock>,
    commit: Mutex<CommitState>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("gates", &self.evaluator.gate_names())
            .field("agents", &self.coherence.known_agents().len())
            .finish_non_exhaustive()
    }
}

impl Kernel {
    pub fn builder(key: SigningKey) -> KernelBuilder {
        KernelBuilder {
            key,
            config: KernelConfig::default(),
            evaluator: None,
            capabilities: Box::new(StaticCapabilities::default()),
            clock: Box::new(SystemClock),
        }
    }

    fn open_parts(
        key: SigningKey,
        config: KernelConfig,
        evaluator: GateEvaluator,
        capabilities: Box<dyn CapabilitySource>,
        ledger: Box<dyn LedgerBackend>,
        clock: Box<dyn Clock>,
    ) -> WardenResult<Self> {
        config.validate()?;

        // ── Step 1: Load the compaction checkpoint ────────────────────────
        // A snapshot that fails verification leaves nothing to start from.
        let mut replayer = Replayer::new(&config);
        let (anchor, bad_snapshot) = match load_checkpoint(ledger.as_ref(), &mut replayer) {
            Ok(anchor) => (anchor, None),
            Err(WardenError::IntegrityViolation { sequence, reason }) => (
                None,
                Some(ChainVerification::broken(sequence, reason, 0, GENESIS_HASH)),
            ),
            Err(err) => return Err(err),
        };
        let base = anchor
            .as_ref()
            .map(|a| replayer.state(&a.root_hash, a.next_sequence()));
        let first = anchor.as_ref().map_or(0, ChainAnchor::next_sequence);

        // ── Step 2: Read the retained envelopes ──────────────────────────
        let (envelopes, unreadable) = read_stored(ledger.as_ref())?;

        // ── Step 3: Verify, and replay the verified prefix ───────────────
        let (chain, verification) = ProofChain::restore(key, anchor, envelopes);
        let verification = match bad_snapshot {
            Some(broken) => broken,
            None => flag_unreadable(verification, first, unreadable),
        };
        let trusted = verification.verified as usize;
        for envelope in &chain.envelopes()[..trusted] {
            replayer.apply(envelope)?;
        }
        let (coherence, budget) = replayer.into_parts();

        let kernel = Self {
            config,
            evaluator,
            coherence,
            budget,
            capabilities,
            ledger,
            clock,
            commit: Mutex::new(CommitState {
                chain,
                base,
                broken: None,
            }),
        };

        // ── Step 4: Contain a broken chain ───────────────────────────────
        if !verification.valid {
            let mut commit = kernel.lock_commit();
            kernel.contain(&mut commit, verification);
        } else {
            info!(
                envelopes = verification.verified,
                head = %verification.head_hash,
                "kernel opened"
            );
        }
        Ok(kernel)
    }

    // ── Decisions ────────────────────────────────────────────────────────

    /// Evaluate a request without recording anything.
    pub fn evaluate(&self, request: &ActionRequest) -> WardenResult<Evaluation> {
        let capabilities = self.capabilities.grants_for(&request.task_id);
        self.evaluator.evaluate(
            request,
            &self.coherence.view(&request.agent_id),
            &self.budget.snapshot(&request.agent_id),
            &capabilities,
        )
    }

    /// Decide on a request and record the decision.
    ///
    /// Evaluation runs inside the commit phase so that budget and privilege
    /// are read in the same state the effects are applied to. The returned
    /// receipt holds the envelope exactly as stored.
    pub fn decide(&self, request: &ActionRequest) -> WardenResult<DecisionReceipt> {
        request.validate()?;
        let capabilities = self.capabilities.grants_for(&request.task_id);

        let mut commit = self.lock_commit();
        self.ensure_intact(&commit)?;
        let at = self.clock.now();
        let agent_id = &request.agent_id;

        // ── Step 1: Evaluate against current state ───────────────────────
        let evaluation = self.evaluator.evaluate(
            request,
            &self.coherence.view(agent_id),
            &self.budget.snapshot(agent_id),
            &capabilities,
        )?;

        // ── Step 2: Derive effects ───────────────────────────────────────
        let mut effects = Vec::new();
        if let Some((signal, magnitude)) = self.feedback_for(&evaluation) {
            effects.push(Effect::Signal { signal, magnitude });
        }
        if !evaluation.decision.is_deny() {
            let usage = request.implied_usage();
            self.budget.can_record(agent_id, &usage)?;
            effects.extend(usage.into_iter().map(|u| Effect::Usage {
                dimension: u.dimension,
                amount: u.amount,
            }));
        }

        // ── Step 3: Record ───────────────────────────────────────────────
        let entry = ChainEntry::decision(request, &evaluation, effects, at)?;
        let envelope = self.persist(&mut commit, entry)?;

        let coherence = self.coherence.view(agent_id);
        match evaluation.decision {
            Decision::Deny => warn!(
                agent_id = %agent_id,
                resource = %request.resource(),
                sequence = envelope.sequence,
                reasons = ?evaluation.reasons(),
                "action denied"
            ),
            Decision::Warn => info!(
                agent_id = %agent_id,
                resource = %request.resource(),
                sequence = envelope.sequence,
                reasons = ?evaluation.reasons(),
                "action allowed with warnings"
            ),
            Decision::Allow => debug!(
                agent_id = %agent_id,
                resource = %request.resource(),
                sequence = envelope.sequence,
                "action allowed"
            ),
        }

        Ok(DecisionReceipt {
            evaluation,
            envelope,
            coherence,
        })
    }

    /// Coherence feedback for an evaluation, from gate verdicts only.
    fn feedback_for(&self, evaluation: &Evaluation) -> Option<(CoherenceSignal, f64)> {
        let feedback = &self.config.feedback;
        match evaluation.gate_decision() {
            Decision::Deny => {
                let critical = evaluation.verdicts.iter().any(|v| {
                    v.decision.is_deny() && feedback.critical_gates.contains(&v.gate_name)
                });
                let signal = if critical {
                    CoherenceSignal::CriticalViolation
                } else {
                    feedback.deny_signal
                };
                Some((signal, feedback.deny_magnitude))
            }
            Decision::Warn => Some((feedback.warn_signal, feedback.warn_magnitude)),
            Decision::Allow => None,
        }
    }

    // ── Outcomes and overrides ───────────────────────────────────────────

    /// Record a coherence signal observed outside the gates.
    pub fn record_outcome(
        &self,
        agent_id: &AgentId,
        signal: CoherenceSignal,
        magnitude: f64,
    ) -> WardenResult<CoherenceState> {
        let mut commit = self.lock_commit();
        self.ensure_intact(&commit)?;
        let at = self.clock.now();
        self.coherence
            .preview_outcome_at(agent_id, signal, magnitude, at)?;

        let effects = vec![Effect::Signal { signal, magnitude }];
        let entry = ChainEntry::override_entry(EntryKind::Outcome, agent_id.clone(), effects, at);
        self.persist(&mut commit, entry)?;
        Ok(self.coherence.view(agent_id))
    }

    /// Record resource usage reported after the fact.
    ///
    /// Hard-capped dimensions reject usage that would overflow; nothing is
    /// recorded in that case.
    pub fn record_usage(
        &self,
        agent_id: &AgentId,
        dimension: BudgetDimension,
        amount: u64,
    ) -> WardenResult<BudgetState> {
        let mut commit = self.lock_commit();
        self.ensure_intact(&commit)?;
        self.budget
            .can_record(agent_id, &[Usage::new(dimension, amount)])?;

        let effects = vec![Effect::Usage { dimension, amount }];
        let at = self.clock.now();
        let entry = ChainEntry::override_entry(EntryKind::Usage, agent_id.clone(), effects, at);
        self.persist(&mut commit, entry)?;
        Ok(self.budget.state(agent_id, dimension))
    }

    /// Restore an agent to baseline coherence.
    pub fn reset(&self, agent_id: &AgentId, reason: &str) -> WardenResult<CoherenceState> {
        let effect = Effect::Reset {
            reason: reason.to_string(),
        };
        self.override_action(EntryKind::Reset, agent_id, effect)?;
        info!(agent_id = %agent_id, reason, "coherence reset");
        Ok(self.coherence.view(agent_id))
    }

    /// Force an agent to `Suspended`.
    pub fn suspend(&self, agent_id: &AgentId, reason: &str) -> WardenResult<CoherenceState> {
        let effect = Effect::Suspend {
            reason: reason.to_string(),
        };
        self.override_action(EntryKind::Suspend, agent_id, effect)?;
        Ok(self.coherence.view(agent_id))
    }

    /// Start a new budget run for an agent, zeroing its meters.
    pub fn start_run(&self, agent_id: &AgentId) -> WardenResult<RunId> {
        let run_id = RunId::new();
        self.override_action(EntryKind::RunReset, agent_id, Effect::RunReset { run_id })?;
        Ok(run_id)
    }

    fn override_action(
        &self,
        kind: EntryKind,
        agent_id: &AgentId,
        effect: Effect,
    ) -> WardenResult<DecisionEnvelope> {
        let mut commit = self.lock_commit();
        self.ensure_intact(&commit)?;
        let at = self.clock.now();
        let entry = ChainEntry::override_entry(kind, agent_id.clone(), vec![effect], at);
        self.persist(&mut commit, entry)
    }

    // ── Integrity ────────────────────────────────────────────────────────

    /// Re-read the ledger and verify every stored envelope.
    ///
    /// On failure every agent in the chain is suspended and the kernel stops
    /// accepting appends.
    pub fn verify_integrity(&self) -> WardenResult<ChainVerification> {
        let mut commit = self.lock_commit();
        if let Some(broken) = &commit.broken {
            return Err(integrity_error(broken));
        }

        let anchor = match self.ledger.snapshot() {
            Ok(snapshot) => snapshot.map(|s| s.anchor),
            Err(WardenError::IntegrityViolation { sequence, reason }) => {
                let verification = ChainVerification::broken(sequence, reason, 0, GENESIS_HASH);
                let err = integrity_error(&verification);
                self.contain(&mut commit, verification);
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let first = anchor.as_ref().map_or(0, ChainAnchor::next_sequence);

        let (stored, unreadable) = read_stored(self.ledger.as_ref())?;
        let verification = verify_envelopes(&stored, commit.chain.key(), anchor.as_ref());
        let mut verification = flag_unreadable(verification, first, unreadable);
        if verification.valid && verification.head_hash != commit.chain.head_hash() {
            let reason = format!(
                "ledger head {} does not match kernel head {}",
                verification.head_hash,
                commit.chain.head_hash()
            );
            verification = ChainVerification::broken(
                first + verification.verified,
                reason,
                verification.verified,
                verification.head_hash.clone(),
            );
        }

        if verification.valid {
            debug!(verified = verification.verified, "integrity verified");
            return Ok(verification);
        }
        let err = integrity_error(&verification);
        self.contain(&mut commit, verification);
        Err(err)
    }

    /// Suspend every agent that appears in the chain and refuse further
    /// appends. The suspensions are held in memory only; the ledger cannot be
    /// trusted to record them.
    fn contain(&self, commit: &mut CommitState, verification: ChainVerification) {
        let mut agents: Vec<AgentId> = commit
            .chain
            .envelopes()
            .iter()
            .map(|e| e.agent_id.clone())
            .chain(self.coherence.known_agents())
            .collect();
        agents.sort();
        agents.dedup();

        let reason = format!(
            "ledger integrity violation at sequence {}",
            verification.broken_at_sequence.unwrap_or_default()
        );
        let at = self.clock.now();
        for agent_id in &agents {
            self.coherence.suspend_at(agent_id, &reason, at);
        }
        error!(
            broken_at = ?verification.broken_at_sequence,
            reason = ?verification.reason,
            suspended = agents.len(),
            "integrity violation; agents suspended and ledger frozen"
        );
        commit.broken = Some(verification);
    }

    fn ensure_intact(&self, commit: &CommitState) -> WardenResult<()> {
        match &commit.broken {
            Some(broken) => Err(integrity_error(broken)),
            None => Ok(()),
        }
    }

    // ── Compaction and export ────────────────────────────────────────────

    /// Fold every envelope before `keep_from` into a checkpoint.
    ///
    /// Decisions made after compaction are identical to those made without
    /// it: the checkpoint holds the exact state at the cut.
    pub fn compact(&self, keep_from: u64) -> WardenResult<ChainAnchor> {
        let mut commit = self.lock_commit();
        self.ensure_intact(&commit)?;

        let mut replayer = Replayer::new(&self.config);
        if let Some(base) = &commit.base {
            replayer.restore(base);
        }
        let mut head = commit
            .base
            .as_ref()
            .map(|b| b.head_hash.clone())
            .unwrap_or_default();
        for envelope in commit.chain.envelopes() {
            if envelope.sequence >= keep_from {
                break;
            }
            replayer.apply(envelope)?;
            head.clone_from(&envelope.hash);
        }
        let checkpoint = replayer.state(&head, keep_from);

        // The ledger goes first: if it refuses, memory is untouched.
        let stored = self
            .ledger
            .compact(keep_from, Some(checkpoint.to_value()?))?;
        let anchor = commit.chain.compact(keep_from)?;
        if stored != anchor {
            error!(
                ledger_root = %stored.root_hash,
                chain_root = %anchor.root_hash,
                "ledger and chain anchors disagree after compaction"
            );
            return Err(WardenError::CompactionRejected {
                reason: format!(
                    "ledger anchor {}@{} disagrees with chain anchor {}@{}",
                    stored.root_hash,
                    stored.compacted_through,
                    anchor.root_hash,
                    anchor.compacted_through
                ),
            });
        }
        commit.base = Some(checkpoint);

        info!(
            compacted_through = anchor.compacted_through,
            retained = commit.chain.len(),
            "proof chain compacted"
        );
        Ok(anchor)
    }

    /// The retained chain as a `warden.proof.v1` document.
    pub fn export_proof(&self) -> WardenResult<Vec<u8>> {
        self.lock_commit().chain.export()
    }

    // ── Views ────────────────────────────────────────────────────────────

    pub fn coherence(&self, agent_id: &AgentId) -> CoherenceState {
        self.coherence.view(agent_id)
    }

    pub fn privilege_level(&self, agent_id: &AgentId) -> PrivilegeLevel {
        self.coherence.privilege_level(agent_id)
    }

    pub fn budget(&self, agent_id: &AgentId) -> BudgetSnapshot {
        self.budget.snapshot(agent_id)
    }

    pub fn current_run(&self, agent_id: &AgentId) -> Option<RunId> {
        self.budget.current_run(agent_id)
    }

    /// Full state, comparable with what [`crate::replay`] rebuilds.
    pub fn state(&self) -> ReplayState {
        let commit = self.lock_commit();
        ReplayState {
            coherence: self.coherence.snapshot_all(),
            budget: self.budget.snapshot_all(),
            runs: self.budget.runs(),
            head_hash: commit.chain.head_hash().to_string(),
            next_sequence: commit.chain.next_sequence(),
        }
    }

    pub fn head_hash(&self) -> String {
        self.lock_commit().chain.head_hash().to_string()
    }

    pub fn next_sequence(&self) -> u64 {
        self.lock_commit().chain.next_sequence()
    }

    /// Whether an integrity failure has frozen the kernel.
    pub fn is_frozen(&self) -> bool {
        self.lock_commit().broken.is_some()
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // ── Commit phase ─────────────────────────────────────────────────────

    fn persist(
        &self,
        commit: &mut CommitState,
        entry: ChainEntry,
    ) -> WardenResult<DecisionEnvelope> {
        let envelope = commit.chain.next_envelope(entry)?;
        self.ledger.log_event(&envelope)?;
        commit.chain.commit(envelope.clone())?;

        for effect in &envelope.effects {
            apply_effect(
                &self.coherence,
                &self.budget,
                &envelope.agent_id,
                effect,
                envelope.timestamp,
            )?;
        }
        Ok(envelope)
    }

    fn lock_commit(&self) -> MutexGuard<'_, CommitState> {
        self.commit.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Every envelope the ledger yields up to the first unreadable line, and
/// why that line could not be read.
fn read_stored(
    ledger: &dyn LedgerBackend,
) -> WardenResult<(Vec<DecisionEnvelope>, Option<String>)> {
    let mut stored = Vec::new();
    for envelope in ledger.read_all()? {
        match envelope {
            Ok(envelope) => stored.push(envelope),
            Err(WardenError::LedgerCorrupt { line, reason }) => {
                let reason = format!("ledger line {} is unreadable: {}", line, reason);
                return Ok((stored, Some(reason)));
            }
            Err(err) => return Err(err),
        }
    }
    Ok((stored, None))
}

/// An intact prefix followed by an unreadable line is broken at the line's
/// position in the chain.
fn flag_unreadable(
    verification: ChainVerification,
    first: u64,
    unreadable: Option<String>,
) -> ChainVerification {
    match unreadable {
        Some(reason) if verification.valid => ChainVerification::broken(
            first + verification.verified,
            reason,
            verification.verified,
            verification.head_hash,
        ),
        _ => verification,
    }
}

fn integrity_error(verification: &ChainVerification) -> WardenError {
    WardenError::IntegrityViolation {
        sequence: verification.broken_at_sequence.unwrap_or_default(),
        reason: verification
            .reason
            .clone()
            .unwrap_or_else(|| "chain failed verification".to_string()),
    }
}
