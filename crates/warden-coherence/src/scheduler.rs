//! The coherence scheduler: per-agent trust score and privilege level.
//!
//! Each agent's state sits behind its own `Mutex`, so two signals for the
//! same agent serialize and neither is lost, while different agents never
//! contend. The privilege level is recomputed inside the same critical
//! section as the score, so no reader observes a new score with a stale
//! level.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use warden_contracts::{
    agent::AgentId,
    coherence::{CoherenceSignal, CoherenceState, PrivilegeLevel},
    error::{WardenError, WardenResult},
};

use crate::config::CoherenceConfig;

type Slot = Arc<Mutex<CoherenceState>>;

/// Tracks coherence for every agent the kernel has seen.
#[derive(Debug, Default)]
pub struct CoherenceScheduler {
    config: CoherenceConfig,
    agents: RwLock<HashMap<AgentId, Slot>>,
}

impl CoherenceScheduler {
    pub fn new(config: CoherenceConfig) -> Self {
        Self {
            config,
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CoherenceConfig {
        &self.config
    }

    /// Apply a signal now. See [`CoherenceScheduler::record_outcome_at`].
    pub fn record_outcome(
        &self,
        agent_id: &AgentId,
        signal: CoherenceSignal,
        magnitude: f64,
    ) -> WardenResult<CoherenceState> {
        self.record_outcome_at(agent_id, signal, magnitude, Utc::now())
    }

    /// Apply a signal observed at `at` and return the updated state.
    ///
    /// Recovery since the last update is applied first, then the penalty.
    /// The privilege level never rises here.
    pub fn record_outcome_at(
        &self,
        agent_id: &AgentId,
        signal: CoherenceSignal,
        magnitude: f64,
        at: DateTime<Utc>,
    ) -> WardenResult<CoherenceState> {
        check_magnitude(magnitude)?;

        let slot = self.slot(agent_id, at);
        let mut state = lock(&slot);
        let next = advance(&self.config, &state, signal, magnitude, at);

        if next.privilege_level != state.privilege_level {
            warn!(
                agent_id = %agent_id,
                from = %state.privilege_level,
                to = %next.privilege_level,
                score = next.score,
                signal = %signal,
                "privilege downgraded"
            );
        } else {
            debug!(
                agent_id = %agent_id,
                score = next.score,
                signal = %signal,
                magnitude,
                "coherence updated"
            );
        }

        *state = next.clone();
        Ok(next)
    }

    /// Compute the state a signal would produce without storing it.
    pub fn preview_outcome_at(
        &self,
        agent_id: &AgentId,
        signal: CoherenceSignal,
        magnitude: f64,
        at: DateTime<Utc>,
    ) -> WardenResult<CoherenceState> {
        check_magnitude(magnitude)?;
        let current = self
            .state(agent_id)
            .unwrap_or_else(|| CoherenceState::pristine(at));
        Ok(advance(&self.config, &current, signal, magnitude, at))
    }

    /// Current privilege level; agents never seen hold `Full`.
    pub fn privilege_level(&self, agent_id: &AgentId) -> PrivilegeLevel {
        self.state(agent_id)
            .map(|s| s.privilege_level)
            .unwrap_or(PrivilegeLevel::Full)
    }

    /// Stored state, if the agent has been seen.
    pub fn state(&self, agent_id: &AgentId) -> Option<CoherenceState> {
        let agents = read(&self.agents);
        agents.get(agent_id).map(|slot| lock(slot).clone())
    }

    /// State handed to the gate evaluator.
    ///
    /// Unknown agents get a pristine state stamped at the Unix epoch, so the
    /// view does not depend on the wall clock.
    pub fn view(&self, agent_id: &AgentId) -> CoherenceState {
        self.state(agent_id)
            .unwrap_or_else(|| CoherenceState::pristine(DateTime::<Utc>::UNIX_EPOCH))
    }

    pub fn reset(&self, agent_id: &AgentId, reason: &str) -> CoherenceState {
        self.reset_at(agent_id, reason, Utc::now())
    }

    /// Explicit operator reset: restore the baseline score and the level it
    /// maps to. Violation and rework counters are history and are kept.
    pub fn reset_at(&self, agent_id: &AgentId, reason: &str, at: DateTime<Utc>) -> CoherenceState {
        let slot = self.slot(agent_id, at);
        let mut state = lock(&slot);
        let previous = state.privilege_level;

        state.score = self.config.baseline;
        state.drift_score = 0.0;
        state.privilege_level = self.config.level_for(self.config.baseline);
        state.last_updated = at.max(state.last_updated);

        info!(
            agent_id = %agent_id,
            from = %previous,
            to = %state.privilege_level,
            reason = %reason,
            "coherence reset"
        );
        state.clone()
    }

    pub fn suspend(&self, agent_id: &AgentId, reason: &str) -> CoherenceState {
        self.suspend_at(agent_id, reason, Utc::now())
    }

    /// Explicit downgrade to `Suspended`, leaving the score untouched.
    pub fn suspend_at(
        &self,
        agent_id: &AgentId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> CoherenceState {
        let slot = self.slot(agent_id, at);
        let mut state = lock(&slot);
        state.privilege_level = PrivilegeLevel::Suspended;
        state.last_updated = at.max(state.last_updated);

        warn!(agent_id = %agent_id, reason = %reason, "agent suspended");
        state.clone()
    }

    /// Every known agent's state, ordered by agent id.
    pub fn snapshot_all(&self) -> BTreeMap<AgentId, CoherenceState> {
        let agents = read(&self.agents);
        agents
            .iter()
            .map(|(id, slot)| (id.clone(), lock(slot).clone()))
            .collect()
    }

    /// Replace all state, e.g. from a compaction checkpoint.
    pub fn restore(&self, states: BTreeMap<AgentId, CoherenceState>) {
        let mut agents = write(&self.agents);
        agents.clear();
        for (id, state) in states {
            agents.insert(id, Arc::new(Mutex::new(state)));
        }
    }

    pub fn known_agents(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = read(&self.agents).keys().cloned().collect();
        ids.sort();
        ids
    }

    fn slot(&self, agent_id: &AgentId, at: DateTime<Utc>) -> Slot {
        if let Some(slot) = read(&self.agents).get(agent_id) {
            return Arc::clone(slot);
        }
        let mut agents = write(&self.agents);
        Arc::clone(
            agents
                .entry(agent_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(CoherenceState::pristine(at)))),
        )
    }
}

/// Pure state transition for one signal.
pub fn advance(
    config: &CoherenceConfig,
    state: &CoherenceState,
    signal: CoherenceSignal,
    magnitude: f64,
    at: DateTime<Utc>,
) -> CoherenceState {
    let mut next = recover(config, state, at);
    next.score = (next.score - config.penalty(signal, magnitude)).clamp(0.0, 1.0);

    match signal {
        CoherenceSignal::Violation | CoherenceSignal::CriticalViolation => {
            next.violation_count += 1
        }
        CoherenceSignal::Rework => next.rework_count += 1,
        CoherenceSignal::Drift => next.drift_score += magnitude,
    }

    next.privilege_level = state
        .privilege_level
        .most_restrictive(config.level_for(next.score));
    if signal == CoherenceSignal::CriticalViolation {
        next.privilege_level = PrivilegeLevel::Suspended;
    }
    next.last_updated = at.max(state.last_updated);
    next
}

/// Decay toward the baseline for the time elapsed since the last update,
/// capped inside the current privilege band.
pub fn recover(
    config: &CoherenceConfig,
    state: &CoherenceState,
    at: DateTime<Utc>,
) -> CoherenceState {
    let mut next = state.clone();
    let Some(half_life) = config.recovery_half_life_secs else {
        return next;
    };

    let elapsed_ms = (at - state.last_updated).num_milliseconds();
    if elapsed_ms <= 0 || state.score >= config.baseline {
        return next;
    }

    let factor = 0.5f64.powf(elapsed_ms as f64 / 1000.0 / half_life);
    let recovered = config.baseline - (config.baseline - state.score) * factor;
    let ceiling = config.band_ceiling(state.privilege_level);
    next.score = recovered.min(ceiling).max(state.score).clamp(0.0, 1.0);
    next
}

fn check_magnitude(magnitude: f64) -> WardenResult<()> {
    if magnitude.is_finite() && magnitude >= 0.0 {
        Ok(())
    } else {
        Err(WardenError::RequestInvalid {
            reason: format!("signal magnitude must be finite and non-negative, got {}", magnitude),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
