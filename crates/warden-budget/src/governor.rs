//! The economic governor: per-agent, per-run resource meters.
//!
//! Each agent's five meters share one `Mutex`, so a usage record (or a batch
//! of them) is checked and applied in a single critical section. Concurrent
//! additions for the same `(agent, dimension)` therefore sum exactly, and a
//! hard cap is checked against the value that is actually updated.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::{debug, info, warn};

use warden_contracts::{
    agent::{AgentId, RunId},
    budget::{BudgetDimension, BudgetSnapshot, BudgetState, CapKind, Usage},
    error::{WardenError, WardenResult},
};

use crate::config::BudgetConfig;

type Meters = [u64; BudgetDimension::ALL.len()];

#[derive(Debug, Default)]
struct AgentMeters {
    run_id: Option<RunId>,
    consumed: Meters,
}

#[derive(Debug, Default)]
pub struct BudgetGovernor {
    config: BudgetConfig,
    agents: RwLock<HashMap<AgentId, Arc<Mutex<AgentMeters>>>>,
}

impl BudgetGovernor {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Add `amount` to one dimension.
    ///
    /// On a hard-capped dimension, usage that would push consumption past
    /// the limit is rejected with [`WardenError::BudgetExceeded`] and nothing
    /// changes. Soft caps always accept.
    pub fn record_usage(
        &self,
        agent_id: &AgentId,
        dimension: BudgetDimension,
        amount: u64,
    ) -> WardenResult<BudgetState> {
        self.record_all(agent_id, &[Usage::new(dimension, amount)])?;
        Ok(self.state(agent_id, dimension))
    }

    /// Add several amounts atomically: either every entry is accepted or
    /// none is.
    pub fn record_all(&self, agent_id: &AgentId, usage: &[Usage]) -> WardenResult<()> {
        let slot = self.slot(agent_id);
        let mut meters = lock(&slot);
        self.check(agent_id, &meters.consumed, usage)?;
        for entry in usage {
            self.add(agent_id, &mut meters.consumed, *entry);
        }
        Ok(())
    }

    /// Whether [`BudgetGovernor::record_all`] would accept `usage` right now.
    pub fn can_record(&self, agent_id: &AgentId, usage: &[Usage]) -> WardenResult<()> {
        let consumed = self.consumed(agent_id);
        self.check(agent_id, &consumed, usage)
    }

    /// Add usage that has already been admitted, without a cap check.
    ///
    /// Used when applying effects from the ledger, where the amount was
    /// accepted at the time it was recorded.
    pub fn apply_usage(&self, agent_id: &AgentId, dimension: BudgetDimension, amount: u64) {
        let slot = self.slot(agent_id);
        let mut meters = lock(&slot);
        self.add(agent_id, &mut meters.consumed, Usage::new(dimension, amount));
    }

    pub fn remaining(&self, agent_id: &AgentId, dimension: BudgetDimension) -> u64 {
        self.state(agent_id, dimension).remaining()
    }

    pub fn exceeded(&self, agent_id: &AgentId, dimension: BudgetDimension) -> bool {
        self.state(agent_id, dimension).exceeded()
    }

    pub fn state(&self, agent_id: &AgentId, dimension: BudgetDimension) -> BudgetState {
        let consumed = self.consumed(agent_id);
        self.state_from(dimension, consumed[dimension.index()])
    }

    /// Read-only view of all five dimensions, for the gate evaluator.
    pub fn snapshot(&self, agent_id: &AgentId) -> BudgetSnapshot {
        let consumed = self.consumed(agent_id);
        BudgetSnapshot {
            states: BudgetDimension::ALL
                .iter()
                .map(|d| self.state_from(*d, consumed[d.index()]))
                .collect(),
        }
    }

    /// Start a new run: every dimension of the agent drops to zero.
    pub fn start_run(&self, agent_id: &AgentId) -> RunId {
        let run_id = RunId::new();
        self.start_run_with(agent_id, run_id);
        run_id
    }

    /// Start a run with a known id, as recorded in the ledger.
    pub fn start_run_with(&self, agent_id: &AgentId, run_id: RunId) {
        let slot = self.slot(agent_id);
        let mut meters = lock(&slot);
        meters.run_id = Some(run_id);
        meters.consumed = Meters::default();
        info!(agent_id = %agent_id, run_id = %run_id, "budget run started");
    }

    pub fn current_run(&self, agent_id: &AgentId) -> Option<RunId> {
        let agents = read(&self.agents);
        agents.get(agent_id).and_then(|slot| lock(slot).run_id)
    }

    /// Budget view for every known agent.
    pub fn snapshot_all(&self) -> BTreeMap<AgentId, BudgetSnapshot> {
        let mut ids: Vec<AgentId> = read(&self.agents).keys().cloned().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| {
                let snapshot = self.snapshot(&id);
                (id, snapshot)
            })
            .collect()
    }

    /// Current run id for every agent that has started one.
    pub fn runs(&self) -> BTreeMap<AgentId, RunId> {
        let agents = read(&self.agents);
        agents
            .iter()
            .filter_map(|(id, slot)| lock(slot).run_id.map(|run| (id.clone(), run)))
            .collect()
    }

    /// Replace all meters. Limits always come from configuration; only the
    /// consumed amounts of `budgets` are used.
    pub fn restore(
        &self,
        budgets: &BTreeMap<AgentId, BudgetSnapshot>,
        runs: &BTreeMap<AgentId, RunId>,
    ) {
        let mut agents = write(&self.agents);
        agents.clear();

        for (id, snapshot) in budgets {
            let mut meters = AgentMeters::default();
            for state in &snapshot.states {
                meters.consumed[state.dimension.index()] = state.consumed;
            }
            meters.run_id = runs.get(id).copied();
            agents.insert(id.clone(), Arc::new(Mutex::new(meters)));
        }
        for (id, run) in runs {
            agents.entry(id.clone()).or_insert_with(|| {
                Arc::new(Mutex::new(AgentMeters {
                    run_id: Some(*run),
                    consumed: Meters::default(),
                }))
            });
        }
    }

    fn check(&self, agent_id: &AgentId, consumed: &Meters, usage: &[Usage]) -> WardenResult<()> {
        let mut pending = *consumed;
        for entry in usage {
            let slot = &mut pending[entry.dimension.index()];
            let state = self.state_from(entry.dimension, *slot);
            if state.cap == CapKind::Hard && state.would_overflow(entry.amount) {
                warn!(
                    agent_id = %agent_id,
                    dimension = %entry.dimension,
                    requested = entry.amount,
                    remaining = state.remaining(),
                    "hard budget cap would be exceeded"
                );
                return Err(WardenError::BudgetExceeded {
                    agent_id: agent_id.to_string(),
                    dimension: entry.dimension.to_string(),
                    requested: entry.amount,
                    remaining: state.remaining(),
                });
            }
            *slot = slot.saturating_add(entry.amount);
        }
        Ok(())
    }

    fn add(&self, agent_id: &AgentId, consumed: &mut Meters, usage: Usage) {
        let slot = &mut consumed[usage.dimension.index()];
        *slot = slot.saturating_add(usage.amount);

        let state = self.state_from(usage.dimension, *slot);
        if state.exceeded() && state.cap == CapKind::Soft {
            warn!(
                agent_id = %agent_id,
                dimension = %usage.dimension,
                consumed = state.consumed,
                "soft budget limit reached"
            );
        } else {
            debug!(
                agent_id = %agent_id,
                dimension = %usage.dimension,
                amount = usage.amount,
                consumed = *slot,
                "usage recorded"
            );
        }
    }

    fn state_from(&self, dimension: BudgetDimension, consumed: u64) -> BudgetState {
        match self.config.limit_for(dimension) {
            Some(limit) => BudgetState {
                dimension,
                limit: Some(limit.limit),
                consumed,
                cap: limit.cap,
            },
            None => BudgetState {
                consumed,
                ..BudgetState::unlimited(dimension)
            },
        }
    }

    fn consumed(&self, agent_id: &AgentId) -> Meters {
        let agents = read(&self.agents);
        agents
            .get(agent_id)
            .map(|slot| lock(slot).consumed)
            .unwrap_or_default()
    }

    fn slot(&self, agent_id: &AgentId) -> Arc<Mutex<AgentMeters>> {
        if let Some(slot) = read(&self.agents).get(agent_id) {
            return Arc::clone(slot);
        }
        let mut agents = write(&self.agents);
        Arc::clone(agents.entry(agent_id.clone()).or_default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
