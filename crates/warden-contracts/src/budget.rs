//! Budget dimensions and per-dimension consumption state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One metered resource axis.
///
/// All amounts are unsigned integers. Monetary cost is metered in
/// micro-dollars so concurrent additions stay exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BudgetDimension {
    Tokens,
    ToolCalls,
    StorageBytes,
    WallClockMs,
    /// Cost in micro-USD (1 USD = 1_000_000).
    CostUsd,
}

impl BudgetDimension {
    /// Every dimension, in the fixed order used by snapshots and verdicts.
    pub const ALL: [BudgetDimension; 5] = [
        BudgetDimension::Tokens,
        BudgetDimension::ToolCalls,
        BudgetDimension::StorageBytes,
        BudgetDimension::WallClockMs,
        BudgetDimension::CostUsd,
    ];

    /// Position of this dimension within [`BudgetDimension::ALL`].
    pub fn index(self) -> usize {
        match self {
            BudgetDimension::Tokens => 0,
            BudgetDimension::ToolCalls => 1,
            BudgetDimension::StorageBytes => 2,
            BudgetDimension::WallClockMs => 3,
            BudgetDimension::CostUsd => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetDimension::Tokens => "tokens",
            BudgetDimension::ToolCalls => "tool-calls",
            BudgetDimension::StorageBytes => "storage-bytes",
            BudgetDimension::WallClockMs => "wall-clock-ms",
            BudgetDimension::CostUsd => "cost-usd",
        }
    }
}

impl fmt::Display for BudgetDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a limit is enforced once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapKind {
    /// Exceeding the limit denies the action; usage above the limit is rejected.
    #[default]
    Hard,
    /// Exceeding the limit only warns.
    Soft,
}

/// A single resource amount, either declared by a request or recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub dimension: BudgetDimension,
    pub amount: u64,
}

impl Usage {
    pub fn new(dimension: BudgetDimension, amount: u64) -> Self {
        Self { dimension, amount }
    }
}

/// Consumption of one dimension for one agent within the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetState {
    pub dimension: BudgetDimension,
    /// `None` means the dimension is unmetered.
    pub limit: Option<u64>,
    pub consumed: u64,
    pub cap: CapKind,
}

impl BudgetState {
    pub fn unlimited(dimension: BudgetDimension) -> Self {
        Self {
            dimension,
            limit: None,
            consumed: 0,
            cap: CapKind::Soft,
        }
    }

    /// Amount still available before the limit; `u64::MAX` when unmetered.
    pub fn remaining(&self) -> u64 {
        match self.limit {
            Some(limit) => limit.saturating_sub(self.consumed),
            None => u64::MAX,
        }
    }

    /// True once consumption has reached the limit.
    pub fn exceeded(&self) -> bool {
        self.limit.is_some_and(|limit| self.consumed >= limit)
    }

    /// True if consuming `amount` more would push past the limit.
    pub fn would_overflow(&self, amount: u64) -> bool {
        self.limit
            .is_some_and(|limit| self.consumed.saturating_add(amount) > limit)
    }
}

/// Read-only view of every dimension for one agent, handed to the gate
/// evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub states: Vec<BudgetState>,
}

impl BudgetSnapshot {
    /// A snapshot with every dimension unmetered.
    pub fn unlimited() -> Self {
        Self {
            states: BudgetDimension::ALL
                .iter()
                .map(|d| BudgetState::unlimited(*d))
                .collect(),
        }
    }

    pub fn get(&self, dimension: BudgetDimension) -> Option<&BudgetState> {
        self.states.iter().find(|s| s.dimension == dimension)
    }

    pub fn exceeded(&self, dimension: BudgetDimension) -> bool {
        self.get(dimension).is_some_and(BudgetState::exceeded)
    }
}

impl Default for BudgetSnapshot {
    fn default() -> Self {
        Self::unlimited()
    }
}
