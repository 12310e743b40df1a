//! Core trait definitions for the WARDEN kernel.
//!
//! These three traits are the kernel's seams with its environment:
//!
//! - `CapabilitySource`: read-only view of grants per task (external authz)
//! - `LedgerBackend`: durable, append-only envelope store
//! - `Clock`: the only source of time the kernel reads
//!
//! Each is chosen at construction and held as a trait object.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use warden_contracts::{
    agent::TaskId,
    capability::CapabilitySet,
    envelope::{ChainAnchor, DecisionEnvelope},
    error::WardenResult,
};

/// Supplies the capability grants active for a task.
///
/// The kernel only reads grants; it never creates or elevates them.
pub trait CapabilitySource: Send + Sync {
    fn grants_for(&self, task_id: &TaskId) -> CapabilitySet;
}

/// What compaction left behind: the anchor the chain resumes from and the
/// replay state at that point, if one was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotInfo {
    pub anchor: ChainAnchor,
    pub checkpoint: Option<Value>,
}

/// Lazy, ordered stream of stored envelopes.
pub type EnvelopeIter<'a> = Box<dyn Iterator<Item = WardenResult<DecisionEnvelope>> + 'a>;

/// The durable envelope store.
///
/// Implementations must treat `log_event` as a single atomic append: after
/// it returns `Ok`, the envelope survives a crash; after it returns `Err`,
/// nothing was written.
pub trait LedgerBackend: Send + Sync {
    /// Append one sealed envelope.
    ///
    /// Rejects envelopes that do not continue the stored chain.
    fn log_event(&self, envelope: &DecisionEnvelope) -> WardenResult<()>;

    /// Stream every retained envelope in sequence order.
    ///
    /// Calling again starts a fresh pass from the beginning.
    fn read_all(&self) -> WardenResult<EnvelopeIter<'_>>;

    /// The most recent compaction snapshot, if any.
    fn snapshot(&self) -> WardenResult<Option<SnapshotInfo>>;

    /// Replace every envelope before `keep_from` with a snapshot.
    fn compact(&self, keep_from: u64, checkpoint: Option<Value>) -> WardenResult<ChainAnchor>;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}
