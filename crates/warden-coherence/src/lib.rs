//! # warden-coherence
//!
//! Per-agent trust scoring for the WARDEN kernel.
//!
//! ## Overview
//!
//! [`CoherenceScheduler`] keeps a score in `[0, 1]` for every agent and maps
//! it onto a [`PrivilegeLevel`](warden_contracts::coherence::PrivilegeLevel)
//! through the thresholds in [`CoherenceConfig`]. Violations, rework and
//! drift lower the score. Between signals the score recovers toward the
//! baseline, but never far enough to cross into a higher privilege band:
//! raising privilege takes an explicit [`CoherenceScheduler::reset`].
//!
//! The transition itself is the pure function [`advance`], shared by the live
//! scheduler and by ledger replay.

pub mod config;
pub mod scheduler;

pub use config::{CoherenceConfig, Penalties, Thresholds};
pub use scheduler::{advance, recover, CoherenceScheduler};

// ── Tests ─────────────────────────────────────────────────────────────────────
