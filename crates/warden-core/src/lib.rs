//! # warden-core
//!
//! The WARDEN decision-and-audit kernel.
//!
//! This crate provides:
//! - The three seams (`CapabilitySource`, `LedgerBackend`, `Clock`)
//! - The `Kernel`, which evaluates requests, records every decision and
//!   override in the proof chain, and applies their effects
//! - `replay`, which rebuilds the same state from a ledger alone
//!
//! ## Usage
//!
//! ```rust,ignore
//! use warden_core::{Kernel, KernelConfig};
//!
//! let kernel = Kernel::builder(key)
//!     .config(KernelConfig::from_file(path)?)
//!     .capabilities(grants)
//!     .open(ledger)?;
//!
//! let receipt = kernel.decide(&request)?;
//! if receipt.is_denied() { /* refuse the action */ }
//! ```

pub mod config;
pub mod grants;
pub mod kernel;
pub mod replay;
pub mod traits;

pub use config::{FeedbackConfig, KernelConfig};
pub use grants::StaticCapabilities;
pub use kernel::{DecisionReceipt, Kernel, KernelBuilder};
pub use replay::{apply_effect, replay, ReplayState, Replayer};
pub use traits::{CapabilitySource, Clock, LedgerBackend, ManualClock, SnapshotInfo, SystemClock};

// ── Tests ─────────────────────────────────────────────────────────────────────
