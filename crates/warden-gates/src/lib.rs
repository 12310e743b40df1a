//! # warden-gates
//!
//! Stateless pre-execution checks for proposed agent actions.
//!
//! ## Overview
//!
//! [`GateEvaluator`] runs four independent gates over every request:
//!
//! | gate               | denies when                                         |
//! |--------------------|-----------------------------------------------------|
//! | `destructive`      | payload matches a destructive signature             |
//! | `tool-allowlist`   | no grant covers the resource, or its limit is spent |
//! | `diff-size`        | an edit changes more lines than the ceiling         |
//! | `secret-detection` | payload looks like it carries a credential          |
//!
//! Two context verdicts, `budget` and `privilege`, are derived from the
//! caller-supplied coherence and budget views. All six are kept for audit and
//! folded into one decision, strictest wins (`deny > warn > allow`).
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use warden_gates::GateEvaluator;
//!
//! let evaluator = GateEvaluator::from_file(Path::new("policies/gates.toml"))?;
//! let evaluation = evaluator.evaluate(&request, &coherence, &budget, &capabilities)?;
//! ```

pub mod config;
pub mod engine;
pub mod gates;

pub use config::{GateConfig, SignatureRule};
pub use engine::GateEvaluator;
pub use gates::{Gate, GateContext};

// ── Tests ─────────────────────────────────────────────────────────────────────
