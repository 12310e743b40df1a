//! Replay walk-through: rebuild kernel state from the ledger alone.
//!
//! A kernel records a mixed session on a file ledger. The ledger is then
//! reopened cold and replayed; the rebuilt coherence, budget and head hash
//! must equal what the live kernel held. The session is compacted and the
//! comparison repeated, and the retained chain is exported and verified.

use serde_json::json;

use warden_contracts::{
    action::{ActionRequest, ActionType},
    agent::AgentId,
    budget::BudgetDimension,
    coherence::CoherenceSignal,
    error::WardenResult,
};
use warden_core::{replay, ReplayState};
use warden_ledger::FileLedger;
use warden_proof::verify_export;

use crate::{
    scenarios::short,
    setup::{demo_key, open_kernel, temp_dir, PolicyArgs},
};

pub fn run_scenario() -> WardenResult<()> {
    println!("=== Replay: state rebuilt from the ledger ===");
    let dir = temp_dir()?;
    let key = demo_key()?;
    let policies = PolicyArgs::default();
    println!("  Ledger directory:       {}", dir.path().display());

    // ── Step 1: Record a session ─────────────────────────────────────────────
    let (kernel, _) = open_kernel(dir.path(), &key, &policies)?;
    let requests = [
        ("planner", ActionType::ToolCall, json!({ "tool": "Read", "file_path": "Cargo.toml" })),
        ("coder", ActionType::ToolCall, json!({
            "tool": "Edit",
            "file_path": "src/lib.rs",
            "old_string": "fn a() {}",
            "new_string": "fn a() -> u8 { 1 }"
        })),
        ("coder", ActionType::Command, json!({ "command": "cargo test" })),
        ("coder", ActionType::Command, json!({ "command": "rm -rf target/ /" })),
        ("notes", ActionType::MemoryWrite, json!({ "key": "plan", "content": "ship it" })),
    ];
    for (agent, action_type, payload) in requests {
        let request = ActionRequest::new(agent, "session-1", action_type, payload)
            .with_usage(BudgetDimension::Tokens, 1_500);
        let receipt = kernel.decide(&request)?;
        println!(
            "  #{:<3} {:<8} {:<13} {}",
            receipt.envelope.sequence,
            agent,
            action_type.as_str(),
            receipt.decision()
        );
    }
    kernel.record_outcome(&AgentId::new("coder"), CoherenceSignal::Rework, 1.0)?;
    kernel.record_usage(&AgentId::new("planner"), BudgetDimension::CostUsd, 42_000)?;
    let live = kernel.state();
    drop(kernel);
    println!("  Live head:              #{} {}", live.next_sequence, short(&live.head_hash));

    // ── Step 2: Replay cold ──────────────────────────────────────────────────
    let replayed = replay_dir(dir.path(), &policies)?;
    report("Replay", &live, &replayed);

    // ── Step 3: Compact, reopen, replay again ────────────────────────────────
    let (kernel, _) = open_kernel(dir.path(), &key, &policies)?;
    let anchor = kernel.compact(live.next_sequence - 2)?;
    println!(
        "  Compacted through:      #{} (root {})",
        anchor.compacted_through,
        short(&anchor.root_hash)
    );
    drop(kernel);
    let (kernel, report_after) = open_kernel(dir.path(), &key, &policies)?;
    println!("  Records after compact:  {}", report_after.records);
    report("Reopen after compaction", &live, &kernel.state());
    let replayed = replay_dir(dir.path(), &policies)?;
    report("Replay after compaction", &live, &replayed);

    // ── Step 4: Export and verify independently ──────────────────────────────
    let export = kernel.export_proof()?;
    let verification = verify_export(&export, &key)?;
    println!(
        "  Exported proof:         {} bytes, {} envelope(s) {}",
        export.len(),
        verification.verified,
        if verification.valid { "VERIFIED" } else { "FAILED" }
    );
    println!();
    Ok(())
}

fn replay_dir(dir: &std::path::Path, policies: &PolicyArgs) -> WardenResult<ReplayState> {
    let key = demo_key()?;
    let (ledger, _) = FileLedger::open(dir, key.clone(), policies.ledger_options()?)?;
    replay(&policies.kernel_config()?, &key, &ledger)
}

fn report(label: &str, live: &ReplayState, rebuilt: &ReplayState) {
    let verdict = if live == rebuilt { "MATCH" } else { "MISMATCH" };
    println!("  {:<23} {}", format!("{}:", label), verdict);
    for (agent, state) in &rebuilt.coherence {
        let tokens = rebuilt
            .budget
            .get(agent)
            .and_then(|b| b.get(BudgetDimension::Tokens))
            .map_or(0, |s| s.consumed);
        println!(
            "    {:<10} score {:.2} {:<10} tokens {}",
            agent.0, state.score, state.privilege_level, tokens
        );
    }
}
