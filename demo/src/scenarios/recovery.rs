//! Crash recovery and tamper detection on a file ledger.

use std::{fs, io::Write, path::Path};

use serde_json::{json, Value};

use warden_contracts::{
    action::{ActionRequest, ActionType},
    agent::AgentId,
    error::{WardenError, WardenResult},
};
use warden_ledger::LEDGER_FILE;

use crate::setup::{demo_key, open_kernel, temp_dir, PolicyArgs};

fn read(agent: &str, path: &str) -> ActionRequest {
    ActionRequest::new(
        agent,
        "maintenance",
        ActionType::ToolCall,
        json!({ "tool": "Read", "file_path": path }),
    )
}

fn ledger_io(e: std::io::Error) -> WardenError {
    WardenError::LedgerIo {
        reason: e.to_string(),
    }
}

pub fn run_scenario() -> WardenResult<()> {
    println!("=== Recovery: torn write and tampering ===");
    let dir = temp_dir()?;
    let key = demo_key()?;
    let policies = PolicyArgs::default();

    // ── Step 1: A few decisions, then a crash mid-append ─────────────────────
    {
        let (kernel, _) = open_kernel(dir.path(), &key, &policies)?;
        for (i, agent) in ["indexer", "linter", "indexer"].iter().enumerate() {
            kernel.decide(&read(agent, &format!("src/mod{i}.rs")))?;
        }
    }
    let partial = br#"{"type":"record","format_version":1,"sequence":3,"timest"#;
    fs::OpenOptions::new()
        .append(true)
        .open(dir.path().join(LEDGER_FILE))
        .and_then(|mut f| f.write_all(partial))
        .map_err(ledger_io)?;
    println!("  Simulated crash:        {} bytes of a half-written record", partial.len());

    // ── Step 2: Reopen; the torn tail is discarded ───────────────────────────
    let (kernel, report) = open_kernel(dir.path(), &key, &policies)?;
    println!(
        "  Recovered:              {} record(s), {} byte(s) discarded, chain {}",
        report.records,
        report.discarded_bytes,
        if report.verification.valid { "VERIFIED" } else { "BROKEN" }
    );
    let receipt = kernel.decide(&read("linter", "src/lib.rs"))?;
    println!("  Next append:            #{} ({})", receipt.envelope.sequence, receipt.decision());
    let verification = kernel.verify_integrity()?;
    println!("  Integrity check:        {} envelope(s) VERIFIED", verification.verified);
    drop(kernel);

    // ── Step 3: Tamper with a stored record ──────────────────────────────────
    tamper(dir.path(), 1)?;
    println!("  Tampered:               record #1 reattributed on disk");
    let (kernel, report) = open_kernel(dir.path(), &key, &policies)?;
    println!(
        "  Chain on reopen:        BROKEN at #{} ({})",
        report.verification.broken_at_sequence.unwrap_or_default(),
        report.verification.reason.as_deref().unwrap_or("unknown")
    );
    for agent in ["indexer", "linter"] {
        println!(
            "  {:<23} {}",
            format!("Privilege of {}:", agent),
            kernel.privilege_level(&AgentId::new(agent))
        );
    }
    match kernel.decide(&read("indexer", "src/main.rs")) {
        Err(e @ WardenError::IntegrityViolation { .. }) => {
            println!("  Further decisions:      refused ({})", e);
            println!("  RESULT: IntegrityViolation (expected)");
        }
        Err(e) => println!("  Unexpected error: {}", e),
        Ok(_) => println!("  Unexpectedly accepted a decision on a broken chain"),
    }
    println!();
    Ok(())
}

/// Rewrite the `agent_id` of record `sequence` in place.
fn tamper(dir: &Path, sequence: usize) -> WardenResult<()> {
    let path = dir.join(LEDGER_FILE);
    let text = fs::read_to_string(&path).map_err(ledger_io)?;
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    let Some(line) = lines.get_mut(sequence) else {
        return Err(WardenError::LedgerIo {
            reason: format!("ledger has no record {}", sequence),
        });
    };
    let mut record: Value =
        serde_json::from_str(line).map_err(|e| WardenError::SerializationError {
            reason: e.to_string(),
        })?;
    record["agent_id"] = json!("someone-else");
    *line = record.to_string();
    fs::write(&path, lines.join("\n") + "\n").map_err(ledger_io)
}
