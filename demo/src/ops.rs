//! Operator commands against an existing ledger directory.

use std::path::Path;

use warden_contracts::error::{WardenError, WardenResult};
use warden_core::replay;
use warden_ledger::FileLedger;
use warden_proof::verify_export;
use warden_validate::RequestValidator;

use crate::{
    scenarios::{print_receipt, short},
    setup::{open_kernel, read_file, signing_key, write_file, PolicyArgs},
};

/// Validate a JSON request file and decide it (or only evaluate it).
pub fn evaluate(ledger: &Path, request: &Path, dry_run: bool, policies: &PolicyArgs) -> WardenResult<()> {
    let validator = RequestValidator::new()?;
    let request = validator.parse_str(&read_file(request)?)?;
    let (kernel, _) = open_kernel(ledger, &signing_key()?, policies)?;

    if dry_run {
        let evaluation = kernel.evaluate(&request)?;
        println!("Decision (dry run): {}", evaluation.decision);
        for verdict in evaluation.all_verdicts() {
            println!("  {:<8} {:<18} {}", verdict.decision.as_str(), verdict.gate_name, verdict.reason);
        }
        return Ok(());
    }

    let receipt = kernel.decide(&request)?;
    print_receipt(&receipt);
    Ok(())
}

/// Recover the ledger and verify the whole chain.
pub fn verify(ledger: &Path, policies: &PolicyArgs) -> WardenResult<()> {
    let (ledger, report) = FileLedger::open(ledger, signing_key()?, policies.ledger_options()?)?;
    if let Some(anchor) = &report.snapshot {
        println!(
            "Snapshot:   through #{} (root {})",
            anchor.compacted_through,
            short(&anchor.root_hash)
        );
    }
    println!("Records:    {}", report.records);
    if report.discarded_bytes > 0 {
        println!("Discarded:  {} byte(s) of incomplete trailing data", report.discarded_bytes);
    }
    println!("Next:       #{}", ledger.next_sequence());

    let verification = &report.verification;
    if verification.valid {
        println!("Chain:      VERIFIED ({} envelope(s))", verification.verified);
    } else {
        let sequence = verification.broken_at_sequence.unwrap_or_default();
        println!("Chain:      BROKEN at #{}", sequence);
        return Err(WardenError::IntegrityViolation {
            sequence,
            reason: verification.reason.clone().unwrap_or_default(),
        });
    }
    Ok(())
}

/// Replay the ledger and print the rebuilt per-agent state.
pub fn replay_ledger(ledger: &Path, policies: &PolicyArgs) -> WardenResult<()> {
    let key = signing_key()?;
    let (ledger, _) = FileLedger::open(ledger, key.clone(), policies.ledger_options()?)?;
    let state = replay(&policies.kernel_config()?, &key, &ledger)?;

    println!("Head:       #{} {}", state.next_sequence, state.head_hash);
    for (agent, coherence) in &state.coherence {
        println!(
            "{:<20} score {:.3}  {:<10} violations {}  rework {}",
            agent.0,
            coherence.score,
            coherence.privilege_level,
            coherence.violation_count,
            coherence.rework_count
        );
        if let Some(budget) = state.budget.get(agent) {
            for dimension in &budget.states {
                if dimension.consumed == 0 {
                    continue;
                }
                match dimension.limit {
                    Some(limit) => println!(
                        "{:<20}   {:<14} {} / {}",
                        "", dimension.dimension.as_str(), dimension.consumed, limit
                    ),
                    None => println!(
                        "{:<20}   {:<14} {}",
                        "", dimension.dimension.as_str(), dimension.consumed
                    ),
                }
            }
        }
    }
    Ok(())
}

pub fn compact(ledger: &Path, keep_from: u64, policies: &PolicyArgs) -> WardenResult<()> {
    let (kernel, _) = open_kernel(ledger, &signing_key()?, policies)?;
    let anchor = kernel.compact(keep_from)?;
    println!(
        "Compacted through #{} (root {}); {} envelope(s) retained",
        anchor.compacted_through,
        anchor.root_hash,
        kernel.next_sequence() - keep_from
    );
    Ok(())
}

/// Write the retained chain as a proof document and check it verifies.
pub fn export(ledger: &Path, out: &Path, policies: &PolicyArgs) -> WardenResult<()> {
    let key = signing_key()?;
    let (kernel, _) = open_kernel(ledger, &key, policies)?;
    let bytes = kernel.export_proof()?;
    write_file(out, &bytes)?;

    let verification = verify_export(&bytes, &key)?;
    println!(
        "Exported {} envelope(s), {} bytes, to {} ({})",
        verification.verified,
        bytes.len(),
        out.display(),
        if verification.valid { "verified" } else { "NOT verified" }
    );
    Ok(())
}
