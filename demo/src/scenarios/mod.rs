//! Walk-through scenarios driving a real kernel end to end.
//!
//! Each scenario builds its own kernel (in memory, or on a file ledger in a
//! temporary directory), submits requests and prints what the gates, the
//! coherence scheduler and the ledger did with them.

pub mod gates;
pub mod recovery;
pub mod replay;
pub mod suspension;

use warden_contracts::verdict::Decision;
use warden_core::DecisionReceipt;

/// Print the aggregate decision and every non-allow verdict.
pub fn print_receipt(receipt: &DecisionReceipt) {
    println!("  Aggregate decision:     {}", receipt.decision());
    for verdict in receipt.evaluation.all_verdicts() {
        if verdict.decision == Decision::Allow {
            continue;
        }
        println!(
            "    {:<8} {:<18} {}",
            verdict.decision.as_str(),
            verdict.gate_name,
            verdict.reason
        );
        if !verdict.evidence.is_null() {
            println!("             evidence: {}", verdict.evidence);
        }
    }
    println!(
        "  Envelope:               #{} {}",
        receipt.envelope.sequence,
        short(&receipt.envelope.hash)
    );
    println!(
        "  Coherence after:        {:.2} ({})",
        receipt.coherence.score, receipt.coherence.privilege_level
    );
}

pub fn print_result(expected: Decision, actual: Decision) {
    if expected == actual {
        println!("  RESULT: {} (expected)", actual);
    } else {
        println!("  RESULT: {} (UNEXPECTED, wanted {})", actual, expected);
    }
}

/// First twelve hex characters of a hash.
pub fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
