//! Scenario E: repeated violations drive an agent to `suspended`.
//!
//! Score starts at 1.0 and each violation costs 0.45: 0.55 (restricted)
//! after the first, 0.10 (suspended) after the second. From then on every
//! request is denied by the privilege check, even a plain read.

use serde_json::json;

use warden_contracts::{
    action::{ActionRequest, ActionType},
    agent::AgentId,
    coherence::PrivilegeLevel,
    error::WardenResult,
    verdict::Decision,
};
use warden_gates::engine::PRIVILEGE;

use crate::{
    scenarios::{print_receipt, print_result},
    setup::{scenario_kernel, PolicyArgs},
};

pub fn run_scenario() -> WardenResult<()> {
    println!("=== Scenario E: Coherence-driven suspension ===");
    println!("  Violation penalty 0.45; suspended below 0.20");
    println!();

    let policies = PolicyArgs::default();
    let mut config = policies.kernel_config()?;
    config.coherence.penalties.violation = 0.45;
    config.coherence.recovery_half_life_secs = None;
    let (kernel, ledger) = scenario_kernel(config, policies.grants()?)?;
    let agent = AgentId::new("rogue-agent");

    let attempts = [
        ("rm -rf /", PrivilegeLevel::Restricted),
        ("git push --force origin main", PrivilegeLevel::Suspended),
    ];
    for (i, (command, expected_level)) in attempts.iter().enumerate() {
        println!("  Step {}: command `{}`", i + 1, command);
        let request = ActionRequest::new(
            agent.0.as_str(),
            "ops",
            ActionType::Command,
            json!({ "command": command }),
        );
        let receipt = kernel.decide(&request)?;
        print_receipt(&receipt);
        print_result(Decision::Deny, receipt.decision());
        if receipt.coherence.privilege_level != *expected_level {
            println!(
                "  UNEXPECTED privilege level {}, wanted {}",
                receipt.coherence.privilege_level, expected_level
            );
        }
        println!();
    }

    println!("  Step 3: tool `Read` (harmless, but the agent is suspended)");
    let read = ActionRequest::new(
        agent.0.as_str(),
        "ops",
        ActionType::ToolCall,
        json!({ "tool": "Read", "file_path": "README.md" }),
    );
    let receipt = kernel.decide(&read)?;
    print_receipt(&receipt);
    let by_privilege = receipt
        .evaluation
        .verdict(PRIVILEGE)
        .is_some_and(|v| v.decision.is_deny());
    println!(
        "  Denied by privilege:    {}",
        if by_privilege { "yes" } else { "no" }
    );
    print_result(Decision::Deny, receipt.decision());

    let state = kernel.coherence(&agent);
    println!();
    println!(
        "  Final coherence:        {:.2} ({}), {} violation(s)",
        state.score, state.privilege_level, state.violation_count
    );
    println!("  Envelopes recorded:     {}", ledger.len());
    println!();
    Ok(())
}
