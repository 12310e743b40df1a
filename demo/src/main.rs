//! WARDEN demo and operator CLI
//!
//! Runs the walk-through scenarios against real kernel components, or
//! operates on an existing ledger directory.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- evaluate --ledger ./ledger --request req.json
//!   cargo run -p demo -- verify --ledger ./ledger
//!   cargo run -p demo -- replay --ledger ./ledger
//!   cargo run -p demo -- compact --ledger ./ledger --keep-from 1000
//!   cargo run -p demo -- export --ledger ./ledger --out proof.json
//!
//! Set WARDEN_SIGNING_KEY (hex) for ledger commands; without it a built-in
//! demo key is used.

mod ops;
mod scenarios;
mod setup;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use warden_contracts::error::WardenResult;

use crate::{
    scenarios::{gates, recovery, replay, suspension},
    setup::PolicyArgs,
};

// ── CLI definition ────────────────────────────────────────────────────────────

/// WARDEN: decision-and-audit kernel for autonomous agents.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "WARDEN kernel demo and operator CLI",
    long_about = "Runs WARDEN scenarios showing gate enforcement, coherence-driven\n\
                  suspension, replay and crash recovery, or operates on a ledger."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every scenario in sequence.
    RunAll,
    /// Scenario A: destructive command denied.
    Destructive,
    /// Scenario B: tool outside the task's grants denied.
    Allowlist,
    /// Scenario C: oversized diff denied.
    DiffSize,
    /// Scenario D: secret in content denied.
    Secret,
    /// Scenario E: two violations suspend the agent.
    Suspension,
    /// Rebuild state from a ledger and compare with the live kernel.
    ReplayDemo,
    /// Recover from a torn write; detect a tampered record.
    Recovery,
    /// Validate a JSON request file and decide it.
    Evaluate {
        #[arg(long, value_name = "DIR")]
        ledger: PathBuf,
        #[arg(long, value_name = "FILE")]
        request: PathBuf,
        /// Evaluate only; record nothing.
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        policies: PolicyArgs,
    },
    /// Recover and verify a ledger.
    Verify {
        #[arg(long, value_name = "DIR")]
        ledger: PathBuf,
        #[command(flatten)]
        policies: PolicyArgs,
    },
    /// Replay a ledger and print per-agent state.
    Replay {
        #[arg(long, value_name = "DIR")]
        ledger: PathBuf,
        #[command(flatten)]
        policies: PolicyArgs,
    },
    /// Fold envelopes before KEEP_FROM into a snapshot.
    Compact {
        #[arg(long, value_name = "DIR")]
        ledger: PathBuf,
        #[arg(long)]
        keep_from: u64,
        #[command(flatten)]
        policies: PolicyArgs,
    },
    /// Export the retained chain as a proof document.
    Export {
        #[arg(long, value_name = "DIR")]
        ledger: PathBuf,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
        #[command(flatten)]
        policies: PolicyArgs,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for per-gate detail.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::RunAll => {
            print_banner();
            run_all()
        }
        Command::Destructive => gates::run_destructive(),
        Command::Allowlist => gates::run_allowlist(),
        Command::DiffSize => gates::run_diff_size(),
        Command::Secret => gates::run_secret(),
        Command::Suspension => suspension::run_scenario(),
        Command::ReplayDemo => replay::run_scenario(),
        Command::Recovery => recovery::run_scenario(),
        Command::Evaluate {
            ledger,
            request,
            dry_run,
            policies,
        } => ops::evaluate(&ledger, &request, dry_run, &policies),
        Command::Verify { ledger, policies } => ops::verify(&ledger, &policies),
        Command::Replay { ledger, policies } => ops::replay_ledger(&ledger, &policies),
        Command::Compact {
            ledger,
            keep_from,
            policies,
        } => ops::compact(&ledger, keep_from, &policies),
        Command::Export {
            ledger,
            out,
            policies,
        } => ops::export(&ledger, &out, &policies),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run_all() -> WardenResult<()> {
    gates::run_destructive()?;
    gates::run_allowlist()?;
    gates::run_diff_size()?;
    gates::run_secret()?;
    suspension::run_scenario()?;
    replay::run_scenario()?;
    recovery::run_scenario()?;
    println!("All scenarios completed.");
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("WARDEN: Decision-and-Audit Kernel");
    println!("==================================");
    println!();
    println!("Per request:");
    println!("  [1] Gates: destructive, tool allowlist, diff size, secret detection");
    println!("  [2] Context: privilege level and budget headroom");
    println!("  [3] Feedback: deny/warn verdicts adjust the agent's coherence score");
    println!("  [4] Usage recorded against the agent's budget (unless denied)");
    println!("  [5] Envelope hash-linked, MAC'd and appended to the ledger");
    println!();
}
