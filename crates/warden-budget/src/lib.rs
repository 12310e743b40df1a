//! # warden-budget
//!
//! Hard and soft resource budgets per agent and run.
//!
//! [`BudgetGovernor`] meters five dimensions (tokens, tool calls, storage
//! bytes, wall-clock milliseconds, cost in micro-USD). Consumption only grows
//! within a run and drops to zero at [`BudgetGovernor::start_run`].

pub mod config;
pub mod governor;

pub use config::{BudgetConfig, DimensionLimit};
pub use governor::BudgetGovernor;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use warden_contracts::{
        agent::AgentId,
        budget::{BudgetDimension, CapKind, Usage},
        error::WardenError,
    };

    use super::*;

    fn capped_governor() -> BudgetGovernor {
        BudgetGovernor::new(
            BudgetConfig::default()
                .with_limit(BudgetDimension::Tokens, DimensionLimit::hard(100))
                .with_limit(BudgetDimension::CostUsd, DimensionLimit::soft(1_000)),
        )
    }

    // ── Config ───────────────────────────────────────────────────────────────

    #[test]
    fn config_parses_toml_sections() {
        let config = BudgetConfig::from_toml_str(
            r#"
            [tokens]
            limit = 500

            [wall_clock_ms]
            limit = 60000
            cap = "soft"
            "#,
        )
        .unwrap();
        assert_eq!(config.tokens, Some(DimensionLimit::hard(500)));
        assert_eq!(config.wall_clock_ms.unwrap().cap, CapKind::Soft);
        assert!(config.limit_for(BudgetDimension::ToolCalls).is_none());
    }

    #[test]
    fn malformed_config_is_config_error() {
        let result = BudgetConfig::from_toml_str("[tokens]\nlimit = \"lots\"");
        assert!(matches!(result, Err(WardenError::ConfigError { .. })));
    }

    // ── Recording ────────────────────────────────────────────────────────────

    #[test]
    fn hard_cap_rejects_overflow_without_mutation() {
        let governor = capped_governor();
        let agent = AgentId::new("a");

        governor
            .record_usage(&agent, BudgetDimension::Tokens, 90)
            .unwrap();
        let err = governor
            .record_usage(&agent, BudgetDimension::Tokens, 11)
            .unwrap_err();
        match err {
            WardenError::BudgetExceeded {
                requested,
                remaining,
                ..
            } => {
                assert_eq!(requested, 11);
                assert_eq!(remaining, 10);
            }
            other => panic!("expected BudgetExceeded, got {:?}", other),
        }
        assert_eq!(governor.remaining(&agent, BudgetDimension::Tokens), 10);

        governor
            .record_usage(&agent, BudgetDimension::Tokens, 10)
            .unwrap();
        assert!(governor.exceeded(&agent, BudgetDimension::Tokens));
    }

    #[test]
    fn soft_cap_accepts_past_limit() {
        let governor = capped_governor();
        let agent = AgentId::new("a");
        let state = governor
            .record_usage(&agent, BudgetDimension::CostUsd, 1_500)
            .unwrap();
        assert_eq!(state.consumed, 1_500);
        assert!(state.exceeded());
        assert_eq!(state.remaining(), 0);
    }

    #[test]
    fn unconfigured_dimension_is_unlimited() {
        let governor = capped_governor();
        let agent = AgentId::new("a");
        governor
            .record_usage(&agent, BudgetDimension::StorageBytes, u64::MAX / 2)
            .unwrap();
        assert!(!governor.exceeded(&agent, BudgetDimension::StorageBytes));
        assert_eq!(
            governor.remaining(&agent, BudgetDimension::StorageBytes),
            u64::MAX
        );
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let governor = capped_governor();
        let agent = AgentId::new("a");
        let result = governor.record_all(
            &agent,
            &[
                Usage::new(BudgetDimension::CostUsd, 10),
                Usage::new(BudgetDimension::Tokens, 60),
                Usage::new(BudgetDimension::Tokens, 60),
            ],
        );
        assert!(result.is_err());
        assert_eq!(governor.state(&agent, BudgetDimension::CostUsd).consumed, 0);
        assert_eq!(governor.state(&agent, BudgetDimension::Tokens).consumed, 0);
    }

    #[test]
    fn can_record_previews_without_mutation() {
        let governor = capped_governor();
        let agent = AgentId::new("a");
        assert!(governor
            .can_record(&agent, &[Usage::new(BudgetDimension::Tokens, 100)])
            .is_ok());
        assert!(governor
            .can_record(&agent, &[Usage::new(BudgetDimension::Tokens, 101)])
            .is_err());
        assert_eq!(governor.state(&agent, BudgetDimension::Tokens).consumed, 0);
    }

    // ── Runs ─────────────────────────────────────────────────────────────────

    #[test]
    fn start_run_resets_consumption() {
        let governor = capped_governor();
        let agent = AgentId::new("a");
        governor
            .record_usage(&agent, BudgetDimension::Tokens, 100)
            .unwrap();

        let run = governor.start_run(&agent);
        assert_eq!(governor.current_run(&agent), Some(run));
        assert_eq!(governor.remaining(&agent, BudgetDimension::Tokens), 100);
    }

    #[test]
    fn restore_reproduces_snapshot() {
        let governor = capped_governor();
        let agent = AgentId::new("a");
        let run = governor.start_run(&agent);
        governor
            .record_usage(&agent, BudgetDimension::Tokens, 42)
            .unwrap();

        let restored = capped_governor();
        restored.restore(&governor.snapshot_all(), &governor.runs());
        assert_eq!(restored.snapshot(&agent), governor.snapshot(&agent));
        assert_eq!(restored.current_run(&agent), Some(run));
        assert_eq!(restored.snapshot_all().len(), 1);
        assert_eq!(BTreeMap::from([(agent, run)]), restored.runs());
    }

    // ── Concurrency ──────────────────────────────────────────────────────────

    #[test]
    fn concurrent_usage_sums_exactly() {
        let governor = BudgetGovernor::default();
        let agent = AgentId::new("busy");

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1_000 {
                        governor
                            .record_usage(&agent, BudgetDimension::Tokens, 3)
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(governor.state(&agent, BudgetDimension::Tokens).consumed, 24_000);
    }

    #[test]
    fn concurrent_usage_never_exceeds_hard_cap() {
        let governor = BudgetGovernor::new(
            BudgetConfig::default().with_limit(BudgetDimension::ToolCalls, DimensionLimit::hard(50)),
        );
        let agent = AgentId::new("busy");
        let accepted = std::sync::atomic::AtomicU64::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..20 {
                        if governor
                            .record_usage(&agent, BudgetDimension::ToolCalls, 1)
                            .is_ok()
                        {
                            accepted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(accepted.into_inner(), 50);
        assert_eq!(governor.state(&agent, BudgetDimension::ToolCalls).consumed, 50);
    }
}
