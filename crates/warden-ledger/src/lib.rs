//! # warden-ledger
//!
//! Durable storage for WARDEN decision envelopes.
//!
//! ## Overview
//!
//! [`FileLedger`] keeps the proof chain in an append-only JSON Lines file.
//! Every append is a single synced write of one complete line, taken under a
//! lock marker so two writers never interleave. On open the file is
//! scanned: a partial trailing record left by a crash is truncated away, the
//! chain is verified from the last compaction snapshot, and a broken chain
//! freezes the ledger against further appends.
//!
//! [`MemoryLedger`] implements the same [`LedgerBackend`] contract in memory.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use warden_ledger::{FileLedger, LedgerOptions};
//!
//! let (ledger, report) = FileLedger::open("/var/lib/warden", key.clone(), LedgerOptions::default())?;
//! assert!(report.verification.valid);
//! let kernel = Kernel::builder(key).open(ledger)?;
//! ```
//!
//! [`LedgerBackend`]: warden_core::LedgerBackend

pub mod file;
pub mod lock;
pub mod memory;
pub mod options;
pub mod record;

pub use file::{FileLedger, RecoveryReport, LEDGER_FILE, LOCK_FILE};
pub use lock::{LedgerLock, LockMarker};
pub use memory::MemoryLedger;
pub use options::{LedgerOptions, RetryPolicy};
pub use record::{LedgerLine, SnapshotRecord};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{
        fs::{self, OpenOptions},
        io::Write,
        path::Path,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
    };

    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use tempfile::tempdir;
    use uuid::Uuid;

    use warden_contracts::{
        action::{ActionRequest, ActionType},
        agent::AgentId,
        capability::CapabilityGrant,
        coherence::{CoherenceSignal, PrivilegeLevel},
        envelope::{DecisionEnvelope, Effect, EntryKind},
        error::WardenError,
    };
    use warden_core::{replay, Kernel, KernelConfig, LedgerBackend, StaticCapabilities};
    use warden_proof::{ChainEntry, ProofChain, SigningKey};

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn key() -> SigningKey {
        SigningKey::new(b"ledger-test-key-0123456789".to_vec()).unwrap()
    }

    fn fast_options() -> LedgerOptions {
        LedgerOptions {
            lock_stale_after_ms: 60_000,
            lock_retry: RetryPolicy {
                attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
            },
            ..LedgerOptions::default()
        }
    }

    fn open(dir: &Path) -> (FileLedger, RecoveryReport) {
        FileLedger::open(dir, key(), fast_options()).unwrap()
    }

    /// A chain of `n` outcome envelopes for two alternating agents.
    fn chain_of(n: usize) -> ProofChain {
        let start = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap();
        let mut chain = ProofChain::new(key());
        for i in 0..n {
            let agent = AgentId::new(format!("agent-{}", i % 2));
            let effects = vec![Effect::Signal {
                signal: CoherenceSignal::Drift,
                magnitude: 1.0,
            }];
            let at = start + Duration::seconds(i as i64);
            chain
                .append(ChainEntry::override_entry(EntryKind::Outcome, agent, effects, at))
                .unwrap();
        }
        chain
    }

    fn write_all(ledger: &FileLedger, envelopes: &[DecisionEnvelope]) {
        for envelope in envelopes {
            ledger.log_event(envelope).unwrap();
        }
    }

    fn read_back(ledger: &FileLedger) -> Vec<DecisionEnvelope> {
        ledger
            .read_all()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn append_raw(dir: &Path, bytes: &[u8]) {
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.join(LEDGER_FILE))
            .unwrap();
        file.write_all(bytes).unwrap();
    }

    /// Rewrite one line of the ledger file through `edit`.
    fn tamper_line(dir: &Path, index: usize, edit: impl FnOnce(&mut serde_json::Value)) {
        let path = dir.join(LEDGER_FILE);
        let text = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
        let mut value: serde_json::Value = serde_json::from_str(&lines[index]).unwrap();
        edit(&mut value);
        lines[index] = serde_json::to_string(&value).unwrap();
        fs::write(&path, lines.join("\n") + "\n").unwrap();
    }

    fn grants() -> StaticCapabilities {
        StaticCapabilities::new()
            .with_default(CapabilityGrant::new("Read"))
            .with_default(CapabilityGrant::new("shell"))
    }

    fn kernel_on(dir: &Path) -> Kernel {
        let (ledger, _) = open(dir);
        Kernel::builder(key())
            .capabilities(grants())
            .open(ledger)
            .unwrap()
    }

    fn read_request(agent: &str, path: &str) -> ActionRequest {
        ActionRequest::new(
            agent,
            "task-1",
            ActionType::ToolCall,
            json!({ "tool": "Read", "file_path": path }),
        )
    }

    // ── Appending and reading ────────────────────────────────────────────────

    #[test]
    fn appended_envelopes_read_back_in_order() {
        let dir = tempdir().unwrap();
        let chain = chain_of(4);
        let (ledger, report) = open(dir.path());
        assert_eq!(report.records, 0);
        assert!(report.verification.valid);

        write_all(&ledger, chain.envelopes());
        assert_eq!(read_back(&ledger), chain.envelopes());
        // a second pass starts from the beginning again
        assert_eq!(read_back(&ledger).len(), 4);
        assert_eq!(ledger.next_sequence(), 4);
        assert_eq!(ledger.head_hash(), chain.head_hash());
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn reopen_resumes_at_the_head() {
        let dir = tempdir().unwrap();
        let chain = chain_of(5);
        {
            let (ledger, _) = open(dir.path());
            write_all(&ledger, &chain.envelopes()[..3]);
        }
        let (ledger, report) = open(dir.path());
        assert_eq!(report.records, 3);
        assert_eq!(report.discarded_bytes, 0);
        assert_eq!(ledger.next_sequence(), 3);
        write_all(&ledger, &chain.envelopes()[3..]);
        assert!(ledger.verify().unwrap().valid);
    }

    #[test]
    fn out_of_order_envelope_is_rejected() {
        let dir = tempdir().unwrap();
        let chain = chain_of(3);
        let (ledger, _) = open(dir.path());
        ledger.log_event(&chain.envelopes()[0]).unwrap();
        assert!(matches!(
            ledger.log_event(&chain.envelopes()[2]),
            Err(WardenError::SequenceMismatch {
                expected: 1,
                found: 2
            })
        ));
        assert!(matches!(
            ledger.log_event(&chain.envelopes()[0]),
            Err(WardenError::SequenceMismatch { .. })
        ));
    }

    #[test]
    fn envelope_sealed_with_other_key_is_rejected() {
        let dir = tempdir().unwrap();
        let foreign_key = SigningKey::new(b"a-different-key-abcdefgh".to_vec()).unwrap();
        let mut foreign = ProofChain::new(foreign_key);
        let envelope = foreign
            .append(ChainEntry::override_entry(
                EntryKind::Suspend,
                AgentId::new("a"),
                vec![],
                Utc::now(),
            ))
            .unwrap();

        let (ledger, _) = open(dir.path());
        assert!(matches!(
            ledger.log_event(&envelope),
            Err(WardenError::IntegrityViolation { sequence: 0, .. })
        ));
        assert_eq!(ledger.next_sequence(), 0);
    }

    #[test]
    fn second_writer_sees_first_writers_appends() {
        let dir = tempdir().unwrap();
        let chain = chain_of(4);
        let (first, _) = open(dir.path());
        let (second, _) = open(dir.path());

        write_all(&first, &chain.envelopes()[..2]);
        // second has a stale view until it rescans under the lock
        second.log_event(&chain.envelopes()[2]).unwrap();
        first.log_event(&chain.envelopes()[3]).unwrap();

        assert_eq!(read_back(&first), chain.envelopes());
    }

    // ── Crash recovery ───────────────────────────────────────────────────────

    #[test]
    fn partial_trailing_record_is_discarded() {
        let dir = tempdir().unwrap();
        let chain = chain_of(4);
        {
            let (ledger, _) = open(dir.path());
            write_all(&ledger, &chain.envelopes()[..3]);
        }
        let intact_len = fs::metadata(dir.path().join(LEDGER_FILE)).unwrap().len();
        let partial = b"{\"type\":\"record\",\"format_version\":1,\"seq";
        append_raw(dir.path(), partial);

        let (ledger, report) = open(dir.path());
        assert_eq!(report.records, 3);
        assert_eq!(report.discarded_bytes, partial.len() as u64);
        assert!(report.verification.valid);
        assert_eq!(
            fs::metadata(dir.path().join(LEDGER_FILE)).unwrap().len(),
            intact_len
        );

        ledger.log_event(&chain.envelopes()[3]).unwrap();
        let sequences: Vec<u64> = read_back(&ledger).iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
    }

    #[test]
    fn reader_skips_partial_tail_without_recovery() {
        let dir = tempdir().unwrap();
        let chain = chain_of(2);
        let (ledger, _) = open(dir.path());
        write_all(&ledger, chain.envelopes());
        append_raw(dir.path(), b"{\"type\":\"rec");
        assert_eq!(read_back(&ledger).len(), 2);
    }

    #[test]
    fn altered_final_record_breaks_the_chain() {
        let dir = tempdir().unwrap();
        let chain = chain_of(4);
        {
            let (ledger, _) = open(dir.path());
            write_all(&ledger, &chain.envelopes()[..3]);
        }
        // one byte of the last, newline-terminated record
        let path = dir.path().join(LEDGER_FILE);
        let mut bytes = fs::read(&path).unwrap();
        let last_start = bytes[..bytes.len() - 1]
            .iter()
            .rposition(|&b| b == b'\n')
            .unwrap()
            + 1;
        assert_eq!(bytes[last_start], b'{');
        bytes[last_start] = b'[';
        fs::write(&path, &bytes).unwrap();

        let (ledger, report) = open(dir.path());
        assert!(!report.verification.valid);
        assert_eq!(report.verification.broken_at_sequence, Some(2));
        assert_eq!(report.discarded_bytes, 0);
        assert_eq!(fs::read(&path).unwrap(), bytes);
        assert!(matches!(
            ledger.log_event(&chain.envelopes()[3]),
            Err(WardenError::IntegrityViolation { .. })
        ));
        assert!(matches!(
            ledger.read_all().unwrap().nth(2),
            Some(Err(WardenError::LedgerCorrupt { line: 3, .. }))
        ));
    }

    #[test]
    fn kernel_on_altered_final_record_is_frozen() {
        let dir = tempdir().unwrap();
        {
            let kernel = kernel_on(dir.path());
            kernel.decide(&read_request("agent-a", "x")).unwrap();
            kernel.decide(&read_request("agent-b", "y")).unwrap();
            kernel.decide(&read_request("agent-a", "z")).unwrap();
        }
        let path = dir.path().join(LEDGER_FILE);
        let text = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        let altered = lines[2].replacen('{', "[", 1);
        lines[2] = &altered;
        fs::write(&path, lines.join("\n") + "\n").unwrap();

        let kernel = kernel_on(dir.path());
        assert!(kernel.is_frozen());
        assert_eq!(kernel.next_sequence(), 2);
        assert_eq!(
            kernel.privilege_level(&AgentId::new("agent-a")),
            PrivilegeLevel::Suspended
        );
        assert!(matches!(
            kernel.decide(&read_request("agent-b", "w")),
            Err(WardenError::IntegrityViolation { sequence: 2, .. })
        ));
    }

    #[test]
    fn corrupt_middle_line_breaks_the_chain() {
        let dir = tempdir().unwrap();
        let chain = chain_of(3);
        {
            let (ledger, _) = open(dir.path());
            write_all(&ledger, chain.envelopes());
        }
        let path = dir.path().join(LEDGER_FILE);
        let text = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines[1] = "not json at all";
        fs::write(&path, lines.join("\n") + "\n").unwrap();

        let (ledger, report) = open(dir.path());
        assert!(!report.verification.valid);
        assert_eq!(report.verification.broken_at_sequence, Some(1));
        assert!(report
            .verification
            .reason
            .as_deref()
            .unwrap()
            .contains("line 2"));
        let mut records = ledger.read_all().unwrap();
        assert!(records.next().unwrap().is_ok());
        assert!(matches!(
            records.next(),
            Some(Err(WardenError::LedgerCorrupt { line: 2, .. }))
        ));
    }

    // ── Integrity ────────────────────────────────────────────────────────────

    #[test]
    fn tampered_record_is_located_and_freezes_appends() {
        let dir = tempdir().unwrap();
        let chain = chain_of(5);
        {
            let (ledger, _) = open(dir.path());
            write_all(&ledger, &chain.envelopes()[..4]);
        }
        tamper_line(dir.path(), 2, |v| v["agent_id"] = json!("mallory"));

        let (ledger, report) = open(dir.path());
        assert!(!report.verification.valid);
        assert_eq!(report.verification.broken_at_sequence, Some(2));
        assert!(matches!(
            ledger.log_event(&chain.envelopes()[4]),
            Err(WardenError::IntegrityViolation { .. })
        ));
        assert!(matches!(
            ledger.compact(1, None),
            Err(WardenError::CompactionRejected { .. })
        ));
    }

    #[test]
    fn kernel_on_tampered_ledger_suspends_every_agent() {
        let dir = tempdir().unwrap();
        {
            let kernel = kernel_on(dir.path());
            kernel.decide(&read_request("agent-a", "x")).unwrap();
            kernel.decide(&read_request("agent-b", "y")).unwrap();
            kernel.decide(&read_request("agent-a", "z")).unwrap();
        }
        tamper_line(dir.path(), 1, |v| v["timestamp"] = json!("2020-01-01T00:00:00Z"));

        let kernel = kernel_on(dir.path());
        assert!(kernel.is_frozen());
        for agent in ["agent-a", "agent-b"] {
            assert_eq!(
                kernel.privilege_level(&AgentId::new(agent)),
                PrivilegeLevel::Suspended
            );
        }
        assert!(matches!(
            kernel.decide(&read_request("agent-a", "w")),
            Err(WardenError::IntegrityViolation { sequence: 1, .. })
        ));
    }

    // ── Replay ───────────────────────────────────────────────────────────────

    #[test]
    fn replay_from_file_matches_live_kernel() {
        let dir = tempdir().unwrap();
        let kernel = kernel_on(dir.path());
        for i in 0..10 {
            kernel
                .decide(&read_request(&format!("agent-{}", i % 3), &format!("f{i}")))
                .unwrap();
        }
        let command = ActionRequest::new(
            "agent-1",
            "task-1",
            ActionType::Command,
            json!({ "command": "rm -rf /" }),
        );
        assert!(kernel.decide(&command).unwrap().is_denied());
        kernel
            .record_outcome(&AgentId::new("agent-2"), CoherenceSignal::Rework, 2.0)
            .unwrap();

        let (reader, report) = open(dir.path());
        assert_eq!(report.records, 12);
        let replayed = replay(&KernelConfig::default(), &key(), &reader).unwrap();
        assert_eq!(replayed, kernel.state());
    }

    #[test]
    fn concurrent_kernel_decisions_stay_contiguous() {
        let dir = tempdir().unwrap();
        let kernel = Arc::new(kernel_on(dir.path()));

        thread::scope(|scope| {
            for t in 0..4 {
                let kernel = Arc::clone(&kernel);
                scope.spawn(move || {
                    for i in 0..10 {
                        kernel
                            .decide(&read_request(&format!("agent-{t}"), &format!("f{i}")))
                            .unwrap();
                    }
                });
            }
        });

        let (reader, report) = open(dir.path());
        assert!(report.verification.valid);
        let sequences: Vec<u64> = read_back(&reader).iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (0..40).collect::<Vec<_>>());
    }

    // ── Compaction ───────────────────────────────────────────────────────────

    #[test]
    fn compaction_keeps_anchor_and_tail() {
        let dir = tempdir().unwrap();
        let chain = chain_of(6);
        let (ledger, _) = open(dir.path());
        write_all(&ledger, chain.envelopes());

        let anchor = ledger.compact(4, Some(json!({ "marker": 1 }))).unwrap();
        assert_eq!(anchor.compacted_through, 3);
        assert_eq!(anchor.root_hash, chain.envelopes()[3].hash);

        let tail: Vec<u64> = read_back(&ledger).iter().map(|e| e.sequence).collect();
        assert_eq!(tail, vec![4, 5]);
        let snapshot = ledger.snapshot().unwrap().unwrap();
        assert_eq!(snapshot.anchor, anchor);
        assert_eq!(snapshot.checkpoint, Some(json!({ "marker": 1 })));
        assert!(ledger.verify().unwrap().valid);

        let (reopened, report) = open(dir.path());
        assert_eq!(report.snapshot, Some(anchor));
        assert_eq!(report.records, 2);
        assert_eq!(reopened.next_sequence(), 6);
    }

    #[test]
    fn compaction_range_is_enforced() {
        let dir = tempdir().unwrap();
        let chain = chain_of(3);
        let (ledger, _) = open(dir.path());
        write_all(&ledger, chain.envelopes());

        assert!(matches!(
            ledger.compact(0, None),
            Err(WardenError::CompactionRejected { .. })
        ));
        assert!(matches!(
            ledger.compact(4, None),
            Err(WardenError::CompactionRejected { .. })
        ));
        ledger.compact(2, None).unwrap();
        assert!(matches!(
            ledger.compact(2, None),
            Err(WardenError::CompactionRejected { .. })
        ));
        ledger.compact(3, None).unwrap();
        assert_eq!(read_back(&ledger).len(), 0);
    }

    #[test]
    fn tampered_snapshot_is_detected() {
        let dir = tempdir().unwrap();
        let chain = chain_of(4);
        {
            let (ledger, _) = open(dir.path());
            write_all(&ledger, chain.envelopes());
            ledger.compact(2, Some(json!({ "score": 0.5 }))).unwrap();
        }
        tamper_line(dir.path(), 0, |v| v["checkpoint"] = json!({ "score": 1.0 }));

        let (ledger, report) = open(dir.path());
        assert!(!report.verification.valid);
        assert_eq!(report.verification.broken_at_sequence, Some(1));
        assert!(matches!(
            ledger.snapshot(),
            Err(WardenError::IntegrityViolation { .. })
        ));
    }

    /// Flip one hex digit of the compaction snapshot's mac.
    fn tamper_snapshot_mac(dir: &Path) {
        tamper_line(dir, 0, |v| {
            let mac = v["mac"].as_str().unwrap().to_string();
            let flipped = if mac.starts_with('0') { "1" } else { "0" };
            v["mac"] = json!(format!("{}{}", flipped, &mac[1..]));
        });
    }

    #[test]
    fn snapshot_tampered_after_open_freezes_kernel() {
        let dir = tempdir().unwrap();
        let kernel = kernel_on(dir.path());
        for (i, agent) in ["agent-a", "agent-b", "agent-a", "agent-b"].iter().enumerate() {
            kernel.decide(&read_request(agent, &format!("f{i}"))).unwrap();
        }
        kernel.compact(2).unwrap();
        tamper_snapshot_mac(dir.path());

        assert!(matches!(
            kernel.verify_integrity(),
            Err(WardenError::IntegrityViolation { sequence: 1, .. })
        ));
        assert!(kernel.is_frozen());
        for agent in ["agent-a", "agent-b"] {
            assert_eq!(
                kernel.privilege_level(&AgentId::new(agent)),
                PrivilegeLevel::Suspended
            );
        }
        assert!(matches!(
            kernel.decide(&read_request("agent-a", "after")),
            Err(WardenError::IntegrityViolation { .. })
        ));
        assert_eq!(kernel.next_sequence(), 4);
    }

    #[test]
    fn kernel_opens_frozen_on_tampered_snapshot() {
        let dir = tempdir().unwrap();
        {
            let kernel = kernel_on(dir.path());
            for (i, agent) in ["agent-a", "agent-b", "agent-a", "agent-b"].iter().enumerate() {
                kernel.decide(&read_request(agent, &format!("f{i}"))).unwrap();
            }
            kernel.compact(2).unwrap();
        }
        tamper_snapshot_mac(dir.path());

        let kernel = kernel_on(dir.path());
        assert!(kernel.is_frozen());
        for agent in ["agent-a", "agent-b"] {
            assert_eq!(
                kernel.privilege_level(&AgentId::new(agent)),
                PrivilegeLevel::Suspended
            );
        }
        assert!(matches!(
            kernel.decide(&read_request("agent-b", "after")),
            Err(WardenError::IntegrityViolation { sequence: 1, .. })
        ));
    }

    #[test]
    fn kernel_state_survives_file_compaction() {
        let dir = tempdir().unwrap();
        let kernel = kernel_on(dir.path());
        for i in 0..6 {
            kernel
                .decide(&read_request(&format!("agent-{}", i % 2), &format!("f{i}")))
                .unwrap();
        }
        kernel.compact(4).unwrap();
        kernel.decide(&read_request("agent-0", "after")).unwrap();
        let live = kernel.state();
        drop(kernel);

        let reopened = kernel_on(dir.path());
        assert_eq!(reopened.state(), live);
        assert!(reopened.verify_integrity().unwrap().valid);
    }

    // ── Lock marker ──────────────────────────────────────────────────────────

    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = tempdir().unwrap();
        let marker = LockMarker {
            holder: Uuid::new_v4(),
            pid: 1,
            acquired_at: Utc::now() - Duration::hours(1),
        };
        fs::write(
            dir.path().join(LOCK_FILE),
            serde_json::to_vec(&marker).unwrap(),
        )
        .unwrap();

        let (ledger, _) = open(dir.path());
        ledger.log_event(&chain_of(1).envelopes()[0]).unwrap();
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn contenders_for_a_stale_lock_never_overlap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);
        let marker = LockMarker {
            holder: Uuid::new_v4(),
            pid: 1,
            acquired_at: Utc::now() - Duration::hours(1),
        };
        fs::write(&path, serde_json::to_vec(&marker).unwrap()).unwrap();

        let options = LedgerOptions {
            lock_retry: RetryPolicy {
                attempts: 200,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
            },
            ..fast_options()
        };
        let inside = AtomicUsize::new(0);
        let acquired = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let lock = LedgerLock::acquire(&path, Uuid::new_v4(), &options).unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0, "two lock holders");
                    thread::sleep(std::time::Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    acquired.fetch_add(1, Ordering::SeqCst);
                    drop(lock);
                });
            }
        });
        assert_eq!(acquired.load(Ordering::SeqCst), 8);
        assert!(!path.exists());
    }

    #[test]
    fn live_lock_times_out_with_holder() {
        let dir = tempdir().unwrap();
        let holder = Uuid::new_v4();
        let _held = LedgerLock::acquire(&dir.path().join(LOCK_FILE), holder, &fast_options())
            .unwrap();

        match FileLedger::open(dir.path(), key(), fast_options()) {
            Err(WardenError::LockContended { holder: seen, .. }) => {
                assert_eq!(seen, holder.to_string())
            }
            other => panic!("expected LockContended, got {other:?}"),
        }
    }

    #[test]
    fn lock_is_not_removed_by_a_displaced_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);
        let first = LedgerLock::acquire(&path, Uuid::new_v4(), &fast_options()).unwrap();

        // someone reclaims it as stale and takes it over
        fs::remove_file(&path).unwrap();
        let second_holder = Uuid::new_v4();
        let _second = LedgerLock::acquire(&path, second_holder, &fast_options()).unwrap();

        drop(first);
        assert_eq!(lock::read_marker(&path).unwrap().holder, second_holder);
    }

    // ── Options ──────────────────────────────────────────────────────────────

    #[test]
    fn options_parse_and_validate() {
        let options = LedgerOptions::from_toml_str(
            r#"
            lock_stale_after_ms = 5000

            [write_retry]
            attempts = 5
            initial_backoff_ms = 2
            max_backoff_ms = 16
            "#,
        )
        .unwrap();
        assert_eq!(options.lock_stale_after_ms, 5000);
        assert_eq!(options.write_retry.backoff(1).as_millis(), 2);
        assert_eq!(options.write_retry.backoff(3).as_millis(), 8);
        assert_eq!(options.write_retry.backoff(9).as_millis(), 16);
        assert_eq!(options.lock_retry, LedgerOptions::default().lock_retry);

        assert!(matches!(
            LedgerOptions::from_toml_str("[write_retry]\nattempts = 0\ninitial_backoff_ms = 1\nmax_backoff_ms = 1"),
            Err(WardenError::ConfigError { .. })
        ));
    }

    // ── Memory ledger ────────────────────────────────────────────────────────

    #[test]
    fn memory_ledger_enforces_linkage() {
        let chain = chain_of(3);
        let ledger = MemoryLedger::new();
        ledger.log_event(&chain.envelopes()[0]).unwrap();

        let mut forged = chain.envelopes()[1].clone();
        forged.previous_hash = "0".repeat(64);
        assert!(matches!(
            ledger.log_event(&forged),
            Err(WardenError::IntegrityViolation { sequence: 1, .. })
        ));
        assert!(matches!(
            ledger.log_event(&chain.envelopes()[2]),
            Err(WardenError::SequenceMismatch { .. })
        ));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn kernel_reopens_on_shared_memory_ledger() {
        let ledger = MemoryLedger::new();
        let kernel = Kernel::builder(key())
            .capabilities(grants())
            .open(ledger.clone())
            .unwrap();
        kernel.decide(&read_request("agent-a", "x")).unwrap();
        kernel.compact(1).unwrap();
        kernel.decide(&read_request("agent-a", "y")).unwrap();
        let live = kernel.state();

        let reopened = Kernel::builder(key())
            .capabilities(grants())
            .open(ledger.clone())
            .unwrap();
        assert_eq!(reopened.state(), live);
        assert_eq!(ledger.len(), 1);
    }
}
