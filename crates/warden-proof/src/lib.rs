//! # warden-proof
//!
//! Tamper-evident proof of every WARDEN decision.
//!
//! ## Overview
//!
//! Each decision or override becomes a [`DecisionEnvelope`] whose `hash`
//! commits to its content and to the previous envelope's hash, and whose
//! `mac` authenticates that hash with a host-supplied [`SigningKey`].
//! Changing a single byte of any envelope breaks verification at exactly
//! that envelope's sequence.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use warden_proof::{ChainEntry, ProofChain, SigningKey};
//!
//! let mut chain = ProofChain::new(SigningKey::from_hex(&hex_key)?);
//! chain.append(ChainEntry::decision(&request, &evaluation, effects, now)?)?;
//!
//! assert!(chain.verify_chain().valid);
//! let bytes = chain.export()?;
//! ```
//!
//! [`DecisionEnvelope`]: warden_contracts::envelope::DecisionEnvelope

pub mod chain;
pub mod entry;
pub mod export;
pub mod key;
pub mod proof_chain;

pub use chain::{hash_envelope, seal_envelope, verify_envelopes, ChainVerifier};
pub use entry::ChainEntry;
pub use export::{verify_export, ProofExport};
pub use key::SigningKey;
pub use proof_chain::ProofChain;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use warden_contracts::{
        action::{ActionRequest, ActionType},
        agent::AgentId,
        budget::BudgetDimension,
        coherence::CoherenceSignal,
        envelope::{Effect, EntryKind, GENESIS_HASH},
        error::WardenError,
        verdict::{Evaluation, GateVerdict},
    };

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn key() -> SigningKey {
        SigningKey::new(b"test-signing-key-0123456789".to_vec()).unwrap()
    }

    fn decision_entry(n: i64) -> ChainEntry {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(n);
        let request = ActionRequest::new(
            "agent-1",
            "task-1",
            ActionType::ToolCall,
            json!({ "tool": "Edit", "file_path": format!("src/f{n}.rs"), "content": "x" }),
        )
        .with_timestamp(at);
        let evaluation = Evaluation::aggregate(
            vec![GateVerdict::allow("destructive", "ok")
                .with_evidence(json!({ "entropy": 3.141592653589793 }))],
            vec![GateVerdict::warn("privilege", "restricted")],
        );
        let effects = vec![
            Effect::Signal {
                signal: CoherenceSignal::Drift,
                magnitude: 0.1 + 0.2,
            },
            Effect::Usage {
                dimension: BudgetDimension::ToolCalls,
                amount: 1,
            },
        ];
        ChainEntry::decision(&request, &evaluation, effects, at).unwrap()
    }

    fn chain_of(n: i64) -> ProofChain {
        let mut chain = ProofChain::new(key());
        for i in 0..n {
            chain.append(decision_entry(i)).unwrap();
        }
        chain
    }

    // ── Keys ─────────────────────────────────────────────────────────────────

    #[test]
    fn short_key_is_rejected() {
        assert!(matches!(
            SigningKey::new(b"short".to_vec()),
            Err(WardenError::ConfigError { .. })
        ));
        assert!(SigningKey::from_hex("zz").is_err());
    }

    #[test]
    fn key_debug_is_redacted() {
        assert_eq!(format!("{:?}", key()), "SigningKey([REDACTED])");
    }

    #[test]
    fn mac_verifies_only_with_same_key() {
        let mac = key().sign(b"payload").unwrap();
        assert!(key().verify(b"payload", &mac));
        assert!(!key().verify(b"payload2", &mac));
        let other = SigningKey::new(b"another-key-abcdefghijklmnop".to_vec()).unwrap();
        assert!(!other.verify(b"payload", &mac));
        assert!(!key().verify(b"payload", "not-hex"));
    }

    // ── Appending ────────────────────────────────────────────────────────────

    #[test]
    fn first_envelope_links_to_genesis() {
        let chain = chain_of(2);
        let envelopes = chain.envelopes();
        assert_eq!(envelopes[0].sequence, 0);
        assert_eq!(envelopes[0].previous_hash, GENESIS_HASH);
        assert_eq!(envelopes[1].previous_hash, envelopes[0].hash);
        assert_eq!(chain.head_hash(), envelopes[1].hash);
        assert_eq!(chain.next_sequence(), 2);
    }

    #[test]
    fn envelope_holds_digests_not_payloads() {
        let chain = chain_of(1);
        let envelope = &chain.envelopes()[0];
        let summary = envelope.action_summary.as_ref().unwrap();
        assert_eq!(summary.payload_digest.len(), 64);
        assert_eq!(envelope.tool_call_hashes.len(), 1);
        let stored = serde_json::to_string(envelope).unwrap();
        assert!(!stored.contains("src/f0.rs"));
    }

    #[test]
    fn commit_rejects_out_of_order_envelope() {
        let mut chain = chain_of(1);
        let mut stale = chain.next_envelope(decision_entry(1)).unwrap();
        stale.sequence = 5;
        assert!(matches!(
            chain.commit(stale),
            Err(WardenError::SequenceMismatch {
                expected: 1,
                found: 5
            })
        ));
    }

    #[test]
    fn commit_rejects_envelope_sealed_by_other_key() {
        let mut chain = chain_of(1);
        let other = ProofChain::restore(
            SigningKey::new(b"another-key-abcdefghijklmnop".to_vec()).unwrap(),
            None,
            chain.envelopes().to_vec(),
        )
        .0;
        let forged = other.next_envelope(decision_entry(1)).unwrap();
        assert!(matches!(
            chain.commit(forged),
            Err(WardenError::IntegrityViolation { sequence: 1, .. })
        ));
    }

    // ── Verification ─────────────────────────────────────────────────────────

    #[test]
    fn untouched_chain_verifies() {
        let verification = chain_of(5).verify_chain();
        assert!(verification.valid);
        assert_eq!(verification.verified, 5);
    }

    #[test]
    fn single_field_change_is_located() {
        let chain = chain_of(5);
        let mut envelopes = chain.envelopes().to_vec();
        envelopes[3].agent_id = AgentId::new("someone-else");

        let (_, verification) = ProofChain::restore(key(), None, envelopes);
        assert!(!verification.valid);
        assert_eq!(verification.broken_at_sequence, Some(3));
        assert_eq!(verification.verified, 3);
    }

    #[test]
    fn rehashed_tamper_is_caught_by_mac() {
        let chain = chain_of(3);
        let mut envelopes = chain.envelopes().to_vec();
        envelopes[1].effects.clear();
        envelopes[1].hash = hash_envelope(&envelopes[1]).unwrap();

        let verification = verify_envelopes(&envelopes, &key(), None);
        assert_eq!(verification.broken_at_sequence, Some(1));
        assert!(verification.reason.unwrap().contains("mac"));
    }

    #[test]
    fn removed_envelope_breaks_sequence() {
        let chain = chain_of(4);
        let mut envelopes = chain.envelopes().to_vec();
        envelopes.remove(2);
        let verification = verify_envelopes(&envelopes, &key(), None);
        assert_eq!(verification.broken_at_sequence, Some(2));
    }

    #[test]
    fn unknown_format_version_is_rejected() {
        let chain = chain_of(1);
        let mut envelopes = chain.envelopes().to_vec();
        envelopes[0].format_version = 2;
        let verification = verify_envelopes(&envelopes, &key(), None);
        assert_eq!(verification.broken_at_sequence, Some(0));
    }

    #[test]
    fn envelopes_survive_json_round_trip() {
        let chain = chain_of(3);
        let text = serde_json::to_string(chain.envelopes()).unwrap();
        let parsed: Vec<warden_contracts::envelope::DecisionEnvelope> =
            serde_json::from_str(&text).unwrap();
        assert!(verify_envelopes(&parsed, &key(), None).valid);
    }

    // ── Export / import ──────────────────────────────────────────────────────

    #[test]
    fn export_import_is_byte_stable() {
        let chain = chain_of(4);
        let bytes = chain.export().unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("test-signing-key"));

        let imported = ProofChain::import(&bytes, key()).unwrap();
        assert_eq!(imported.export().unwrap(), bytes);
        assert!(imported.verify_chain().valid);
        assert!(verify_export(&bytes, &key()).unwrap().valid);
    }

    #[test]
    fn tampered_export_fails_at_sequence() {
        let chain = chain_of(4);
        let mut document: ProofExport = serde_json::from_slice(&chain.export().unwrap()).unwrap();
        document.envelopes[2].kind = EntryKind::Reset;
        let bytes = document.to_bytes().unwrap();

        let verification = verify_export(&bytes, &key()).unwrap();
        assert_eq!(verification.broken_at_sequence, Some(2));
        let imported = ProofChain::import(&bytes, key()).unwrap();
        assert_eq!(imported.verify_chain().broken_at_sequence, Some(2));
    }

    #[test]
    fn truncated_export_fails_seal() {
        let chain = chain_of(4);
        let mut document: ProofExport = serde_json::from_slice(&chain.export().unwrap()).unwrap();
        document.envelopes.pop();
        let verification = verify_export(&document.to_bytes().unwrap(), &key()).unwrap();
        assert!(!verification.valid);
        assert_eq!(verification.broken_at_sequence, Some(3));
    }

    #[test]
    fn import_rejects_foreign_documents() {
        assert!(matches!(
            ProofChain::import(b"{\"format\":\"other\"}", key()),
            Err(WardenError::ImportFailed { .. })
        ));
        assert!(matches!(
            ProofChain::import(b"not json", key()),
            Err(WardenError::ImportFailed { .. })
        ));
    }

    // ── Compaction ───────────────────────────────────────────────────────────

    #[test]
    fn compaction_keeps_root_hash_and_verifiability() {
        let mut chain = chain_of(5);
        let root = chain.envelopes()[2].hash.clone();

        let anchor = chain.compact(3).unwrap();
        assert_eq!(anchor.compacted_through, 2);
        assert_eq!(anchor.root_hash, root);
        assert_eq!(chain.len(), 2);
        assert!(chain.verify_chain().valid);

        chain.append(decision_entry(9)).unwrap();
        assert_eq!(chain.envelopes().last().unwrap().sequence, 5);
        assert!(chain.verify_chain().valid);

        let bytes = chain.export().unwrap();
        assert!(verify_export(&bytes, &key()).unwrap().valid);
    }

    #[test]
    fn compaction_range_is_checked() {
        let mut chain = chain_of(3);
        assert!(matches!(
            chain.compact(0),
            Err(WardenError::CompactionRejected { .. })
        ));
        assert!(matches!(
            chain.compact(4),
            Err(WardenError::CompactionRejected { .. })
        ));
        assert!(chain.compact(3).is_ok());
        assert!(chain.is_empty());
        assert_eq!(chain.next_sequence(), 3);
    }

    #[test]
    fn override_entries_carry_no_decision() {
        let mut chain = ProofChain::new(key());
        let envelope = chain
            .append(ChainEntry::override_entry(
                EntryKind::Suspend,
                AgentId::new("a"),
                vec![Effect::Suspend {
                    reason: "manual".into(),
                }],
                Utc::now(),
            ))
            .unwrap();
        assert!(envelope.decision.is_none());
        assert!(envelope.task_id.is_none());
        assert!(chain.verify_chain().valid);
    }
}
