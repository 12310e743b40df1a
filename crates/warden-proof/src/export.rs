//! The `warden.proof.v1` export document.
//!
//! ```json
//! {
//!   "format": "warden.proof.v1",
//!   "anchor": null,
//!   "envelopes": [ ... ],
//!   "seal": { "terminal_hash": "...", "envelope_count": 3, "mac": "..." }
//! }
//! ```
//!
//! The seal MAC binds the terminal hash, the envelope count and the anchor,
//! so a verifier holding the key can tell a truncated export from a complete
//! one.

use serde::{Deserialize, Serialize};

use warden_contracts::{
    envelope::{ChainAnchor, ChainVerification, DecisionEnvelope, GENESIS_HASH},
    error::{WardenError, WardenResult},
};

use crate::{
    chain::{broken_result, ChainVerifier},
    key::SigningKey,
};

pub const EXPORT_FORMAT: &str = "warden.proof.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSeal {
    /// Hash of the last envelope (or the anchor/genesis hash when empty).
    pub terminal_hash: String,
    pub envelope_count: u64,
    pub mac: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofExport {
    pub format: String,
    pub anchor: Option<ChainAnchor>,
    pub envelopes: Vec<DecisionEnvelope>,
    pub seal: ExportSeal,
}

impl ProofExport {
    /// Build and seal an export document.
    pub fn seal(
        anchor: Option<ChainAnchor>,
        envelopes: Vec<DecisionEnvelope>,
        key: &SigningKey,
    ) -> WardenResult<Self> {
        let terminal_hash = terminal_hash(anchor.as_ref(), &envelopes);
        let envelope_count = envelopes.len() as u64;
        let mac = key.sign(&seal_message(&terminal_hash, envelope_count, anchor.as_ref()))?;

        Ok(Self {
            format: EXPORT_FORMAT.to_string(),
            anchor,
            envelopes,
            seal: ExportSeal {
                terminal_hash,
                envelope_count,
                mac,
            },
        })
    }

    pub fn to_bytes(&self) -> WardenResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| WardenError::SerializationError {
            reason: format!("failed to encode proof export: {}", e),
        })
    }
}

/// Parse and structurally check an export document.
pub fn parse(bytes: &[u8]) -> WardenResult<ProofExport> {
    let document: ProofExport =
        serde_json::from_slice(bytes).map_err(|e| WardenError::ImportFailed {
            reason: format!("not a proof export: {}", e),
        })?;

    if document.format != EXPORT_FORMAT {
        return Err(WardenError::ImportFailed {
            reason: format!(
                "unsupported export format '{}', expected '{}'",
                document.format, EXPORT_FORMAT
            ),
        });
    }
    Ok(document)
}

/// Independently verify an export: every envelope, then the seal.
///
/// A seal mismatch on an otherwise intact chain means envelopes were
/// removed from the end; it is reported at the first missing sequence.
pub fn verify_export(bytes: &[u8], key: &SigningKey) -> WardenResult<ChainVerification> {
    let document = parse(bytes)?;

    let mut verifier = ChainVerifier::from_anchor(key, document.anchor.as_ref());
    for envelope in &document.envelopes {
        if let Err(err) = verifier.push(envelope) {
            return Ok(broken_result(err, &verifier));
        }
    }

    let seal = &document.seal;
    let message = seal_message(
        &seal.terminal_hash,
        seal.envelope_count,
        document.anchor.as_ref(),
    );
    let seal_ok = key.verify(&message, &seal.mac)
        && seal.terminal_hash == verifier.last_hash()
        && seal.envelope_count == document.envelopes.len() as u64;

    if !seal_ok {
        let reason = "export seal does not match its envelopes".to_string();
        return Ok(ChainVerification::broken(
            verifier.next_sequence(),
            reason,
            verifier.verified(),
            verifier.last_hash(),
        ));
    }
    Ok(verifier.finish())
}

fn terminal_hash(anchor: Option<&ChainAnchor>, envelopes: &[DecisionEnvelope]) -> String {
    match (envelopes.last(), anchor) {
        (Some(last), _) => last.hash.clone(),
        (None, Some(anchor)) => anchor.root_hash.clone(),
        (None, None) => GENESIS_HASH.to_string(),
    }
}

fn seal_message(terminal_hash: &str, envelope_count: u64, anchor: Option<&ChainAnchor>) -> Vec<u8> {
    let anchor_part = anchor
        .map(|a| format!("{}:{}", a.compacted_through, a.root_hash))
        .unwrap_or_default();
    format!(
        "{}\0{}\0{}\0{}",
        EXPORT_FORMAT, terminal_hash, envelope_count, anchor_part
    )
    .into_bytes()
}
