//! The on-disk line format.
//!
//! One JSON object per line, tagged by `type`:
//!
//! ```text
//! {"type":"snapshot","compacted_through":41,"root_hash":"...","envelope_count":42,...}
//! {"type":"record","format_version":1,"sequence":42,...}
//! {"type":"record","format_version":1,"sequence":43,...}
//! ```
//!
//! A snapshot, when present, is always the first line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_contracts::{
    envelope::{ChainAnchor, DecisionEnvelope},
    error::{WardenError, WardenResult},
};
use warden_proof::{chain::sha256_hex, SigningKey};

const SNAPSHOT_DOMAIN: &str = "warden.snapshot.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LedgerLine {
    Snapshot(SnapshotRecord),
    Record(DecisionEnvelope),
}

impl LedgerLine {
    /// Encode as one newline-terminated line.
    pub fn to_line(&self) -> WardenResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec(self).map_err(|e| WardenError::SerializationError {
            reason: format!("failed to encode ledger line: {}", e),
        })?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// What remains of the envelopes removed by compaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub compacted_through: u64,
    pub root_hash: String,
    /// Envelopes removed by this and every earlier compaction.
    pub envelope_count: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Value>,
    /// HMAC over the anchor and the checkpoint digest.
    pub mac: String,
}

impl SnapshotRecord {
    pub fn seal(
        anchor: &ChainAnchor,
        envelope_count: u64,
        checkpoint: Option<Value>,
        created_at: DateTime<Utc>,
        key: &SigningKey,
    ) -> WardenResult<Self> {
        let mac = key.sign(&mac_message(anchor, checkpoint.as_ref())?)?;
        Ok(Self {
            compacted_through: anchor.compacted_through,
            root_hash: anchor.root_hash.clone(),
            envelope_count,
            created_at,
            checkpoint,
            mac,
        })
    }

    pub fn anchor(&self) -> ChainAnchor {
        ChainAnchor {
            compacted_through: self.compacted_through,
            root_hash: self.root_hash.clone(),
        }
    }

    pub fn verify(&self, key: &SigningKey) -> WardenResult<()> {
        let message = mac_message(&self.anchor(), self.checkpoint.as_ref())?;
        if key.verify(&message, &self.mac) {
            Ok(())
        } else {
            Err(WardenError::IntegrityViolation {
                sequence: self.compacted_through,
                reason: "snapshot mac does not verify".to_string(),
            })
        }
    }
}

fn mac_message(anchor: &ChainAnchor, checkpoint: Option<&Value>) -> WardenResult<Vec<u8>> {
    let checkpoint_digest = match checkpoint {
        Some(value) => {
            let bytes = serde_json::to_vec(value).map_err(|e| WardenError::SerializationError {
                reason: format!("failed to encode checkpoint: {}", e),
            })?;
            sha256_hex(&bytes)
        }
        None => String::new(),
    };
    Ok(format!(
        "{}\0{}\0{}\0{}",
        SNAPSHOT_DOMAIN, anchor.compacted_through, anchor.root_hash, checkpoint_digest
    )
    .into_bytes())
}
