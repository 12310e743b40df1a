//! The in-memory proof chain.
//!
//! `ProofChain` owns the signing key and the retained envelopes. Appending
//! is split in two so a caller can persist an envelope before it becomes
//! part of the chain: [`ProofChain::next_envelope`] builds and seals,
//! [`ProofChain::commit`] links it in.

use tracing::{debug, info, warn};

use warden_contracts::{
    envelope::{ChainAnchor, ChainVerification, DecisionEnvelope, GENESIS_HASH},
    error::{WardenError, WardenResult},
};

use crate::{
    chain::{seal_envelope, verify_envelopes, ChainVerifier},
    entry::ChainEntry,
    export::{self, ProofExport},
    key::SigningKey,
};

#[derive(Debug)]
pub struct ProofChain {
    key: SigningKey,
    anchor: Option<ChainAnchor>,
    envelopes: Vec<DecisionEnvelope>,
    head_hash: String,
    next_sequence: u64,
}

impl ProofChain {
    /// An empty chain starting at genesis.
    pub fn new(key: SigningKey) -> Self {
        Self {
            key,
            anchor: None,
            envelopes: Vec::new(),
            head_hash: GENESIS_HASH.to_string(),
            next_sequence: 0,
        }
    }

    /// Rebuild a chain from stored envelopes, e.g. read back from a ledger.
    ///
    /// The envelopes are kept as stored even when verification fails; the
    /// returned `ChainVerification` says whether they can be trusted. The
    /// head continues from the last stored envelope.
    pub fn restore(
        key: SigningKey,
        anchor: Option<ChainAnchor>,
        envelopes: Vec<DecisionEnvelope>,
    ) -> (Self, ChainVerification) {
        let verification = verify_envelopes(&envelopes, &key, anchor.as_ref());

        let (head_hash, next_sequence) = match (envelopes.last(), &anchor) {
            (Some(last), _) => (last.hash.clone(), last.sequence + 1),
            (None, Some(anchor)) => (anchor.root_hash.clone(), anchor.next_sequence()),
            (None, None) => (GENESIS_HASH.to_string(), 0),
        };

        if !verification.valid {
            warn!(
                broken_at = ?verification.broken_at_sequence,
                reason = ?verification.reason,
                "restored proof chain failed verification"
            );
        }

        let chain = Self {
            key,
            anchor,
            envelopes,
            head_hash,
            next_sequence,
        };
        (chain, verification)
    }

    /// Seal `entry` as the next envelope without adding it to the chain.
    pub fn next_envelope(&self, entry: ChainEntry) -> WardenResult<DecisionEnvelope> {
        let mut envelope = entry.into_envelope(self.next_sequence, &self.head_hash);
        seal_envelope(&mut envelope, &self.key)?;
        Ok(envelope)
    }

    /// Link a sealed envelope onto the head.
    ///
    /// Rejects envelopes that do not continue the chain or whose hash or mac
    /// do not verify.
    pub fn commit(&mut self, envelope: DecisionEnvelope) -> WardenResult<()> {
        if envelope.sequence != self.next_sequence {
            return Err(WardenError::SequenceMismatch {
                expected: self.next_sequence,
                found: envelope.sequence,
            });
        }
        ChainVerifier::resume(&self.key, self.next_sequence, &self.head_hash).check(&envelope)?;

        debug!(
            sequence = envelope.sequence,
            kind = ?envelope.kind,
            agent_id = %envelope.agent_id,
            "envelope committed"
        );
        self.head_hash.clone_from(&envelope.hash);
        self.next_sequence += 1;
        self.envelopes.push(envelope);
        Ok(())
    }

    /// Seal and commit in one step.
    pub fn append(&mut self, entry: ChainEntry) -> WardenResult<DecisionEnvelope> {
        let envelope = self.next_envelope(entry)?;
        self.commit(envelope.clone())?;
        Ok(envelope)
    }

    /// Walk the retained envelopes from the anchor (or genesis).
    pub fn verify_chain(&self) -> ChainVerification {
        verify_envelopes(&self.envelopes, &self.key, self.anchor.as_ref())
    }

    /// Serialize the chain as a `warden.proof.v1` document.
    ///
    /// The output depends only on the chain, so exporting the same chain
    /// twice yields identical bytes. The key is not included.
    pub fn export(&self) -> WardenResult<Vec<u8>> {
        let document = ProofExport::seal(self.anchor.clone(), self.envelopes.clone(), &self.key)?;
        document.to_bytes()
    }

    /// Load an exported document.
    ///
    /// Only the structure is checked here. Tampered envelopes still import,
    /// and [`ProofChain::verify_chain`] then reports where the chain breaks.
    pub fn import(bytes: &[u8], key: SigningKey) -> WardenResult<Self> {
        let document = export::parse(bytes)?;
        let (chain, _) = Self::restore(key, document.anchor, document.envelopes);
        Ok(chain)
    }

    /// Drop envelopes before `keep_from`, anchoring the chain at the last
    /// dropped one.
    pub fn compact(&mut self, keep_from: u64) -> WardenResult<ChainAnchor> {
        let first_retained = self
            .envelopes
            .first()
            .map(|e| e.sequence)
            .unwrap_or(self.next_sequence);

        if keep_from <= first_retained || keep_from > self.next_sequence {
            return Err(WardenError::CompactionRejected {
                reason: format!(
                    "keep_from {} outside compactable range {}..={}",
                    keep_from,
                    first_retained + 1,
                    self.next_sequence
                ),
            });
        }

        let verification = self.verify_chain();
        if !verification.valid {
            return Err(WardenError::CompactionRejected {
                reason: format!(
                    "chain does not verify (broken at {:?})",
                    verification.broken_at_sequence
                ),
            });
        }

        let split = (keep_from - first_retained) as usize;
        let root_hash = self.envelopes[split - 1].hash.clone();
        self.envelopes.drain(..split);

        let anchor = ChainAnchor {
            compacted_through: keep_from - 1,
            root_hash,
        };
        info!(
            compacted_through = anchor.compacted_through,
            retained = self.envelopes.len(),
            "proof chain compacted"
        );
        self.anchor = Some(anchor.clone());
        Ok(anchor)
    }

    pub fn envelopes(&self) -> &[DecisionEnvelope] {
        &self.envelopes
    }

    pub fn head_hash(&self) -> &str {
        &self.head_hash
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn anchor(&self) -> Option<&ChainAnchor> {
        self.anchor.as_ref()
    }

    pub fn key(&self) -> &SigningKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}
