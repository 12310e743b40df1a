//! The unsealed content of an envelope.
//!
//! A `ChainEntry` is everything the caller decides; the chain adds the
//! sequence, linkage, hash and mac.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use warden_contracts::{
    action::{ActionRequest, ActionType},
    agent::{AgentId, TaskId},
    envelope::{
        ActionSummary, DecisionEnvelope, Effect, EntryKind, MemoryOpSummary,
        ENVELOPE_FORMAT_VERSION,
    },
    error::{WardenError, WardenResult},
    verdict::{Decision, Evaluation, GateVerdict},
};

use crate::chain::sha256_hex;

#[derive(Debug, Clone, PartialEq)]
pub struct ChainEntry {
    pub kind: EntryKind,
    pub agent_id: AgentId,
    pub task_id: Option<TaskId>,
    pub timestamp: DateTime<Utc>,
    pub action_summary: Option<ActionSummary>,
    pub tool_call_hashes: Vec<String>,
    pub memory_op_summaries: Vec<MemoryOpSummary>,
    pub verdicts: Vec<GateVerdict>,
    pub decision: Option<Decision>,
    pub effects: Vec<Effect>,
}

impl ChainEntry {
    /// Entry for a gate evaluation.
    ///
    /// The raw payload never reaches the entry; only digests and sizes do.
    pub fn decision(
        request: &ActionRequest,
        evaluation: &Evaluation,
        effects: Vec<Effect>,
        at: DateTime<Utc>,
    ) -> WardenResult<Self> {
        let payload = canonical_json(&request.payload)?;

        let tool_call_hashes = match (request.action_type, request.tool()) {
            (ActionType::ToolCall, Some(tool)) => {
                let call = json!({ "tool": tool, "arguments": request.payload });
                vec![sha256_hex(&canonical_json(&call)?)]
            }
            _ => Vec::new(),
        };

        let memory_op_summaries = match (request.action_type, request.memory_key()) {
            (ActionType::MemoryWrite, Some(key)) => {
                let content = request
                    .payload
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let operation = request
                    .payload
                    .get("operation")
                    .and_then(Value::as_str)
                    .unwrap_or("write");
                vec![MemoryOpSummary {
                    key: key.to_string(),
                    operation: operation.to_string(),
                    content_bytes: request.content_bytes(),
                    content_hash: sha256_hex(content.as_bytes()),
                }]
            }
            _ => Vec::new(),
        };

        Ok(Self {
            kind: EntryKind::Decision,
            agent_id: request.agent_id.clone(),
            task_id: Some(request.task_id.clone()),
            timestamp: at,
            action_summary: Some(ActionSummary {
                action_type: request.action_type,
                resource: request.resource().to_string(),
                payload_digest: sha256_hex(&payload),
                payload_bytes: payload.len() as u64,
                requested_at: request.timestamp,
            }),
            tool_call_hashes,
            memory_op_summaries,
            verdicts: evaluation.all_verdicts().cloned().collect(),
            decision: Some(evaluation.decision),
            effects,
        })
    }

    /// Entry for an explicit state change (outcome, usage, reset, suspend,
    /// run reset).
    pub fn override_entry(
        kind: EntryKind,
        agent_id: AgentId,
        effects: Vec<Effect>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            agent_id,
            task_id: None,
            timestamp: at,
            action_summary: None,
            tool_call_hashes: Vec::new(),
            memory_op_summaries: Vec::new(),
            verdicts: Vec::new(),
            decision: None,
            effects,
        }
    }

    /// Unsealed envelope at `sequence`, linked to `previous_hash`.
    pub fn into_envelope(self, sequence: u64, previous_hash: &str) -> DecisionEnvelope {
        DecisionEnvelope {
            format_version: ENVELOPE_FORMAT_VERSION,
            sequence,
            timestamp: self.timestamp,
            kind: self.kind,
            agent_id: self.agent_id,
            task_id: self.task_id,
            action_summary: self.action_summary,
            tool_call_hashes: self.tool_call_hashes,
            memory_op_summaries: self.memory_op_summaries,
            verdicts: self.verdicts,
            decision: self.decision,
            effects: self.effects,
            previous_hash: previous_hash.to_string(),
            hash: String::new(),
            mac: String::new(),
        }
    }
}

fn canonical_json(value: &Value) -> WardenResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| WardenError::SerializationError {
        reason: format!("failed to encode payload: {}", e),
    })
}
