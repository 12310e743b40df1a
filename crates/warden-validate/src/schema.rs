//! The JSON Schema every raw action request must satisfy.

use serde_json::{json, Value};

/// Rule id reported for structural failures against [`request_schema`].
pub const REQUEST_SCHEMA_RULE: &str = "request-schema";

/// Structural shape of an `ActionRequest` as submitted over the wire.
///
/// `timestamp` is optional here; requests without one are stamped on
/// arrival. Unknown top-level keys are rejected so a misspelt `usage` cannot
/// silently bypass the budget.
pub fn request_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "ActionRequest",
        "type": "object",
        "required": ["agent_id", "task_id", "action_type", "payload"],
        "additionalProperties": false,
        "properties": {
            "agent_id": { "type": "string", "minLength": 1 },
            "task_id": { "type": "string", "minLength": 1 },
            "action_type": { "enum": ["tool-call", "memory-write", "command"] },
            "payload": { "type": "object" },
            "usage": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["dimension", "amount"],
                    "additionalProperties": false,
                    "properties": {
                        "dimension": {
                            "enum": [
                                "tokens",
                                "tool-calls",
                                "storage-bytes",
                                "wall-clock-ms",
                                "cost-usd"
                            ]
                        },
                        "amount": { "type": "integer", "minimum": 0 }
                    }
                }
            },
            "timestamp": { "type": "string" }
        }
    })
}
