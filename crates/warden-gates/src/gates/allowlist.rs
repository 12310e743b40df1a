use serde_json::json;

use warden_contracts::verdict::GateVerdict;

use super::{GateContext, TOOL_ALLOWLIST};
use crate::config::AllowlistConfig;

/// Checks the requested resource against the task's capability grants.
///
/// - no matching grant: deny
/// - grant with an exhausted rate limit: deny
/// - grant whose rate limit utilization is at or above `warn_utilization`: warn
#[derive(Debug)]
pub struct AllowlistGate {
    warn_utilization: f64,
}

impl AllowlistGate {
    pub fn new(config: &AllowlistConfig) -> Self {
        Self {
            warn_utilization: config.warn_utilization,
        }
    }

    pub fn check(&self, ctx: &GateContext<'_>) -> GateVerdict {
        let resource = ctx.request.resource();
        let task = &ctx.request.task_id;

        let Some(grant) = ctx.capabilities.find(resource) else {
            return GateVerdict::deny(
                TOOL_ALLOWLIST,
                format!("no capability grant for '{}' in task '{}'", resource, task),
            )
            .with_evidence(json!({ "resource": resource }));
        };

        let Some(limit) = &grant.rate_limit else {
            return GateVerdict::allow(TOOL_ALLOWLIST, format!("'{}' granted", resource))
                .with_evidence(json!({ "resource": resource, "grant": grant.resource }));
        };

        let evidence = json!({
            "resource": resource,
            "grant": grant.resource,
            "used": limit.used,
            "max_calls": limit.max_calls,
        });

        if limit.remaining() == 0 {
            GateVerdict::deny(
                TOOL_ALLOWLIST,
                format!(
                    "rate limit for '{}' exhausted ({}/{})",
                    resource, limit.used, limit.max_calls
                ),
            )
            .with_evidence(evidence)
        } else if limit.utilization() >= self.warn_utilization {
            GateVerdict::warn(
                TOOL_ALLOWLIST,
                format!(
                    "rate limit for '{}' nearly exhausted ({}/{})",
                    resource, limit.used, limit.max_calls
                ),
            )
            .with_evidence(evidence)
        } else {
            GateVerdict::allow(TOOL_ALLOWLIST, format!("'{}' granted", resource))
                .with_evidence(evidence)
        }
    }
}
