//! Capability grants supplied by the external authorization collaborator.
//!
//! The kernel only ever reads a `CapabilitySet`. Grants are never created or
//! elevated by the kernel itself.

use serde::{Deserialize, Serialize};

/// A rate-limit constraint attached to a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_calls: u64,
    pub used: u64,
}

impl RateLimit {
    pub fn remaining(&self) -> u64 {
        self.max_calls.saturating_sub(self.used)
    }

    /// Fraction of the limit already used, in `[0, 1]`.
    pub fn utilization(&self) -> f64 {
        if self.max_calls == 0 {
            return 1.0;
        }
        (self.used as f64 / self.max_calls as f64).min(1.0)
    }
}

/// Permission to use one tool or resource.
///
/// `resource` is either an exact name (`"Write"`), a prefix pattern ending
/// in `*` (`"mcp__github__*"`), or `"*"` for everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityGrant {
    pub resource: String,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
}

impl CapabilityGrant {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            rate_limit: None,
        }
    }

    pub fn with_rate_limit(mut self, max_calls: u64, used: u64) -> Self {
        self.rate_limit = Some(RateLimit { max_calls, used });
        self
    }

    pub fn matches(&self, resource: &str) -> bool {
        match self.resource.strip_suffix('*') {
            Some(prefix) => resource.starts_with(prefix),
            None => self.resource == resource,
        }
    }
}

/// The grants active for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    grants: Vec<CapabilityGrant>,
}

impl CapabilitySet {
    /// Add a grant to this set.
    pub fn grant(&mut self, grant: CapabilityGrant) {
        self.grants.push(grant);
    }

    /// Builder form of [`CapabilitySet::grant`].
    pub fn with(mut self, grant: CapabilityGrant) -> Self {
        self.grant(grant);
        self
    }

    /// The grant covering `resource`.
    ///
    /// An exact grant wins over a pattern; among patterns the longest
    /// prefix wins.
    pub fn find(&self, resource: &str) -> Option<&CapabilityGrant> {
        if let Some(exact) = self.grants.iter().find(|g| g.resource == resource) {
            return Some(exact);
        }
        self.grants
            .iter()
            .filter(|g| g.resource.ends_with('*') && g.matches(resource))
            .max_by_key(|g| g.resource.len())
    }

    pub fn has(&self, resource: &str) -> bool {
        self.find(resource).is_some()
    }

    /// Return an iterator over all grants.
    pub fn all(&self) -> impl Iterator<Item = &CapabilityGrant> {
        self.grants.iter()
    }
}
