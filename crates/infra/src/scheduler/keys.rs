//! Coordination-store key layout.

use super::job::JobId;

/// Builds every key the scheduler touches under one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The leadership lease.
    pub fn leader(&self) -> String {
        format!("{}:leader", self.prefix)
    }

    /// Sorted set of pending job ids scored by `execute_at`.
    pub fn queue(&self) -> String {
        format!("{}:queue", self.prefix)
    }

    /// Serialized job body.
    pub fn job(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    /// Per-job claim lock.
    pub fn lock(&self, id: &JobId) -> String {
        format!("{}:lock:{}", self.prefix, id)
    }

    /// Processed marker.
    pub fn processed(&self, id: &JobId) -> String {
        format!("{}:processed:{}", self.prefix, id)
    }

    /// Pub/sub channel for scheduler events.
    pub fn events_channel(&self) -> String {
        format!("{}:events", self.prefix)
    }
}
