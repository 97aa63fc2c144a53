use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::instance::ServiceInstance;

/// Per-lease timing contract. `duration_secs` is how often the instance is
/// expected to heartbeat; `eviction_threshold_secs` is how long the registry
/// tolerates silence before the sweeper may remove the lease.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct LeaseConfig {
    pub duration_secs: u64,
    pub eviction_threshold_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_secs: 30,
            eviction_threshold_secs: 90,
        }
    }
}

/// A service instance bound to a time-based expiry contract. Owned by the
/// store; everything handed out is a clone.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Lease {
    pub instance: ServiceInstance,
    pub registered_at: u64,
    pub last_renewed_at: u64,
    pub duration_secs: u64,
    pub eviction_threshold_secs: u64,
}

impl Lease {
    pub fn new(instance: ServiceInstance, config: LeaseConfig, now_millis: u64) -> Self {
        Self {
            instance,
            registered_at: now_millis,
            last_renewed_at: now_millis,
            duration_secs: config.duration_secs,
            eviction_threshold_secs: config.eviction_threshold_secs,
        }
    }

    /// Resets the expiry clock. `last_renewed_at` never moves backwards.
    pub fn renew(&mut self, now_millis: u64) {
        self.last_renewed_at = self.last_renewed_at.max(now_millis);
    }

    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis.saturating_sub(self.last_renewed_at) > self.eviction_threshold_secs * 1000
    }
}
