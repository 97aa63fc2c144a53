use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::RegistryConfig;
use crate::errors::RegistryError;
use crate::instance::ServiceInstance;
use crate::lease::{Lease, LeaseConfig};
use crate::monitor::{PreservationState, SelfPreservationMonitor};
use crate::status::InstanceStatus;
use crate::store::RegistryStore;
use crate::time::Clock;

/// Result of one eviction sweep cycle.
#[derive(Debug, Clone, Copy)]
pub struct SweepOutcome {
    pub evicted: usize,
    pub suppressed: bool,
    pub state: PreservationState,
}

/// Point-in-time summary for dashboards and the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegistryOverview {
    pub services: usize,
    pub instances: usize,
    pub state: PreservationState,
    pub expected_renewals_per_min: f64,
    pub actual_renewals_per_min: f64,
}

/// The operation surface transport layers call into. Validates input before
/// it reaches the store and keeps the self-preservation monitor's rate
/// bookkeeping consistent with lease churn.
pub struct Registry {
    store: RegistryStore,
    monitor: SelfPreservationMonitor,
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
}

impl Registry {
    pub fn new(config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        let monitor = SelfPreservationMonitor::new(
            config.renewal_percent_threshold,
            config.monitor_window_secs,
            config.self_preservation_enabled,
            clock.now_millis(),
        );
        Self {
            store: RegistryStore::new(clock.clone()),
            monitor,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Registers `instance`, replacing any existing lease for the same
    /// `(service_name, instance_id)`. `lease` overrides the registry's
    /// default timing when given.
    pub fn register(
        &self,
        instance: ServiceInstance,
        lease: Option<LeaseConfig>,
    ) -> Result<Lease, RegistryError> {
        validate_instance(&instance)?;
        let lease_config = lease.unwrap_or(self.config.lease);
        validate_lease_config(&lease_config)?;

        let (lease, replaced) = self.store.register(instance, lease_config);
        if let Some(old) = replaced {
            self.monitor.lease_removed(old.duration_secs);
        }
        self.monitor.lease_added(lease.duration_secs);
        Ok(lease)
    }

    pub fn renew(&self, service: &str, instance_id: &str) -> Result<(), RegistryError> {
        self.store.renew(service, instance_id)?;
        self.monitor.record_renewal();
        Ok(())
    }

    pub fn cancel(&self, service: &str, instance_id: &str) -> Result<(), RegistryError> {
        let removed = self.store.cancel(service, instance_id)?;
        self.monitor.lease_removed(removed.duration_secs);
        Ok(())
    }

    pub fn set_status(
        &self,
        service: &str,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<(), RegistryError> {
        self.store.set_status(service, instance_id, status)
    }

    pub fn query(&self, service: &str) -> Vec<ServiceInstance> {
        self.store.query(service)
    }

    pub fn query_all(&self) -> HashMap<String, Vec<ServiceInstance>> {
        self.store.query_all()
    }

    pub fn overview(&self) -> RegistryOverview {
        let snapshot = self.store.query_all();
        RegistryOverview {
            services: snapshot.len(),
            instances: snapshot.values().map(Vec::len).sum(),
            state: self.monitor.state(),
            expected_renewals_per_min: self.monitor.expected_renewals_per_min(),
            actual_renewals_per_min: self.monitor.last_actual_renewals_per_min(),
        }
    }

    /// One eviction cycle: roll the monitoring window, then remove expired
    /// leases unless self-preservation is in effect. Never fails; a cycle
    /// that removes nothing is a valid cycle.
    pub fn sweep(&self) -> SweepOutcome {
        let now = self.clock.now_millis();
        self.monitor.tick(now);

        if !self.monitor.eviction_permitted() {
            return SweepOutcome {
                evicted: 0,
                suppressed: true,
                state: self.monitor.state(),
            };
        }

        let evicted = self.store.evict_expired(now);
        for lease in &evicted {
            self.monitor.lease_removed(lease.duration_secs);
        }
        SweepOutcome {
            evicted: evicted.len(),
            suppressed: false,
            state: self.monitor.state(),
        }
    }
}

fn validate_instance(instance: &ServiceInstance) -> Result<(), RegistryError> {
    validate_identifier("service_name", &instance.service_name)?;
    validate_identifier("instance_id", &instance.instance_id)?;
    validate_address(&instance.address)
}

fn validate_identifier(field: &str, value: &str) -> Result<(), RegistryError> {
    if value.trim().is_empty() {
        return Err(RegistryError::Validation(format!("{field} must not be empty")));
    }
    if value.contains(['/', ' ', '\t', '\n']) {
        return Err(RegistryError::Validation(format!(
            "{field} must not contain '/' or whitespace"
        )));
    }
    Ok(())
}

fn validate_address(address: &str) -> Result<(), RegistryError> {
    if address.parse::<std::net::SocketAddr>().is_ok() {
        return Ok(());
    }
    if address.starts_with("http://") || address.starts_with("https://") {
        return Ok(());
    }
    // hostname:port
    if let Some((host, port)) = address.rsplit_once(':') {
        if !host.is_empty() && port.parse::<u16>().is_ok() {
            return Ok(());
        }
    }
    Err(RegistryError::Validation(format!(
        "address '{address}' is not host:port or an http(s) URI"
    )))
}

fn validate_lease_config(config: &LeaseConfig) -> Result<(), RegistryError> {
    if config.duration_secs == 0 {
        return Err(RegistryError::Validation(
            "lease duration_secs must be positive".into(),
        ));
    }
    if config.eviction_threshold_secs < config.duration_secs {
        return Err(RegistryError::Validation(
            "eviction_threshold_secs must be at least duration_secs".into(),
        ));
    }
    Ok(())
}
