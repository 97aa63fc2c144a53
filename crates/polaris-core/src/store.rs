use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::RegistryError;
use crate::instance::ServiceInstance;
use crate::lease::{Lease, LeaseConfig};
use crate::status::InstanceStatus;
use crate::time::Clock;

type Shard = Arc<RwLock<HashMap<String, Lease>>>;

/// Concurrent directory of live leases, partitioned by service name so that
/// heartbeat traffic for one service never contends with another. Lock order
/// is always outer map before shard; shard locks are only taken while an
/// outer guard is held.
pub struct RegistryStore {
    services: RwLock<HashMap<String, Shard>>,
    clock: Arc<dyn Clock>,
}

// A poisoned guard still wraps consistent data: every critical section below
// is a single map operation that cannot leave the shard half-mutated.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl RegistryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Inserts or replaces the lease for `(service_name, instance_id)`.
    /// Re-registration with the same key is treated as a fresh lease (the
    /// instance restarted). Returns the stored lease snapshot and, if the key
    /// already existed, the lease it replaced.
    pub fn register(
        &self,
        instance: ServiceInstance,
        config: LeaseConfig,
    ) -> (Lease, Option<Lease>) {
        let now = self.clock.now_millis();
        let lease = Lease::new(instance, config, now);
        let key = lease.instance.instance_id.clone();

        let services = read(&self.services);
        if let Some(shard) = services.get(&lease.instance.service_name) {
            let replaced = write(shard).insert(key, lease.clone());
            return (lease, replaced);
        }
        drop(services);

        let mut services = write(&self.services);
        let shard = services
            .entry(lease.instance.service_name.clone())
            .or_default();
        let replaced = write(shard).insert(key, lease.clone());
        (lease, replaced)
    }

    /// Resets the lease's expiry clock. The instance must re-register if its
    /// lease was already cancelled or swept.
    pub fn renew(&self, service: &str, instance_id: &str) -> Result<(), RegistryError> {
        let now = self.clock.now_millis();
        let services = read(&self.services);
        let shard = services
            .get(service)
            .ok_or_else(|| RegistryError::not_found(service, instance_id))?;
        let mut leases = write(shard);
        let lease = leases
            .get_mut(instance_id)
            .ok_or_else(|| RegistryError::not_found(service, instance_id))?;
        lease.renew(now);
        Ok(())
    }

    /// Removes the lease immediately, regardless of freshness. Returns the
    /// removed lease so the caller can settle expected-renewal bookkeeping.
    pub fn cancel(&self, service: &str, instance_id: &str) -> Result<Lease, RegistryError> {
        let removed = {
            let services = read(&self.services);
            let shard = services
                .get(service)
                .ok_or_else(|| RegistryError::not_found(service, instance_id))?;
            write(shard)
                .remove(instance_id)
                .ok_or_else(|| RegistryError::not_found(service, instance_id))?
        };
        self.drop_service_if_empty(service);
        Ok(removed)
    }

    pub fn set_status(
        &self,
        service: &str,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<(), RegistryError> {
        let services = read(&self.services);
        let shard = services
            .get(service)
            .ok_or_else(|| RegistryError::not_found(service, instance_id))?;
        let mut leases = write(shard);
        let lease = leases
            .get_mut(instance_id)
            .ok_or_else(|| RegistryError::not_found(service, instance_id))?;
        lease.instance.set_status(status);
        Ok(())
    }

    /// All instances registered under `service`, expired-but-unswept entries
    /// included: visibility is decided by the sweeper, not by readers, so
    /// self-preservation can keep entries alive through a partition.
    pub fn query(&self, service: &str) -> Vec<ServiceInstance> {
        let services = read(&self.services);
        match services.get(service) {
            Some(shard) => read(shard).values().map(|l| l.instance.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Full point-in-time snapshot for bulk discovery.
    pub fn query_all(&self) -> HashMap<String, Vec<ServiceInstance>> {
        let services = read(&self.services);
        services
            .iter()
            .map(|(name, shard)| {
                let instances = read(shard).values().map(|l| l.instance.clone()).collect();
                (name.clone(), instances)
            })
            .collect()
    }

    /// Snapshot of every lease. Sweep mutation goes through `evict_expired`;
    /// this is for rate bookkeeping and diagnostics.
    pub fn all_leases(&self) -> Vec<Lease> {
        let services = read(&self.services);
        services
            .values()
            .flat_map(|shard| read(shard).values().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn lease_count(&self) -> usize {
        let services = read(&self.services);
        services.values().map(|shard| read(shard).len()).sum()
    }

    /// Removes every lease past its eviction threshold and returns them.
    /// Callers gate this on the self-preservation monitor.
    pub fn evict_expired(&self, now_millis: u64) -> Vec<Lease> {
        let names: Vec<String> = {
            let services = read(&self.services);
            services.keys().cloned().collect()
        };

        let mut evicted = Vec::new();
        for name in names {
            let emptied = {
                let services = read(&self.services);
                let Some(shard) = services.get(&name) else {
                    continue;
                };
                let mut leases = write(shard);
                leases.retain(|_, lease| {
                    if lease.is_expired(now_millis) {
                        evicted.push(lease.clone());
                        false
                    } else {
                        true
                    }
                });
                leases.is_empty()
            };
            if emptied {
                self.drop_service_if_empty(&name);
            }
        }
        evicted
    }

    // Re-checks emptiness under the outer write lock: a registration racing
    // this call holds the outer read guard across its shard insert, so the
    // shard cannot gain a lease between the check and the removal here.
    fn drop_service_if_empty(&self, service: &str) {
        let mut services = write(&self.services);
        let empty = services
            .get(service)
            .map(|shard| read(shard).is_empty())
            .unwrap_or(false);
        if empty {
            services.remove(service);
        }
    }
}
