use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::status::InstanceStatus;

/// One running instance of a named service. `(service_name, instance_id)` is
/// the registry key; the address is whatever clients should dial to reach it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInstance {
    pub service_name: String,
    pub instance_id: String,
    /// Network address: `host:port` or an http(s) URI
    pub address: String,
    pub status: InstanceStatus,
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    pub fn new(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            address: address.into(),
            status: InstanceStatus::Up,
            metadata: HashMap::new(),
        }
    }

    pub fn set_status(&mut self, status: InstanceStatus) {
        self.status = status;
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn get_metadata(&self, key: &str) -> Option<&String> {
        self.metadata.get(key)
    }
}
