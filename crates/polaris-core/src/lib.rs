pub mod config;
pub mod errors;
pub mod facade;
pub mod instance;
pub mod lease;
pub mod monitor;
pub mod status;
pub mod store;
pub mod time;

pub use config::RegistryConfig;
pub use errors::RegistryError;
pub use facade::{Registry, RegistryOverview, SweepOutcome};
pub use instance::ServiceInstance;
pub use lease::{Lease, LeaseConfig};
pub use monitor::{PreservationState, SelfPreservationMonitor};
pub use status::InstanceStatus;
pub use store::RegistryStore;
