use crate::lease::LeaseConfig;

/// Registry-wide policy knobs. The timing and threshold defaults are
/// deployment policy, not invariants, so everything here is tunable.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Default lease timing applied when a registration carries no override.
    pub lease: LeaseConfig,
    /// How often the eviction sweeper runs.
    pub sweep_interval_secs: u64,
    /// Length of the self-preservation monitoring window.
    pub monitor_window_secs: u64,
    /// Eviction is suppressed when the actual renewal rate falls below
    /// `expected * renewal_percent_threshold`.
    pub renewal_percent_threshold: f64,
    pub self_preservation_enabled: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lease: LeaseConfig::default(),
            sweep_interval_secs: 60,
            monitor_window_secs: 60,
            renewal_percent_threshold: 0.85,
            self_preservation_enabled: true,
        }
    }
}
