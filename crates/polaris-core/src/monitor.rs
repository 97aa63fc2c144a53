use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreservationState {
    Normal,
    SelfPreserving,
}

#[derive(Debug)]
struct MonitorInner {
    /// Sum over live leases of `60 / duration_secs`.
    expected_per_min: f64,
    state: PreservationState,
    window_started_at: u64,
    /// Renewal rate observed when the last window closed.
    last_actual_per_min: f64,
}

/// Watches the aggregate renewal rate. A sudden drop below the expected rate
/// is presumed to be a network partition between clients and the registry,
/// not mass instance death, so eviction is suppressed until the rate
/// recovers. The threshold scales with registry size.
pub struct SelfPreservationMonitor {
    renewals_this_window: AtomicU64,
    inner: Mutex<MonitorInner>,
    threshold: f64,
    window_millis: u64,
    enabled: bool,
}

impl SelfPreservationMonitor {
    pub fn new(threshold: f64, window_secs: u64, enabled: bool, now_millis: u64) -> Self {
        Self {
            renewals_this_window: AtomicU64::new(0),
            inner: Mutex::new(MonitorInner {
                expected_per_min: 0.0,
                state: PreservationState::Normal,
                window_started_at: now_millis,
                last_actual_per_min: 0.0,
            }),
            threshold,
            window_millis: window_secs * 1000,
            enabled,
        }
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, MonitorInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Called by the facade on every successful renewal. The only coupling
    /// between write traffic and this monitor.
    pub fn record_renewal(&self) {
        self.renewals_this_window.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lease_added(&self, duration_secs: u64) {
        let mut inner = self.inner();
        inner.expected_per_min += per_minute(duration_secs);
    }

    pub fn lease_removed(&self, duration_secs: u64) {
        let mut inner = self.inner();
        inner.expected_per_min = (inner.expected_per_min - per_minute(duration_secs)).max(0.0);
    }

    /// Rolls the monitoring window if it has elapsed and re-evaluates the
    /// state machine. Called once per sweep cycle; a no-op mid-window, so
    /// the sweep interval and the window length may differ.
    pub fn tick(&self, now_millis: u64) {
        let mut inner = self.inner();
        if now_millis.saturating_sub(inner.window_started_at) < self.window_millis {
            return;
        }
        let renewals = self.renewals_this_window.swap(0, Ordering::Relaxed);
        let actual_per_min = renewals as f64 * 60_000.0 / self.window_millis as f64;

        // An empty registry has nothing to preserve.
        inner.state = if self.enabled
            && inner.expected_per_min > 0.0
            && actual_per_min < inner.expected_per_min * self.threshold
        {
            PreservationState::SelfPreserving
        } else {
            PreservationState::Normal
        };
        inner.last_actual_per_min = actual_per_min;
        inner.window_started_at = now_millis;
    }

    pub fn eviction_permitted(&self) -> bool {
        self.inner().state == PreservationState::Normal
    }

    pub fn state(&self) -> PreservationState {
        self.inner().state
    }

    pub fn expected_renewals_per_min(&self) -> f64 {
        self.inner().expected_per_min
    }

    pub fn last_actual_renewals_per_min(&self) -> f64 {
        self.inner().last_actual_per_min
    }
}

fn per_minute(duration_secs: u64) -> f64 {
    60.0 / duration_secs.max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> SelfPreservationMonitor {
        SelfPreservationMonitor::new(0.85, 60, true, 0)
    }

    fn renew_n(monitor: &SelfPreservationMonitor, n: u64) {
        for _ in 0..n {
            monitor.record_renewal();
        }
    }

    #[test]
    fn starts_normal() {
        assert!(monitor().eviction_permitted());
    }

    #[test]
    fn empty_registry_never_self_preserves() {
        let monitor = monitor();
        monitor.tick(60_000);
        assert_eq!(monitor.state(), PreservationState::Normal);
    }

    #[test]
    fn renewal_drop_suppresses_eviction() {
        let monitor = monitor();
        // 10 leases heartbeating every 30s: 20 expected renewals/min
        for _ in 0..10 {
            monitor.lease_added(30);
        }
        renew_n(&monitor, 10); // 10/min < 20 * 0.85
        monitor.tick(60_000);
        assert_eq!(monitor.state(), PreservationState::SelfPreserving);
        assert!(!monitor.eviction_permitted());
    }

    #[test]
    fn healthy_rate_stays_normal() {
        let monitor = monitor();
        for _ in 0..10 {
            monitor.lease_added(30);
        }
        renew_n(&monitor, 18); // 18/min > 20 * 0.85 = 17
        monitor.tick(60_000);
        assert_eq!(monitor.state(), PreservationState::Normal);
    }

    #[test]
    fn recovery_re_enables_eviction() {
        let monitor = monitor();
        for _ in 0..10 {
            monitor.lease_added(30);
        }
        monitor.tick(60_000);
        assert!(!monitor.eviction_permitted());

        renew_n(&monitor, 20);
        monitor.tick(120_000);
        assert!(monitor.eviction_permitted());
    }

    #[test]
    fn tick_mid_window_keeps_state_and_counter() {
        let monitor = monitor();
        for _ in 0..10 {
            monitor.lease_added(30);
        }
        renew_n(&monitor, 18);
        monitor.tick(30_000); // window not elapsed
        monitor.tick(60_000);
        assert_eq!(monitor.state(), PreservationState::Normal);
    }

    #[test]
    fn disabled_monitor_always_permits_eviction() {
        let monitor = SelfPreservationMonitor::new(0.85, 60, false, 0);
        monitor.lease_added(30);
        monitor.tick(60_000);
        assert!(monitor.eviction_permitted());
    }

    #[test]
    fn expected_rate_tracks_lease_churn() {
        let monitor = monitor();
        monitor.lease_added(30);
        monitor.lease_added(30);
        assert_eq!(monitor.expected_renewals_per_min(), 4.0);
        monitor.lease_removed(30);
        assert_eq!(monitor.expected_renewals_per_min(), 2.0);
        monitor.lease_removed(30);
        monitor.lease_removed(30);
        assert_eq!(monitor.expected_renewals_per_min(), 0.0);
    }
}
