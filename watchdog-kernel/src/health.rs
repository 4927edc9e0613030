use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct WatchdogHealth {
    pub uptime_seconds: u64,
    pub vms_tracked: u32,
    pub probes: u64,
    pub probe_failures: u64,
    pub api_calls: u64,
    pub api_failures: u64,
    pub remediations: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub notifications_dropped: u64,
    pub notifications_suppressed: u64,
}

#[derive(Default)]
struct Counters {
    probes: AtomicU64,
    probe_failures: AtomicU64,
    api_calls: AtomicU64,
    api_failures: AtomicU64,
    remediations: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    notifications_dropped: AtomicU64,
    notifications_suppressed: AtomicU64,
}

/// Compteurs process-wide, partagés par les monitors et la file de notifications.
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    counters: Arc<Counters>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn record_probe(&self, reachable: bool) {
        self.counters.probes.fetch_add(1, Ordering::Relaxed);
        if !reachable {
            self.counters.probe_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_api_call(&self, ok: bool) {
        self.counters.api_calls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.counters.api_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_remediation(&self) {
        self.counters.remediations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_sent(&self) {
        self.counters.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failed(&self) {
        self.counters.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_dropped(&self) {
        self.counters.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_suppressed(&self) {
        self.counters.notifications_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, vms_tracked: usize) -> WatchdogHealth {
        let c = &self.counters;
        WatchdogHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            vms_tracked: vms_tracked as u32,
            probes: c.probes.load(Ordering::Relaxed),
            probe_failures: c.probe_failures.load(Ordering::Relaxed),
            api_calls: c.api_calls.load(Ordering::Relaxed),
            api_failures: c.api_failures.load(Ordering::Relaxed),
            remediations: c.remediations.load(Ordering::Relaxed),
            notifications_sent: c.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: c.notifications_failed.load(Ordering::Relaxed),
            notifications_dropped: c.notifications_dropped.load(Ordering::Relaxed),
            notifications_suppressed: c.notifications_suppressed.load(Ordering::Relaxed),
        }
    }
}
