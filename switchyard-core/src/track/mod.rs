use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

const LATENCY_ALPHA: f64 = 0.1;

/// Live per-vHost counters (hot path).
#[derive(Debug, Default)]
struct RouteStats {
    requests_total: AtomicU64,
    requests_active: AtomicU64,
    errors_total: AtomicU64,

    /// EWMA latency in milliseconds, stored as f64 bits for lock-free
    /// atomic updates.
    avg_latency_ms: AtomicU64,
}

impl RouteStats {
    fn observe_latency(&self, sample_ms: f64) {
        let mut current = self.avg_latency_ms.load(Ordering::Acquire);
        loop {
            let avg = f64::from_bits(current);
            let next = (1.0 - LATENCY_ALPHA) * avg + LATENCY_ALPHA * sample_ms;
            match self.avg_latency_ms.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    fn view(&self) -> RouteStatsView {
        RouteStatsView {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_active: self.requests_active.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            avg_latency_ms: f64::from_bits(self.avg_latency_ms.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time copy of one vHost's stats, as exposed by the stats API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatsView {
    pub requests_total: u64,
    pub requests_active: u64,
    pub errors_total: u64,
    pub avg_latency_ms: f64,
}

/// Per-vHost request accounting. All operations are O(1) against a
/// concurrent map; entries are created on demand and removed with their
/// route.
#[derive(Debug, Default)]
pub struct Tracker {
    stats: DashMap<String, RouteStats>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a vHost shows up in the stats API even before traffic.
    pub fn ensure(&self, vhost: &str) {
        self.stats.entry(vhost.to_string()).or_default();
    }

    pub fn on_start(&self, vhost: &str) {
        let stats = self.stats.entry(vhost.to_string()).or_default();
        stats.requests_total.fetch_add(1, Ordering::Relaxed);
        stats.requests_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_end(&self, vhost: &str, success: bool, elapsed_ms: f64) {
        // The entry is gone when the route was deleted mid-flight.
        let Some(stats) = self.stats.get(vhost) else {
            return;
        };

        // Floor at zero so a double-finalize bug cannot wrap the gauge.
        let _ = stats
            .requests_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });

        if !success {
            stats.errors_total.fetch_add(1, Ordering::Relaxed);
        }

        stats.observe_latency(elapsed_ms);
    }

    /// Record a rejection that never became active. The code is a log field
    /// only; it is not kept per code.
    pub fn on_error(&self, vhost: &str, code: &str) {
        tracing::debug!(vhost, code, "request rejected");
        if let Some(stats) = self.stats.get(vhost) {
            stats.errors_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn remove(&self, vhost: &str) {
        self.stats.remove(vhost);
    }

    pub fn get(&self, vhost: &str) -> Option<RouteStatsView> {
        self.stats.get(vhost).map(|s| s.view())
    }

    pub fn all(&self) -> BTreeMap<String, RouteStatsView> {
        self.stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().view()))
            .collect()
    }
}
