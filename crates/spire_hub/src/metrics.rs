//! Delivery counters for the hub.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated without taking the hub lock
#[derive(Debug, Default)]
pub struct HubMetrics {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    connected: AtomicU64,
}

impl HubMetrics {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_publish(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connected(&self) {
        self.connected.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy
    #[must_use]
    pub fn snapshot(&self) -> HubStats {
        HubStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            connected_total: self.connected.load(Ordering::Relaxed),
        }
    }
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Publish calls that reached at least one subscriber
    pub published: u64,
    /// Frames queued to clients
    pub delivered: u64,
    /// Frames dropped on full or closed queues
    pub dropped: u64,
    /// Clients ever registered
    pub connected_total: u64,
}

impl HubStats {
    /// Fraction of delivery attempts that were dropped (0.0 - 1.0)
    #[must_use]
    pub fn drop_rate(&self) -> f64 {
        let attempts = self.delivered + self.dropped;
        if attempts == 0 {
            return 0.0;
        }
        self.dropped as f64 / attempts as f64
    }
}
