use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lock-free event bus counters.
#[derive(Debug, Default)]
pub struct EventMetrics {
    received: AtomicU64,
    processed: AtomicU64,
    filtered: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    without_listener: AtomicU64,
    processing_nanos: AtomicU64,
}

impl EventMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_without_listener(&self) {
        self.without_listener.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_processed(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.processing_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EventMetricsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let total_nanos = self.processing_nanos.load(Ordering::Relaxed);
        let average_processing_time = if processed == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(total_nanos / processed)
        };
        EventMetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed,
            filtered: self.filtered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            without_listener: self.without_listener.load(Ordering::Relaxed),
            average_processing_time,
            queue_depth: 0,
            listener_count: 0,
        }
    }
}

/// Point-in-time copy of [`EventMetrics`] plus queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventMetricsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub filtered: u64,
    pub dropped: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub without_listener: u64,
    pub average_processing_time: Duration,
    pub queue_depth: usize,
    pub listener_count: usize,
}
