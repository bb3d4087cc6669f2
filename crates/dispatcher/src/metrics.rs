//! Sink metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for a single sink
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Current queue length
    queue_len: AtomicUsize,
    /// Tickets delivered
    delivered_count: AtomicU64,
    /// Failed delivery invocations (every attempt counts)
    failure_count: AtomicU64,
    /// Tickets dropped after exhausting their attempts
    exhausted_count: AtomicU64,
    /// Records rejected or evicted by a full queue
    dropped_count: AtomicU64,
    /// Records the formatter could not render
    format_error_count: AtomicU64,
}

impl SinkMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current queue length
    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    /// Set current queue length
    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    /// Get delivered count
    pub fn delivered_count(&self) -> u64 {
        self.delivered_count.load(Ordering::Relaxed)
    }

    /// Increment delivered count
    pub fn inc_delivered_count(&self) {
        self.delivered_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get failure count
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Increment failure count
    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get exhausted count
    pub fn exhausted_count(&self) -> u64 {
        self.exhausted_count.load(Ordering::Relaxed)
    }

    /// Increment exhausted count
    pub fn inc_exhausted_count(&self) {
        self.exhausted_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get dropped count
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Increment dropped count
    pub fn inc_dropped_count(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get format error count
    pub fn format_error_count(&self) -> u64 {
        self.format_error_count.load(Ordering::Relaxed)
    }

    /// Increment format error count
    pub fn inc_format_error_count(&self) {
        self.format_error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            delivered_count: self.delivered_count(),
            failure_count: self.failure_count(),
            exhausted_count: self.exhausted_count(),
            dropped_count: self.dropped_count(),
            format_error_count: self.format_error_count(),
        }
    }
}

/// Snapshot of sink metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub delivered_count: u64,
    pub failure_count: u64,
    pub exhausted_count: u64,
    pub dropped_count: u64,
    pub format_error_count: u64,
}
