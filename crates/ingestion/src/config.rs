//! Ingestion metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Ingestion metrics
///
/// Shared between the extractor worker and whoever reports on it.
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Bytes read from the source
    pub bytes_read: AtomicU64,

    /// Frames extracted
    pub frames_extracted: AtomicU64,

    /// Records decoded and handed downstream
    pub records_decoded: AtomicU64,

    /// Frames dropped by the decoder
    pub decode_errors: AtomicU64,

    /// Partial frames discarded (source closed mid-frame, or oversize)
    pub truncated_frames: AtomicU64,
}

impl IngestionMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record bytes read
    pub fn record_bytes(&self, n: usize) {
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Record frame extracted
    pub fn record_frame(&self) {
        self.frames_extracted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record successful decode
    pub fn record_decoded(&self) {
        self.records_decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record decode error
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record discarded partial frame
    pub fn record_truncated(&self) {
        self.truncated_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            frames_extracted: self.frames_extracted.load(Ordering::Relaxed),
            records_decoded: self.records_decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            truncated_frames: self.truncated_frames.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Bytes read from the source
    pub bytes_read: u64,

    /// Frames extracted
    pub frames_extracted: u64,

    /// Records decoded
    pub records_decoded: u64,

    /// Frames dropped by the decoder
    pub decode_errors: u64,

    /// Partial frames discarded
    pub truncated_frames: u64,
}
