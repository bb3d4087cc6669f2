//! Pipeline statistics and metrics.

use std::time::Duration;

use aggregator::AggregatorSnapshot;
use dispatcher::{MetricsSnapshot, RouterSnapshot};
use ingestion::MetricsSnapshot as IngestionSnapshot;
use observability::RecordStatsAggregator;

/// Why the record loop ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopReason {
    /// Source closed or failed
    #[default]
    SourceClosed,
    /// `--max-records` reached
    MaxRecords,
    /// `--timeout` elapsed
    Timeout,
    /// Ctrl-C / SIGTERM
    Signal,
    /// Router input closed underneath us
    RouterClosed,
}

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Records taken off the ingestion channel
    pub records_received: u64,

    /// Sightings the aggregator refused (discovery mode)
    pub sightings_rejected: u64,

    /// Total duration of the pipeline run
    pub duration: Duration,

    /// Why the run ended
    pub stop_reason: StopReason,

    /// Extractor / decoder counters
    pub ingestion: IngestionSnapshot,

    /// Router counters
    pub router: RouterSnapshot,

    /// Per-sink counters
    pub sinks: Vec<(String, MetricsSnapshot)>,

    /// Aggregator counters (discovery mode)
    pub aggregator: Option<AggregatorSnapshot>,

    /// Record stream aggregator
    pub record_metrics: RecordStatsAggregator,
}

impl PipelineStats {
    /// Records per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.records_received as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Total deliveries across sinks
    pub fn delivered(&self) -> u64 {
        self.sinks.iter().map(|(_, s)| s.delivered_count).sum()
    }

    /// Decode error rate as percentage of extracted frames
    pub fn decode_error_rate(&self) -> f64 {
        if self.ingestion.frames_extracted > 0 {
            self.ingestion.decode_errors as f64 / self.ingestion.frames_extracted as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Pipeline Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Stopped by: {:?}", self.stop_reason);
        println!("   ├─ Records received: {}", self.records_received);
        println!("   ├─ Throughput: {:.2} records/s", self.throughput());
        println!("   └─ Deliveries: {}", self.delivered());

        let ingestion = &self.ingestion;
        println!("\n📥 Ingestion");
        println!("   ├─ Bytes read: {}", ingestion.bytes_read);
        println!("   ├─ Frames extracted: {}", ingestion.frames_extracted);
        println!("   ├─ Records decoded: {}", ingestion.records_decoded);
        println!(
            "   ├─ Decode errors: {} ({:.2}%)",
            ingestion.decode_errors,
            self.decode_error_rate()
        );
        println!("   └─ Truncated frames: {}", ingestion.truncated_frames);

        if let Some(aggregator) = &self.aggregator {
            println!("\n📡 Device Aggregator");
            println!("   ├─ Sightings: {}", aggregator.sightings);
            println!("   ├─ Rejected sightings: {}", self.sightings_rejected);
            println!("   ├─ Ignored access points: {}", aggregator.ignored);
            println!("   ├─ Flushes: {}", aggregator.flushes);
            println!("   └─ Evictions: {}", aggregator.evicted);
        }

        let router = &self.router;
        println!("\n🔀 Router");
        println!("   ├─ Routed: {}", router.routed);
        println!("   ├─ Unroutable: {}", router.unroutable);
        println!("   ├─ Unmatched: {}", router.unmatched);
        println!("   └─ Copies queued: {}", router.deliveries_queued);

        if !self.sinks.is_empty() {
            println!("\n📤 Sinks");
            for (i, (name, sink)) in self.sinks.iter().enumerate() {
                let prefix = if i == self.sinks.len() - 1 { "└─" } else { "├─" };
                println!(
                    "   {} {}: delivered={} failures={} exhausted={} dropped={} format_errors={} left={}",
                    prefix,
                    name,
                    sink.delivered_count,
                    sink.failure_count,
                    sink.exhausted_count,
                    sink.dropped_count,
                    sink.format_error_count,
                    sink.queue_len
                );
            }
        }

        println!("\n{}", self.record_metrics.summary());
    }
}
