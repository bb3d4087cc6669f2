//! Record stream metrics
//!
//! Facade helpers for the orchestration layer plus an in-memory aggregator
//! for the end-of-run summary.

use std::collections::HashMap;
use std::time::Duration;

use contracts::Record;
use metrics::{counter, gauge, histogram};

/// Record one decoded record entering the router
pub fn record_record_received(id: Option<&str>) {
    match id {
        Some(id) => {
            counter!("sinknode_records_received_total", "id" => id.to_string()).increment(1)
        }
        None => counter!("sinknode_records_received_total", "id" => "none").increment(1),
    }
}

/// Publish one sink's counters as gauges
pub fn record_sink_snapshot(
    sink: &str,
    queue_len: usize,
    delivered: u64,
    failures: u64,
    dropped: u64,
) {
    let sink = sink.to_string();
    gauge!("sinknode_sink_queue_depth", "sink" => sink.clone()).set(queue_len as f64);
    gauge!("sinknode_sink_delivered", "sink" => sink.clone()).set(delivered as f64);
    gauge!("sinknode_sink_failures", "sink" => sink.clone()).set(failures as f64);
    gauge!("sinknode_sink_dropped", "sink" => sink).set(dropped as f64);
}

/// Record stream aggregator
///
/// Tracks totals, per-id counts, record widths and inter-arrival gaps.
#[derive(Debug, Clone, Default)]
pub struct RecordStatsAggregator {
    /// Records seen
    pub total_records: u64,

    /// Records without a routable id
    pub without_id: u64,

    /// Field count per record
    pub field_stats: RunningStats,

    /// Gap between consecutive records (ms)
    pub interarrival_stats: RunningStats,

    /// Records per id
    pub id_counts: HashMap<String, u64>,
}

impl RecordStatsAggregator {
    /// Create empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record; `gap` is the time since the previous one
    pub fn update(&mut self, record: &Record, gap: Option<Duration>) {
        self.total_records += 1;
        self.field_stats.push(record.len() as f64);

        if let Some(gap) = gap {
            let gap_ms = gap.as_secs_f64() * 1000.0;
            self.interarrival_stats.push(gap_ms);
            histogram!("sinknode_record_interarrival_ms").record(gap_ms);
        }

        match record.id() {
            Some(id) => *self.id_counts.entry(id.to_string()).or_insert(0) += 1,
            None => self.without_id += 1,
        }
    }

    /// Summary report
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_records: self.total_records,
            without_id: self.without_id,
            unroutable_rate: if self.total_records > 0 {
                self.without_id as f64 / self.total_records as f64 * 100.0
            } else {
                0.0
            },
            fields_per_record: StatsSummary::from(&self.field_stats),
            interarrival_ms: StatsSummary::from(&self.interarrival_stats),
            id_counts: self.id_counts.clone(),
        }
    }

    /// Reset
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Record stream summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_records: u64,
    pub without_id: u64,
    pub unroutable_rate: f64,
    pub fields_per_record: StatsSummary,
    pub interarrival_ms: StatsSummary,
    pub id_counts: HashMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Record Metrics Summary ===")?;
        writeln!(f, "Total records: {}", self.total_records)?;
        writeln!(
            f,
            "Without id: {} ({:.2}%)",
            self.without_id, self.unroutable_rate
        )?;
        writeln!(f, "Fields per record: {}", self.fields_per_record)?;
        writeln!(f, "Inter-arrival (ms): {}", self.interarrival_ms)?;

        if !self.id_counts.is_empty() {
            writeln!(f, "Records per id:")?;
            let mut ids: Vec<_> = self.id_counts.iter().collect();
            ids.sort();
            for (id, count) in ids {
                writeln!(f, "  {id}: {count}")?;
            }
        }

        Ok(())
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// Add a sample
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }

        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.mean }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
