//! Device aggregator worker
//!
//! Owns a [`DeviceTable`] on a dedicated tokio task. Sightings and flush
//! requests arrive over a bounded command queue; batch records leave over an
//! async channel into the router.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::Sender;
use contracts::{AggregatorConfig, DiscoveryEvent, Record};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::error::{AggregatorError, Result};
use crate::table::{DeviceTable, SightOutcome};

/// Command queue capacity
const COMMAND_QUEUE_CAPACITY: usize = 1024;

enum Command {
    Sight(DiscoveryEvent),
    Flush,
}

/// Aggregator counters
#[derive(Debug, Default)]
pub struct AggregatorStats {
    /// Sightings folded into the table
    pub sightings: AtomicU64,
    /// Access point sightings dropped
    pub ignored: AtomicU64,
    /// Devices evicted at capacity
    pub evicted: AtomicU64,
    /// Batch records emitted
    pub flushes: AtomicU64,
    /// Devices currently in the table
    pub devices: AtomicUsize,
}

impl AggregatorStats {
    /// Get snapshot
    pub fn snapshot(&self) -> AggregatorSnapshot {
        AggregatorSnapshot {
            sightings: self.sightings.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            devices: self.devices.load(Ordering::Relaxed),
        }
    }
}

/// Aggregator counters snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatorSnapshot {
    pub sightings: u64,
    pub ignored: u64,
    pub evicted: u64,
    pub flushes: u64,
    pub devices: usize,
}

/// Deduplicating "seen devices" aggregator
///
/// ```ignore
/// let (tx, rx) = async_channel::bounded(16);
/// let mut aggregator = DeviceAggregator::new(config, tx);
/// aggregator.start()?;
/// aggregator.sight(DiscoveryEvent::new("aa:bb:cc:dd:ee:ff", Some("home".into())))?;
/// aggregator.flush()?;
/// let batch = rx.recv().await?;
/// ```
pub struct DeviceAggregator {
    config: AggregatorConfig,
    output: Sender<Record>,
    commands: Option<mpsc::Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<AggregatorStats>,
    stopped: bool,
}

impl DeviceAggregator {
    /// Create a stopped aggregator emitting batches on `output`
    pub fn new(config: AggregatorConfig, output: Sender<Record>) -> Self {
        Self {
            config,
            output,
            commands: None,
            worker: None,
            stats: Arc::new(AggregatorStats::default()),
            stopped: false,
        }
    }

    /// Aggregator id (routing id of emitted batches)
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<AggregatorStats> {
        self.stats.clone()
    }

    /// Spawn the worker task
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(name = "aggregator_start", skip(self), fields(id = %self.config.id))]
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() || self.stopped {
            return Err(AggregatorError::AlreadyStarted {
                id: self.config.id.clone(),
            });
        }

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let worker = Worker {
            id: self.config.id.clone(),
            table: DeviceTable::new(&self.config),
            output: self.output.clone(),
            stats: self.stats.clone(),
            pending_flush: false,
        };
        let period = self.config.flush_period();

        self.worker = Some(tokio::spawn(worker.run(rx, period)));
        self.commands = Some(tx);

        info!(
            mode = ?self.config.mode,
            flush_period_ms = self.config.flush_period_ms,
            "device aggregator started"
        );
        Ok(())
    }

    /// Submit a sighting (never blocks)
    pub fn sight(&self, event: DiscoveryEvent) -> Result<()> {
        self.send(Command::Sight(event))
    }

    /// Submit a sighting carried by a decoded record
    pub fn sight_record(&self, record: &Record) -> Result<()> {
        self.sight(sighting_from_record(record, &self.config)?)
    }

    /// Request a flush
    ///
    /// When the table is empty the flush waits for the first sighting.
    pub fn flush(&self) -> Result<()> {
        self.send(Command::Flush)
    }

    fn send(&self, command: Command) -> Result<()> {
        let id = || self.config.id.clone();
        let Some(commands) = &self.commands else {
            return Err(if self.stopped {
                AggregatorError::Stopped { id: id() }
            } else {
                AggregatorError::NotStarted { id: id() }
            });
        };

        commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!(id = %self.config.id, "aggregator queue full, rejecting command");
                AggregatorError::QueueFull { id: id() }
            }
            mpsc::error::TrySendError::Closed(_) => AggregatorError::Stopped { id: id() },
        })
    }

    /// Stop accepting commands and wait for the worker
    ///
    /// Queued sightings are still applied; a non-empty table gets one final
    /// flush so no sighting is lost.
    #[instrument(name = "aggregator_shutdown", skip(self), fields(id = %self.config.id))]
    pub async fn shutdown(&mut self) {
        self.stopped = true;
        self.commands = None;

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "aggregator worker panicked");
            }
        }
        info!("device aggregator stopped");
    }
}

/// Build a sighting from a decoded record
///
/// Reads the configured identity / name / access point fields.
pub fn sighting_from_record(record: &Record, config: &AggregatorConfig) -> Result<DiscoveryEvent> {
    let identity = record
        .get_str(&config.identity_field)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AggregatorError::InvalidSighting {
            message: format!("missing string field '{}'", config.identity_field),
        })?;

    let display_name = match record.get(&config.name_field) {
        Some(Value::String(name)) => Some(name.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };

    let access_point = record
        .get(&config.access_point_field)
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(DiscoveryEvent::new(identity, display_name).access_point(access_point))
}

struct Worker {
    id: String,
    table: DeviceTable,
    output: Sender<Record>,
    stats: Arc<AggregatorStats>,
    pending_flush: bool,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, period: Option<Duration>) {
        let mut ticker = period.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Sight(event)) => {
                        self.apply(event);
                        if self.pending_flush && !self.table.is_empty() && !self.emit().await {
                            return;
                        }
                    }
                    Some(Command::Flush) => {
                        if !self.emit().await {
                            return;
                        }
                    }
                    None => break,
                },
                _ = tick(&mut ticker) => {
                    if !self.emit().await {
                        return;
                    }
                }
            }
        }

        if !self.table.is_empty() {
            debug!(id = %self.id, "final flush on shutdown");
            self.emit().await;
        }
    }

    fn apply(&mut self, event: DiscoveryEvent) {
        match self.table.sight(event) {
            SightOutcome::Inserted | SightOutcome::Updated => {
                self.stats.sightings.fetch_add(1, Ordering::Relaxed);
            }
            SightOutcome::InsertedWithEviction => {
                self.stats.sightings.fetch_add(1, Ordering::Relaxed);
                self.stats.evicted.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("sinknode_aggregator_evictions_total", "id" => self.id.clone())
                    .increment(1);
            }
            SightOutcome::IgnoredAccessPoint => {
                self.stats.ignored.fetch_add(1, Ordering::Relaxed);
            }
            SightOutcome::Invalid => {
                warn!(id = %self.id, "dropping sighting with empty identity");
            }
        }
        self.stats.devices.store(self.table.len(), Ordering::Relaxed);
    }

    /// Flush now, or mark the flush pending when the table is empty.
    /// Returns false once the output channel is closed.
    async fn emit(&mut self) -> bool {
        let Some(record) = self.table.flush(&self.id) else {
            self.pending_flush = true;
            return true;
        };
        self.pending_flush = false;
        self.stats.devices.store(self.table.len(), Ordering::Relaxed);
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sinknode_aggregator_flushes_total", "id" => self.id.clone())
            .increment(1);

        if self.output.send(record).await.is_err() {
            warn!(id = %self.id, "aggregator output closed, stopping");
            return false;
        }
        true
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
