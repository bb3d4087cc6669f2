//! Router - fan-out of records to matching sinks

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use contracts::{Record, RouteKey, SinkConfig, SinkType};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::error::DispatcherError;
use crate::format::build_formatter;
use crate::metrics::MetricsSnapshot;
use crate::rate_limited::{QueueConfig, RateLimitedSink};
use crate::sinks::{FileDeliver, HttpDeliver, LogDeliver, TcpDeliver};

/// Which records a sink receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePredicate {
    /// Every routable record
    All,
    /// Records whose `id` equals the key
    IdEquals(RouteKey),
}

impl RoutePredicate {
    /// Predicate for an optional configured route id
    pub fn from_route_id(route_id: Option<&str>) -> Self {
        match route_id {
            Some(id) => Self::IdEquals(RouteKey::new(id)),
            None => Self::All,
        }
    }

    /// Whether a record id passes
    pub fn matches(&self, id: &str) -> bool {
        match self {
            Self::All => true,
            Self::IdEquals(key) => key.matches(Some(id)),
        }
    }
}

/// A sink and the predicate guarding it
#[derive(Clone)]
pub struct SinkRegistration {
    pub sink: Arc<RateLimitedSink>,
    pub predicate: RoutePredicate,
}

impl SinkRegistration {
    pub fn new(sink: impl Into<Arc<RateLimitedSink>>, predicate: RoutePredicate) -> Self {
        Self {
            sink: sink.into(),
            predicate,
        }
    }

    /// Sink name
    pub fn name(&self) -> &str {
        self.sink.name()
    }
}

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Router counters
#[derive(Debug, Default)]
pub struct RouterStats {
    routed: AtomicU64,
    unroutable: AtomicU64,
    unmatched: AtomicU64,
    rejected: AtomicU64,
    deliveries_queued: AtomicU64,
}

impl RouterStats {
    /// Get snapshot
    pub fn snapshot(&self) -> RouterSnapshot {
        RouterSnapshot {
            routed: self.routed.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            deliveries_queued: self.deliveries_queued.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of router counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterSnapshot {
    /// Records accepted at the router boundary
    pub routed: u64,
    /// Records dropped for a missing or non-string id
    pub unroutable: u64,
    /// Routable records no sink matched
    pub unmatched: u64,
    /// Records offered while the router was not running
    pub rejected: u64,
    /// Copies accepted by sink queues
    pub deliveries_queued: u64,
}

/// Fan-out router
///
/// Registrations live behind a copy-on-write snapshot: `add`/`remove` swap in a
/// new list, `route` clones the `Arc` and iterates without holding the lock.
pub struct Router {
    registrations: RwLock<Arc<Vec<SinkRegistration>>>,
    state: AtomicU8,
    stats: RouterStats,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create an empty router
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(Arc::new(Vec::new())),
            state: AtomicU8::new(STATE_IDLE),
            stats: RouterStats::default(),
        }
    }

    /// Build sinks and registrations from configuration
    #[instrument(name = "router_from_configs", skip(configs), fields(sink_count = configs.len()))]
    pub fn from_configs(configs: &[SinkConfig]) -> Result<Self, DispatcherError> {
        let router = Self::new();
        for config in configs {
            let sink = create_sink(config)?;
            router.add(sink, RoutePredicate::from_route_id(config.route_id.as_deref()))?;
        }
        Ok(router)
    }

    fn snapshot(&self) -> Arc<Vec<SinkRegistration>> {
        Arc::clone(&self.registrations.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Current registrations
    pub fn registrations(&self) -> Arc<Vec<SinkRegistration>> {
        self.snapshot()
    }

    /// Whether the router accepts records
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    /// Register a sink
    ///
    /// A sink added to a running router is started immediately.
    ///
    /// # Errors
    /// `DuplicateSink` when the name is taken.
    pub fn add(
        &self,
        sink: impl Into<Arc<RateLimitedSink>>,
        predicate: RoutePredicate,
    ) -> Result<(), DispatcherError> {
        let registration = SinkRegistration::new(sink, predicate);
        let mut guard = self
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if guard.iter().any(|r| r.name() == registration.name()) {
            return Err(DispatcherError::DuplicateSink {
                name: registration.name().to_string(),
            });
        }
        if self.is_running() && !registration.sink.is_started() {
            registration.sink.start()?;
        }

        debug!(sink = %registration.name(), predicate = ?registration.predicate, "sink registered");
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(registration);
        *guard = Arc::new(next);
        Ok(())
    }

    /// Unregister a sink; its intake is closed and it drains on its own
    ///
    /// Returns the sink so the caller can `join()` it.
    pub fn remove(&self, name: &str) -> Option<Arc<RateLimitedSink>> {
        let mut guard = self
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let position = guard.iter().position(|r| r.name() == name)?;
        let mut next: Vec<SinkRegistration> = guard.iter().cloned().collect();
        let removed = next.remove(position);
        *guard = Arc::new(next);

        removed.sink.drain();
        debug!(sink = %name, "sink removed");
        Some(removed.sink)
    }

    /// Start every sink's delivery loop, then accept records
    ///
    /// # Errors
    /// `AlreadyStarted` when the router was started before.
    #[instrument(name = "router_start", skip(self))]
    pub fn start(&self) -> Result<(), DispatcherError> {
        if self.state.load(Ordering::Acquire) != STATE_IDLE {
            return Err(DispatcherError::AlreadyStarted {
                sink_name: "router".to_string(),
            });
        }

        let registrations = self.snapshot();
        for registration in registrations.iter() {
            if !registration.sink.is_started() {
                registration.sink.start()?;
            }
        }
        self.state.store(STATE_RUNNING, Ordering::Release);
        info!(sinks = registrations.len(), "Router started");
        Ok(())
    }

    /// Signal every sink to stop, then stop intake
    #[instrument(name = "router_stop", skip(self))]
    pub fn stop(&self) {
        for registration in self.snapshot().iter() {
            registration.sink.stop();
        }
        self.state.store(STATE_STOPPED, Ordering::Release);
        info!("Router stopped");
    }

    /// Route one record; returns the number of sinks that accepted a copy
    ///
    /// Never blocks beyond a sink's queue lock and never fails: problems are
    /// logged and counted.
    pub fn route(&self, record: Record) -> usize {
        if !self.is_running() {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(id = record.id().unwrap_or_default(), "Router not running, record dropped");
            return 0;
        }

        let Some(id) = record.id() else {
            self.stats.unroutable.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("sinknode_records_unroutable_total").increment(1);
            error!(record = %record, "Unroutable record (missing or non-string id), dropped");
            return 0;
        };

        self.stats.routed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sinknode_records_routed_total").increment(1);

        let mut accepted = 0;
        let mut matched = 0;
        for registration in self.snapshot().iter() {
            if !registration.predicate.matches(id) {
                continue;
            }
            matched += 1;
            match registration.sink.enqueue(record.clone()) {
                Ok(()) => accepted += 1,
                Err(e) => debug!(sink = %registration.name(), id = %id, error = %e, "sink refused record"),
            }
        }

        if matched == 0 {
            self.stats.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!(id = %id, "no sink matched");
        }
        self.stats
            .deliveries_queued
            .fetch_add(accepted as u64, Ordering::Relaxed);
        accepted
    }

    /// Route an arbitrary JSON value; non-objects are unroutable
    pub fn route_value(&self, value: Value) -> usize {
        match Record::try_from(value) {
            Ok(record) => self.route(record),
            Err(e) => {
                self.stats.unroutable.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("sinknode_records_unroutable_total").increment(1);
                error!(error = %e, "Unroutable value, dropped");
                0
            }
        }
    }

    /// Route everything from `rx` until it closes, then drain every sink
    #[instrument(name = "router_run", skip(self, rx))]
    pub async fn run(&self, rx: async_channel::Receiver<Record>) -> RouterSnapshot {
        info!(sinks = self.snapshot().len(), "Router loop started");

        let mut count: u64 = 0;
        while let Ok(record) = rx.recv().await {
            count += 1;
            self.route(record);

            if count.is_multiple_of(100) {
                debug!(records = count, "Router progress");
            }
        }

        info!(records = count, "Router input closed, draining sinks");
        self.drain().await;

        let snapshot = self.stats.snapshot();
        info!(
            routed = snapshot.routed,
            unroutable = snapshot.unroutable,
            unmatched = snapshot.unmatched,
            "Router drained"
        );
        snapshot
    }

    /// Stop intake, let every sink finish its queue, wait for the workers
    #[instrument(name = "router_drain", skip(self))]
    pub async fn drain(&self) {
        self.state.store(STATE_STOPPED, Ordering::Release);
        let registrations = self.snapshot();
        for registration in registrations.iter() {
            registration.sink.drain();
        }
        Self::join_all(&registrations).await;
    }

    /// Wait for every sink worker after `stop()`
    pub async fn join(&self) {
        Self::join_all(&self.snapshot()).await;
    }

    async fn join_all(registrations: &[SinkRegistration]) {
        for registration in registrations {
            registration.sink.join().await;
        }
    }

    /// Router counters
    pub fn stats(&self) -> RouterSnapshot {
        self.stats.snapshot()
    }

    /// Metrics for all sinks
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.snapshot()
            .iter()
            .map(|r| (r.name().to_string(), r.sink.metrics().snapshot()))
            .collect()
    }
}

/// Create a sink (formatter + delivery + queue) from configuration
#[instrument(
    name = "router_create_sink",
    skip(config),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
pub fn create_sink(config: &SinkConfig) -> Result<RateLimitedSink, DispatcherError> {
    let formatter = build_formatter(&config.format);
    let queue = QueueConfig {
        capacity: config.queue_capacity,
        full_policy: config.queue_full_policy,
    };
    let creation = |e: contracts::ContractError| DispatcherError::sink_creation(&config.name, e.to_string());

    let sink = match config.sink_type {
        SinkType::Log => RateLimitedSink::new(
            &config.name,
            formatter,
            LogDeliver::new(&config.name),
            config.delivery,
            queue,
        ),
        SinkType::File => RateLimitedSink::new(
            &config.name,
            formatter,
            FileDeliver::from_params(&config.name, &config.params).map_err(creation)?,
            config.delivery,
            queue,
        ),
        SinkType::Tcp => RateLimitedSink::new(
            &config.name,
            formatter,
            TcpDeliver::from_params(&config.name, &config.params).map_err(creation)?,
            config.delivery,
            queue,
        ),
        SinkType::Http => RateLimitedSink::new(
            &config.name,
            formatter,
            HttpDeliver::from_params(&config.name, &config.params).map_err(creation)?,
            config.delivery,
            queue,
        ),
    };
    Ok(sink)
}
