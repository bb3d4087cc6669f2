//! RateLimitedSink - bounded ticket queue with one paced, retrying worker

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::{Deliver, DeliveryPolicy, QueueFullPolicy, Record, RecordFormatter};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::error::DispatcherError;
use crate::metrics::SinkMetrics;

type WorkerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Queued record with its delivery history
#[derive(Debug, Clone)]
pub struct DeliveryTicket {
    /// Record to deliver
    pub record: Record,
    /// Failed invocations so far
    pub attempts: u32,
    /// Not eligible for delivery before this instant
    pub next_eligible: Instant,
    /// When the ticket entered the queue
    pub enqueued_at: Instant,
}

impl DeliveryTicket {
    fn new(record: Record) -> Self {
        let now = Instant::now();
        Self {
            record,
            attempts: 0,
            next_eligible: now,
            enqueued_at: now,
        }
    }
}

/// Queue sizing and overflow behavior
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub capacity: usize,
    pub full_policy: QueueFullPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            full_policy: QueueFullPolicy::Reject,
        }
    }
}

enum WorkerSlot {
    Idle(WorkerFuture),
    Running(JoinHandle<()>),
    Finished,
}

/// Tickets plus whether the head is being worked on
///
/// The in-flight ticket stays at the head until its final outcome, so it
/// counts toward capacity and `queue_len`.
#[derive(Default)]
struct TicketQueue {
    tickets: VecDeque<DeliveryTicket>,
    head_in_flight: bool,
}

struct Shared {
    name: String,
    queue: Mutex<TicketQueue>,
    queue_config: QueueConfig,
    policy: DeliveryPolicy,
    notify: Notify,
    accepting: AtomicBool,
    stop_tx: watch::Sender<bool>,
    metrics: Arc<SinkMetrics>,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, TicketQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the head in flight and hand out a copy of it
    fn claim_front(&self) -> Option<DeliveryTicket> {
        let mut queue = self.queue();
        let ticket = queue.tickets.front().cloned();
        queue.head_in_flight = ticket.is_some();
        ticket
    }

    /// Whether the claimed head is still queued (not evicted)
    fn holds_front(&self) -> bool {
        self.queue().head_in_flight
    }

    /// Write retry state back to the in-flight head
    fn update_front(&self, ticket: &DeliveryTicket) {
        let mut queue = self.queue();
        if !queue.head_in_flight {
            return;
        }
        if let Some(head) = queue.tickets.front_mut() {
            head.attempts = ticket.attempts;
            head.next_eligible = ticket.next_eligible;
        }
    }

    /// Remove the in-flight head after its final outcome
    fn finish_front(&self) {
        let mut queue = self.queue();
        if std::mem::take(&mut queue.head_in_flight) {
            queue.tickets.pop_front();
        }
        self.metrics.set_queue_len(queue.tickets.len());
    }

    /// Leave the in-flight head queued for a later run
    fn release_front(&self) {
        self.queue().head_in_flight = false;
    }
}

/// A sink: formatter, delivery collaborator, queue and worker
///
/// Nothing is delivered until [`start`](Self::start). `enqueue` never blocks;
/// the worker delivers tickets one at a time in FIFO order.
pub struct RateLimitedSink {
    shared: Arc<Shared>,
    worker: Mutex<WorkerSlot>,
}

impl RateLimitedSink {
    /// Build a sink; the delivery loop stays inert until `start()`
    pub fn new<D>(
        name: impl Into<String>,
        formatter: Box<dyn RecordFormatter>,
        delivery: D,
        policy: DeliveryPolicy,
        queue_config: QueueConfig,
    ) -> Self
    where
        D: Deliver + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            name: name.into(),
            queue: Mutex::new(TicketQueue {
                tickets: VecDeque::with_capacity(queue_config.capacity.min(1024)),
                head_in_flight: false,
            }),
            queue_config,
            policy,
            notify: Notify::new(),
            accepting: AtomicBool::new(true),
            stop_tx,
            metrics: Arc::new(SinkMetrics::new()),
        });

        let worker_shared = Arc::clone(&shared);
        let worker: WorkerFuture = Box::pin(async move {
            delivery_worker(worker_shared, formatter, delivery, stop_rx).await;
        });

        Self {
            shared,
            worker: Mutex::new(WorkerSlot::Idle(worker)),
        }
    }

    /// Sink name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Shared metrics
    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.shared.metrics
    }

    /// Current queue length, including a ticket in flight
    pub fn queue_len(&self) -> usize {
        self.shared.queue().tickets.len()
    }

    /// Whether new records are accepted
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Whether the delivery loop has been spawned
    pub fn is_started(&self) -> bool {
        !matches!(*self.slot(), WorkerSlot::Idle(_))
    }

    fn slot(&self) -> MutexGuard<'_, WorkerSlot> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the delivery loop on the current tokio runtime
    ///
    /// # Errors
    /// `AlreadyStarted` on a second call.
    #[instrument(name = "sink_start", skip(self), fields(sink = %self.shared.name))]
    pub fn start(&self) -> Result<(), DispatcherError> {
        let mut slot = self.slot();
        match std::mem::replace(&mut *slot, WorkerSlot::Finished) {
            WorkerSlot::Idle(worker) => {
                *slot = WorkerSlot::Running(tokio::spawn(worker));
                debug!(sink = %self.shared.name, "delivery loop started");
                Ok(())
            }
            other => {
                *slot = other;
                Err(DispatcherError::AlreadyStarted {
                    sink_name: self.shared.name.clone(),
                })
            }
        }
    }

    /// Queue a record for delivery (never blocks)
    ///
    /// # Errors
    /// `Closed` after stop/drain; `QueueFull` when the queue is at capacity
    /// under the reject policy.
    pub fn enqueue(&self, record: Record) -> Result<(), DispatcherError> {
        let shared = &self.shared;
        if !self.is_accepting() {
            return Err(DispatcherError::Closed {
                sink_name: shared.name.clone(),
            });
        }

        {
            let mut queue = shared.queue();
            if queue.tickets.len() >= shared.queue_config.capacity {
                shared.metrics.inc_dropped_count();
                metrics::counter!("sinknode_queue_dropped_total", "sink" => shared.name.clone())
                    .increment(1);

                match shared.queue_config.full_policy {
                    QueueFullPolicy::Reject => {
                        warn!(
                            sink = %shared.name,
                            id = record.id().unwrap_or_default(),
                            capacity = shared.queue_config.capacity,
                            "Queue full, record rejected"
                        );
                        return Err(DispatcherError::QueueFull {
                            sink_name: shared.name.clone(),
                        });
                    }
                    QueueFullPolicy::DropOldest => {
                        let in_flight = std::mem::take(&mut queue.head_in_flight);
                        if let Some(evicted) = queue.tickets.pop_front() {
                            warn!(
                                sink = %shared.name,
                                id = evicted.record.id().unwrap_or_default(),
                                attempts = evicted.attempts,
                                in_flight,
                                "Queue full, oldest record evicted"
                            );
                        }
                    }
                }
            }
            queue.tickets.push_back(DeliveryTicket::new(record));
            shared.metrics.set_queue_len(queue.tickets.len());
        }

        shared.notify.notify_one();
        Ok(())
    }

    /// Stop intake and interrupt the worker at its next wait
    ///
    /// An in-flight delivery completes. Queued tickets stay queued.
    pub fn stop(&self) {
        self.shared.accepting.store(false, Ordering::Release);
        self.shared.stop_tx.send_replace(true);
        self.shared.notify.notify_one();
        debug!(sink = %self.shared.name, "stop requested");
    }

    /// Stop intake; the worker exits once the queue is empty
    pub fn drain(&self) {
        self.shared.accepting.store(false, Ordering::Release);
        self.shared.notify.notify_one();
        debug!(sink = %self.shared.name, queued = self.queue_len(), "drain requested");
    }

    /// Wait for the worker to exit
    ///
    /// Call `stop()` or `drain()` first or this waits forever.
    #[instrument(name = "sink_join", skip(self), fields(sink = %self.shared.name))]
    pub async fn join(&self) {
        let slot = std::mem::replace(&mut *self.slot(), WorkerSlot::Finished);
        match slot {
            WorkerSlot::Running(handle) => {
                if let Err(e) = handle.await {
                    error!(sink = %self.shared.name, error = ?e, "Worker task panicked");
                }
            }
            WorkerSlot::Idle(_) => {
                debug!(sink = %self.shared.name, "sink never started");
            }
            WorkerSlot::Finished => {}
        }
    }

    /// Drain the queue and wait for the worker to exit
    pub async fn shutdown(&self) {
        self.drain();
        self.join().await;
    }
}

/// Sleep unless stopped first; `true` when the full duration elapsed
async fn pause(stop_rx: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *stop_rx.borrow() {
        return false;
    }
    if duration.is_zero() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = async { let _ = stop_rx.wait_for(|stopped| *stopped).await; } => false,
    }
}

async fn next_ticket(shared: &Shared, stop_rx: &mut watch::Receiver<bool>) -> Option<DeliveryTicket> {
    loop {
        if *stop_rx.borrow() {
            return None;
        }
        if let Some(ticket) = shared.claim_front() {
            return Some(ticket);
        }
        if !shared.accepting.load(Ordering::Acquire) {
            return None;
        }
        tokio::select! {
            _ = shared.notify.notified() => {}
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    return None;
                }
            }
        }
    }
}

fn record_outcome(sink: &str, outcome: &'static str) {
    metrics::counter!("sinknode_deliveries_total", "sink" => sink.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Worker loop: one ticket in flight, paced on success, retried on failure
#[instrument(
    name = "sink_delivery_loop",
    skip(shared, formatter, delivery, stop_rx),
    fields(sink = %shared.name)
)]
async fn delivery_worker<D: Deliver>(
    shared: Arc<Shared>,
    formatter: Box<dyn RecordFormatter>,
    mut delivery: D,
    mut stop_rx: watch::Receiver<bool>,
) {
    let name = shared.name.as_str();
    let metrics = &shared.metrics;
    let policy = shared.policy;
    let max_attempts = policy.max_attempts.max(1);
    debug!(sink = %name, formatter = formatter.name(), delivery = delivery.name(), "Sink worker started");

    'tickets: while let Some(mut ticket) = next_ticket(&shared, &mut stop_rx).await {
        let id = ticket.record.id().unwrap_or_default().to_string();

        let output = match formatter.format(&ticket.record) {
            Ok(output) => output,
            Err(e) => {
                metrics.inc_format_error_count();
                metrics::counter!("sinknode_format_errors_total", "sink" => name.to_string())
                    .increment(1);
                error!(sink = %name, id = %id, error = %e, "Format failed, record dropped");
                shared.finish_front();
                continue;
            }
        };
        if output.is_empty() {
            debug!(sink = %name, id = %id, "Nothing to deliver");
            shared.finish_front();
            continue;
        }

        loop {
            if !pause(&mut stop_rx, ticket.next_eligible.saturating_duration_since(Instant::now())).await {
                shared.release_front();
                break 'tickets;
            }
            if !shared.holds_front() {
                debug!(sink = %name, id = %id, attempts = ticket.attempts, "Ticket evicted while waiting to retry");
                break;
            }

            match delivery.deliver(&output).await {
                Ok(()) => {
                    shared.finish_front();
                    metrics.inc_delivered_count();
                    record_outcome(name, "delivered");
                    debug!(
                        sink = %name,
                        id = %id,
                        attempts = ticket.attempts + 1,
                        queued_ms = ticket.enqueued_at.elapsed().as_millis() as u64,
                        "Delivered"
                    );
                    if !pause(&mut stop_rx, policy.min_interval()).await {
                        break 'tickets;
                    }
                    break;
                }
                Err(e) => {
                    ticket.attempts += 1;
                    metrics.inc_failure_count();
                    record_outcome(name, "failed");

                    if ticket.attempts >= max_attempts {
                        shared.finish_front();
                        metrics.inc_exhausted_count();
                        record_outcome(name, "exhausted");
                        error!(
                            sink = %name,
                            id = %id,
                            attempts = ticket.attempts,
                            error = %e,
                            "Delivery attempts exhausted, record dropped"
                        );
                        if !pause(&mut stop_rx, policy.failure_backoff()).await {
                            break 'tickets;
                        }
                        break;
                    }

                    warn!(
                        sink = %name,
                        id = %id,
                        attempt = ticket.attempts,
                        max_attempts,
                        error = %e,
                        "Delivery failed, retrying"
                    );
                    ticket.next_eligible = Instant::now() + policy.failure_backoff();
                    shared.update_front(&ticket);
                }
            }
        }
    }

    if let Err(e) = delivery.close().await {
        error!(sink = %name, error = %e, "Close failed on shutdown");
    }

    let snapshot = metrics.snapshot();
    info!(
        sink = %name,
        delivered = snapshot.delivered_count,
        failures = snapshot.failure_count,
        exhausted = snapshot.exhausted_count,
        dropped = snapshot.dropped_count,
        left_queued = snapshot.queue_len,
        "Sink worker stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::JsonLineFormatter;
    use contracts::{ContractError, FormattedOutput};
    use std::sync::atomic::AtomicU32;

    /// Records every invocation; fails whenever the output contains `fail_on`
    #[derive(Clone, Default)]
    struct MockDeliver {
        calls: Arc<Mutex<Vec<(Instant, String)>>>,
        fail_on: Option<&'static str>,
        closed: Arc<AtomicU32>,
    }

    impl MockDeliver {
        fn failing_on(pattern: &'static str) -> Self {
            Self {
                fail_on: Some(pattern),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(Instant, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn ids(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .map(|(_, text)| {
                    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                    value["id"].as_str().unwrap().to_string()
                })
                .collect()
        }
    }

    impl Deliver for MockDeliver {
        fn name(&self) -> &str {
            "mock"
        }

        async fn deliver(&mut self, output: &FormattedOutput) -> Result<(), ContractError> {
            let text = output.to_text();
            self.calls.lock().unwrap().push((Instant::now(), text.clone()));
            match self.fail_on {
                Some(pattern) if text.contains(pattern) => {
                    Err(ContractError::delivery("mock", "mock failure"))
                }
                _ => Ok(()),
            }
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            self.closed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn sink(delivery: MockDeliver, policy: DeliveryPolicy, queue: QueueConfig) -> RateLimitedSink {
        RateLimitedSink::new("test", Box::new(JsonLineFormatter), delivery, policy, queue)
    }

    fn policy(min_interval_ms: u64, max_attempts: u32, failure_backoff_ms: u64) -> DeliveryPolicy {
        DeliveryPolicy {
            min_interval_ms,
            max_attempts,
            failure_backoff_ms,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_between_deliveries() {
        let delivery = MockDeliver::default();
        let sink = sink(delivery.clone(), policy(200, 3, 50), QueueConfig::default());
        sink.start().unwrap();

        for i in 0..5 {
            sink.enqueue(Record::with_id(format!("r{i}"))).unwrap();
        }
        sink.shutdown().await;

        let calls = delivery.calls();
        assert_eq!(calls.len(), 5);
        let span = calls[4].0 - calls[0].0;
        assert!(span >= Duration::from_millis(800), "span was {span:?}");
        assert_eq!(delivery.ids(), vec!["r0", "r1", "r2", "r3", "r4"]);
        assert_eq!(sink.metrics().delivered_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retry_then_next_ticket() {
        let delivery = MockDeliver::failing_on("bad");
        let sink = sink(delivery.clone(), policy(100, 3, 20), QueueConfig::default());
        sink.start().unwrap();

        sink.enqueue(Record::with_id("bad")).unwrap();
        sink.enqueue(Record::with_id("good")).unwrap();
        sink.shutdown().await;

        assert_eq!(delivery.ids(), vec!["bad", "bad", "bad", "good"]);
        let calls = delivery.calls();
        assert!(calls[1].0 - calls[0].0 >= Duration::from_millis(20));

        let snapshot = sink.metrics().snapshot();
        assert_eq!(snapshot.failure_count, 3);
        assert_eq!(snapshot.exhausted_count, 1);
        assert_eq!(snapshot.delivered_count, 1);
        assert_eq!(delivery.closed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_reject_when_full() {
        let delivery = MockDeliver::default();
        let sink = sink(
            delivery.clone(),
            DeliveryPolicy::default(),
            QueueConfig {
                capacity: 2,
                full_policy: QueueFullPolicy::Reject,
            },
        );

        sink.enqueue(Record::with_id("a")).unwrap();
        sink.enqueue(Record::with_id("b")).unwrap();
        let err = sink.enqueue(Record::with_id("c")).unwrap_err();
        assert!(matches!(err, DispatcherError::QueueFull { .. }));
        assert_eq!(sink.metrics().dropped_count(), 1);

        sink.start().unwrap();
        sink.shutdown().await;
        assert_eq!(delivery.ids(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_drop_oldest_when_full() {
        let delivery = MockDeliver::default();
        let sink = sink(
            delivery.clone(),
            DeliveryPolicy::default(),
            QueueConfig {
                capacity: 2,
                full_policy: QueueFullPolicy::DropOldest,
            },
        );

        for id in ["a", "b", "c"] {
            sink.enqueue(Record::with_id(id)).unwrap();
        }
        assert_eq!(sink.queue_len(), 2);

        sink.start().unwrap();
        sink.shutdown().await;
        assert_eq!(delivery.ids(), vec!["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_pacing_and_keeps_queue() {
        let delivery = MockDeliver::default();
        let sink = sink(delivery.clone(), policy(10_000, 3, 100), QueueConfig::default());
        sink.start().unwrap();

        sink.enqueue(Record::with_id("a")).unwrap();
        sink.enqueue(Record::with_id("b")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        sink.stop();
        sink.join().await;

        assert_eq!(delivery.ids(), vec!["a"]);
        assert_eq!(sink.queue_len(), 1);
        assert!(matches!(
            sink.enqueue(Record::with_id("c")),
            Err(DispatcherError::Closed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_ticket_stays_queued() {
        let delivery = MockDeliver::failing_on("bad");
        let sink = sink(
            delivery.clone(),
            policy(0, 5, 1_000),
            QueueConfig {
                capacity: 1,
                full_policy: QueueFullPolicy::Reject,
            },
        );
        sink.start().unwrap();

        sink.enqueue(Record::with_id("bad")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // first attempt failed, ticket waits out its backoff at the head
        assert_eq!(delivery.ids(), vec!["bad"]);
        assert_eq!(sink.queue_len(), 1);
        assert!(matches!(
            sink.enqueue(Record::with_id("next")),
            Err(DispatcherError::QueueFull { .. })
        ));

        sink.stop();
        sink.join().await;
        assert_eq!(sink.queue_len(), 1);
        assert_eq!(sink.metrics().exhausted_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_oldest_evicts_retrying_ticket() {
        let delivery = MockDeliver::failing_on("bad");
        let sink = sink(
            delivery.clone(),
            policy(0, 5, 1_000),
            QueueConfig {
                capacity: 1,
                full_policy: QueueFullPolicy::DropOldest,
            },
        );
        sink.start().unwrap();

        sink.enqueue(Record::with_id("bad")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        sink.enqueue(Record::with_id("good")).unwrap();
        assert_eq!(sink.queue_len(), 1);

        sink.shutdown().await;
        assert_eq!(delivery.ids(), vec!["bad", "good"]);
        assert_eq!(sink.queue_len(), 0);
        let snapshot = sink.metrics().snapshot();
        assert_eq!(snapshot.delivered_count, 1);
        assert_eq!(snapshot.dropped_count, 1);
        assert_eq!(snapshot.exhausted_count, 0);
    }

    #[tokio::test]
    async fn test_second_start_fails() {
        let sink = sink(MockDeliver::default(), DeliveryPolicy::default(), QueueConfig::default());
        sink.start().unwrap();
        assert!(matches!(sink.start(), Err(DispatcherError::AlreadyStarted { .. })));
        sink.shutdown().await;
    }
}
