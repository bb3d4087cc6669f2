//! # Dispatcher
//!
//! Record fan-out and paced delivery.
//!
//! Responsibilities:
//! - Route each `Record` to every sink whose predicate matches its `id`
//! - Give every sink its own bounded queue and delivery worker
//! - Pace successful deliveries and retry failed ones a bounded number of times
//! - Isolate slow or failing sinks from the rest of the pipeline

pub mod error;
pub mod format;
pub mod metrics;
pub mod rate_limited;
pub mod router;
pub mod sinks;

pub use contracts::{Deliver, Record, RecordFormatter};
pub use error::DispatcherError;
pub use format::{build_formatter, DeviceCsvFormatter, FieldMapFormatter, JsonLineFormatter};
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use rate_limited::{DeliveryTicket, QueueConfig, RateLimitedSink};
pub use router::{create_sink, RoutePredicate, Router, RouterSnapshot, SinkRegistration};
pub use sinks::{FileDeliver, HttpDeliver, LogDeliver, TcpDeliver};
