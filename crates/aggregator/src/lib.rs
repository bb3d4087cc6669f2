//! # Aggregator
//!
//! Deduplicating "seen devices" aggregation for discovery-style streams.
//!
//! Responsibilities:
//! - Fold sightings keyed by normalized identity into a bounded table
//! - Periodic or on-demand flush into one batch `Record`
//! - Destructive (clear on flush) or cumulative (keep) tables
//!
//! ## Usage Example
//!
//! ```ignore
//! use aggregator::DeviceAggregator;
//!
//! let mut aggregator = DeviceAggregator::new(config, router_tx);
//! aggregator.start()?;
//!
//! while let Ok(record) = records.recv().await {
//!     if let Err(e) = aggregator.sight_record(&record) {
//!         tracing::warn!(error = %e, "dropping sighting");
//!     }
//! }
//! aggregator.shutdown().await;
//! ```

mod engine;
mod error;
mod identity;
mod table;

// Re-exports
pub use contracts::{AggregationMode, AggregatorConfig, DiscoveryEvent};
pub use engine::{sighting_from_record, AggregatorSnapshot, AggregatorStats, DeviceAggregator};
pub use error::{AggregatorError, Result};
pub use identity::{normalize_identity, VendorTable, MAX_VENDOR_LEN, UNREGISTERED_VENDOR};
pub use table::{DeviceRecord, DeviceTable, SightOutcome, ACCESS_POINT_SUFFIX, LAST_SEEN_FORMAT};
