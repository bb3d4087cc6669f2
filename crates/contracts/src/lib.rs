//! # Contracts
//!
//! Frozen interface contracts shared by every pipeline crate.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Data Model
//! - `Frame`: delimiter-bounded payload produced by the frame extractor
//! - `Record`: decoded JSON-object entry, routed by its `id` field
//! - `FormattedOutput`: what a delivery collaborator actually transmits

mod blueprint;
mod byte_source;
mod deliver;
mod discovery;
mod error;
mod record;
mod route_key;

pub use blueprint::*;
pub use byte_source::{is_retryable, ByteSource};
pub use deliver::{Deliver, LocalDeliver, RecordFormatter};
pub use discovery::DiscoveryEvent;
pub use error::*;
pub use record::{FormattedOutput, Frame, Record};
pub use route_key::RouteKey;
