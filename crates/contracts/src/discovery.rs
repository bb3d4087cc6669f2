//! DiscoveryEvent - input of the device aggregator

use chrono::{DateTime, Utc};

/// One sighting of a device on a discovery-style stream
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryEvent {
    /// Hardware address or other stable identity (not yet normalized)
    pub identity: String,

    /// Human-readable name reported with the sighting (e.g. an SSID)
    pub display_name: Option<String>,

    /// Whether the sighting came from a fixed access point
    pub access_point: bool,

    /// When the sighting happened
    pub seen_at: DateTime<Utc>,
}

impl DiscoveryEvent {
    /// Sighting of a client device, timestamped now
    pub fn new(identity: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            identity: identity.into(),
            display_name,
            access_point: false,
            seen_at: Utc::now(),
        }
    }

    /// Builder: mark as an access point
    pub fn access_point(mut self, access_point: bool) -> Self {
        self.access_point = access_point;
        self
    }

    /// Builder: override the sighting time
    pub fn seen_at(mut self, seen_at: DateTime<Utc>) -> Self {
        self.seen_at = seen_at;
        self
    }
}
