//! Seen-devices table
//!
//! Owned by exactly one worker; no interior locking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use contracts::{AggregationMode, AggregatorConfig, DiscoveryEvent, Record};
use serde_json::json;
use tracing::{debug, trace};

use crate::identity::{normalize_identity, VendorTable};

/// Sub-entry `last_seen` format
pub const LAST_SEEN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Suffix appended to access point display names
pub const ACCESS_POINT_SUFFIX: &str = " (AP)";

/// Last-known state of one device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    /// Normalized identity
    pub identity: String,
    /// Display name (e.g. SSID)
    pub display_name: Option<String>,
    /// Vendor derived from the identity prefix
    pub vendor: String,
    /// First sighting since the entry was created
    pub first_seen: DateTime<Utc>,
    /// Most recent sighting
    pub last_seen: DateTime<Utc>,
    /// Sightings folded into this entry
    pub sightings: u64,
}

impl DeviceRecord {
    /// Serialize as a batch sub-entry
    pub fn to_entry_json(&self) -> String {
        json!({
            "eui": self.identity,
            "vendor": self.vendor,
            "last_seen": self.last_seen.format(LAST_SEEN_FORMAT).to_string(),
            "ssid": self.display_name,
        })
        .to_string()
    }
}

/// What happened to a sighting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SightOutcome {
    /// New entry created
    Inserted,
    /// Existing entry updated in place
    Updated,
    /// New entry created after evicting the stalest one
    InsertedWithEviction,
    /// Access point sighting dropped (access points excluded)
    IgnoredAccessPoint,
    /// Empty identity
    Invalid,
}

/// Bounded table of devices keyed by normalized identity
#[derive(Debug)]
pub struct DeviceTable {
    entries: HashMap<String, DeviceRecord>,
    vendors: VendorTable,
    mode: AggregationMode,
    separator: char,
    include_access_points: bool,
    max_devices: usize,
}

impl DeviceTable {
    /// Create an empty table
    pub fn new(config: &AggregatorConfig) -> Self {
        Self {
            entries: HashMap::new(),
            vendors: VendorTable::new(&config.vendors),
            mode: config.mode,
            separator: config.separator.as_char(),
            include_access_points: config.include_access_points,
            max_devices: config.max_devices.max(1),
        }
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a device by (raw or normalized) identity
    pub fn get(&self, identity: &str) -> Option<&DeviceRecord> {
        self.entries.get(&normalize_identity(identity))
    }

    /// Fold one sighting into the table (last write wins)
    pub fn sight(&mut self, event: DiscoveryEvent) -> SightOutcome {
        let identity = normalize_identity(&event.identity);
        if identity.is_empty() {
            return SightOutcome::Invalid;
        }

        let display_name = if event.access_point {
            if !self.include_access_points {
                trace!(identity = %identity, "ignoring access point");
                return SightOutcome::IgnoredAccessPoint;
            }
            Some(match event.display_name {
                Some(name) => format!("{name}{ACCESS_POINT_SUFFIX}"),
                None => ACCESS_POINT_SUFFIX.trim_start().to_string(),
            })
        } else {
            event.display_name
        };

        if let Some(entry) = self.entries.get_mut(&identity) {
            if display_name.is_some() {
                entry.display_name = display_name;
            }
            entry.last_seen = entry.last_seen.max(event.seen_at);
            entry.sightings += 1;
            return SightOutcome::Updated;
        }

        let evicted = self.entries.len() >= self.max_devices && self.evict_stalest();

        let vendor = self.vendors.lookup(&identity);
        self.entries.insert(
            identity.clone(),
            DeviceRecord {
                identity,
                display_name,
                vendor,
                first_seen: event.seen_at,
                last_seen: event.seen_at,
                sightings: 1,
            },
        );

        if evicted {
            SightOutcome::InsertedWithEviction
        } else {
            SightOutcome::Inserted
        }
    }

    fn evict_stalest(&mut self) -> bool {
        let stalest = self
            .entries
            .values()
            .min_by(|a, b| {
                a.last_seen
                    .cmp(&b.last_seen)
                    .then_with(|| a.identity.cmp(&b.identity))
            })
            .map(|entry| entry.identity.clone());

        match stalest {
            Some(identity) => {
                debug!(identity = %identity, max_devices = self.max_devices, "evicting stalest device");
                self.entries.remove(&identity);
                true
            }
            None => false,
        }
    }

    /// Serialize every entry into one batch record
    ///
    /// Returns `None` when the table is empty. Destructive mode clears the
    /// table; cumulative mode leaves it untouched.
    pub fn flush(&mut self, id: &str) -> Option<Record> {
        if self.entries.is_empty() {
            return None;
        }

        let mut devices: Vec<&DeviceRecord> = self.entries.values().collect();
        devices.sort_by(|a, b| {
            a.first_seen
                .cmp(&b.first_seen)
                .then_with(|| a.identity.cmp(&b.identity))
        });

        let separator = self.separator;
        let payload = devices
            .iter()
            .map(|device| device.to_entry_json().replace(separator, ""))
            .collect::<Vec<_>>()
            .join(&separator.to_string());

        let count = devices.len();
        if self.mode == AggregationMode::Destructive {
            self.entries.clear();
        }

        debug!(id = %id, devices = count, mode = ?self.mode, "flushed device table");
        Some(Record::with_id(id).with_field("payload", payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(mode: AggregationMode) -> AggregatorConfig {
        AggregatorConfig {
            mode,
            ..Default::default()
        }
    }

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, secs).unwrap()
    }

    fn sighting(identity: &str, name: Option<&str>, secs: u32) -> DiscoveryEvent {
        DiscoveryEvent::new(identity, name.map(str::to_string)).seen_at(at(secs))
    }

    fn entries(record: &Record) -> Vec<serde_json::Value> {
        record
            .get_str("payload")
            .unwrap()
            .split('|')
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    #[test]
    fn test_cumulative_last_name_wins() {
        let mut table = DeviceTable::new(&config(AggregationMode::Cumulative));
        assert_eq!(
            table.sight(sighting("aa:bb:cc:dd:ee:01", Some("home"), 1)),
            SightOutcome::Inserted
        );
        assert_eq!(
            table.sight(sighting("AA-BB-CC-DD-EE-01", Some("office"), 2)),
            SightOutcome::Updated
        );
        assert_eq!(
            table.sight(sighting("aa:bb:cc:dd:ee:01", Some("cafe"), 3)),
            SightOutcome::Updated
        );

        let record = table.flush("wifi").unwrap();
        assert_eq!(record.id(), Some("wifi"));
        let entries = entries(&record);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["ssid"], "cafe");
        assert_eq!(entries[0]["eui"], "AA-BB-CC-DD-EE-01");
        assert_eq!(entries[0]["last_seen"], "2024-05-01 12:00:03");
        assert_eq!(entries[0]["vendor"], "Unregistered");

        // cumulative: still there
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("aa:bb:cc:dd:ee:01").unwrap().sightings, 3);
    }

    #[test]
    fn test_destructive_flush_then_resight() {
        let mut table = DeviceTable::new(&config(AggregationMode::Destructive));
        table.sight(sighting("aa:bb:cc:dd:ee:01", Some("home"), 1));
        assert!(table.flush("wifi").is_some());
        assert!(table.is_empty());
        assert!(table.flush("wifi").is_none());

        assert_eq!(
            table.sight(sighting("aa:bb:cc:dd:ee:01", None, 5)),
            SightOutcome::Inserted
        );
        let device = table.get("aa:bb:cc:dd:ee:01").unwrap();
        assert_eq!(device.sightings, 1);
        assert_eq!(device.first_seen, at(5));
        assert_eq!(device.display_name, None);
    }

    #[test]
    fn test_payload_joined_without_trailing_separator() {
        let mut table = DeviceTable::new(&config(AggregationMode::Destructive));
        table.sight(sighting("00:00:00:00:00:01", Some("a|b"), 1));
        table.sight(sighting("00:00:00:00:00:02", Some("c"), 2));

        let record = table.flush("wifi").unwrap();
        let payload = record.get_str("payload").unwrap();
        assert!(!payload.ends_with('|'));

        let entries = entries(&record);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["ssid"], "ab");
        assert_eq!(entries[1]["ssid"], "c");
    }

    #[test]
    fn test_access_points() {
        let mut table = DeviceTable::new(&config(AggregationMode::Cumulative));
        let ap = sighting("00:00:00:00:00:09", Some("cafe"), 1).access_point(true);
        assert_eq!(table.sight(ap.clone()), SightOutcome::IgnoredAccessPoint);
        assert!(table.is_empty());

        let mut table = DeviceTable::new(&AggregatorConfig {
            include_access_points: true,
            ..Default::default()
        });
        assert_eq!(table.sight(ap), SightOutcome::Inserted);
        assert_eq!(
            table.get("00:00:00:00:00:09").unwrap().display_name.as_deref(),
            Some("cafe (AP)")
        );
    }

    #[test]
    fn test_eviction_at_capacity() {
        let mut table = DeviceTable::new(&AggregatorConfig {
            max_devices: 2,
            ..Default::default()
        });
        table.sight(sighting("00:00:00:00:00:01", None, 1));
        table.sight(sighting("00:00:00:00:00:02", None, 2));
        table.sight(sighting("00:00:00:00:00:01", None, 3));

        assert_eq!(
            table.sight(sighting("00:00:00:00:00:03", None, 4)),
            SightOutcome::InsertedWithEviction
        );
        assert_eq!(table.len(), 2);
        assert!(table.get("00:00:00:00:00:02").is_none());
        assert!(table.get("00:00:00:00:00:01").is_some());
    }

    #[test]
    fn test_vendor_from_table() {
        let mut cfg = config(AggregationMode::Destructive);
        cfg.vendors.insert("00-1A-2B".into(), "Ayecom".into());
        let mut table = DeviceTable::new(&cfg);
        table.sight(sighting("00:1a:2b:00:00:01", None, 1));
        assert_eq!(table.get("00-1A-2B-00-00-01").unwrap().vendor, "Ayecom");
    }

    #[test]
    fn test_empty_identity_is_invalid() {
        let mut table = DeviceTable::new(&AggregatorConfig::default());
        assert_eq!(table.sight(sighting("   ", None, 1)), SightOutcome::Invalid);
    }
}
