//! PipelineBlueprint - Config Loader output
//!
//! Describes a complete pipeline: byte source, framing, decoding, optional
//! device aggregation, and the sinks records are routed to.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete pipeline blueprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineBlueprint {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// What the decoded records are
    #[serde(default)]
    pub mode: IngestMode,

    /// Byte source
    pub source: SourceConfig,

    /// Frame extraction
    #[serde(default)]
    pub framing: FramingConfig,

    /// Frame decoding
    #[serde(default)]
    pub decoder: DecoderConfig,

    /// Device aggregation (required in discovery mode)
    #[serde(default)]
    pub aggregator: Option<AggregatorConfig>,

    /// Output routing
    pub sinks: Vec<SinkConfig>,
}

impl PipelineBlueprint {
    /// Whether decoded records feed the device aggregator instead of the router
    pub fn is_discovery(&self) -> bool {
        self.mode == IngestMode::Discovery
    }
}

/// Ingest mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Every decoded record is routed directly
    #[default]
    Telemetry,
    /// Decoded records are sightings folded by the device aggregator
    Discovery,
}

// ===== Source =====

/// Byte source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source name (logging/metrics)
    #[serde(default = "default_source_name")]
    pub name: String,

    /// Transport
    pub kind: SourceKind,

    /// File path (file sources)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// `host:port` (tcp sources)
    #[serde(default)]
    pub addr: Option<String>,

    /// Read poll interval; bounds how long `stop()` can take to be noticed
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_source_name() -> String {
    "source".to_string()
}

fn default_read_timeout_ms() -> u64 {
    500
}

impl SourceConfig {
    /// Read poll interval
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Source transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Process standard input
    Stdin,
    /// Regular file or named pipe
    File,
    /// TCP client connection
    Tcp,
}

// ===== Framing =====

/// Single-byte delimiter
///
/// Written in config either as a one-character ASCII string (`"#"`, `"\n"`)
/// or as a byte value (`10`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DelimiterRepr", into = "DelimiterRepr")]
pub struct Delimiter(u8);

impl Delimiter {
    /// Line feed
    pub const NEWLINE: Delimiter = Delimiter(b'\n');

    /// Pipe, the default batch separator
    pub const PIPE: Delimiter = Delimiter(b'|');

    /// Create from a byte
    pub const fn new(byte: u8) -> Self {
        Self(byte)
    }

    /// Delimiter byte
    #[inline]
    pub const fn byte(self) -> u8 {
        self.0
    }

    /// Delimiter as a char (always ASCII or Latin-1)
    #[inline]
    pub fn as_char(self) -> char {
        char::from(self.0)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DelimiterRepr {
    Byte(u8),
    Char(String),
}

impl TryFrom<DelimiterRepr> for Delimiter {
    type Error = String;

    fn try_from(repr: DelimiterRepr) -> Result<Self, Self::Error> {
        match repr {
            DelimiterRepr::Byte(b) => Ok(Self(b)),
            DelimiterRepr::Char(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii() => Ok(Self(c as u8)),
                    _ => Err(format!(
                        "delimiter must be a single ASCII character or a byte value, got {s:?}"
                    )),
                }
            }
        }
    }
}

impl From<Delimiter> for DelimiterRepr {
    fn from(d: Delimiter) -> Self {
        if d.0.is_ascii() {
            DelimiterRepr::Char(d.as_char().to_string())
        } else {
            DelimiterRepr::Byte(d.0)
        }
    }
}

/// Frame extraction strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FramingConfig {
    /// Frames are bounded by an optional start byte and a required stop byte
    Delimited {
        /// Start delimiter; `None` means every byte after a stop opens a frame
        #[serde(default)]
        start: Option<Delimiter>,

        /// Stop delimiter
        #[serde(default = "default_stop_delimiter")]
        stop: Delimiter,

        /// Discard frames growing past this many bytes (unbounded when unset)
        #[serde(default)]
        max_frame_len: Option<usize>,
    },

    /// Every `frame_len` raw bytes form one frame
    FixedLength {
        /// Frame width in bytes
        frame_len: usize,
    },
}

fn default_stop_delimiter() -> Delimiter {
    Delimiter::NEWLINE
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self::Delimited {
            start: None,
            stop: Delimiter::NEWLINE,
            max_frame_len: None,
        }
    }
}

// ===== Decoding =====

/// Frame decoder selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecoderConfig {
    /// UTF-8 JSON object per frame
    #[default]
    Json,

    /// Fixed-width binary struct
    Struct(StructLayoutConfig),

    /// Built-in 23-byte weather station layout
    Walker,
}

impl DecoderConfig {
    /// Frame width this decoder requires, if fixed
    pub fn expected_width(&self) -> Option<usize> {
        match self {
            Self::Json => None,
            Self::Struct(layout) => Some(layout.width()),
            Self::Walker => Some(StructLayoutConfig::walker().width()),
        }
    }
}

/// Byte order of multi-byte fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

/// Binary field encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl FieldKind {
    /// Encoded width in bytes
    pub const fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }
}

/// What a decoded field becomes in the record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    /// Plain record field
    #[default]
    Value,
    /// Routing id, rendered as `id_prefix + value`
    Id,
    /// Seconds since the layout epoch, rendered with the timestamp format
    Timestamp,
    /// Padding / reserved bytes
    Skip,
}

/// One binary field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Record key
    pub name: String,

    /// Encoding
    pub kind: FieldKind,

    /// Fixed-point divisor (`value / scale`)
    #[serde(default)]
    pub scale: Option<f64>,

    /// Field role
    #[serde(default)]
    pub role: FieldRole,
}

impl FieldConfig {
    fn new(name: &str, kind: FieldKind, role: FieldRole, scale: Option<f64>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            scale,
            role,
        }
    }
}

/// Offset between the Unix epoch and a protocol epoch
///
/// Expressed like a time delta (days + seconds + microseconds) and rolled
/// into one number of seconds by [`EpochOffset::total_seconds`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochOffset {
    #[serde(default)]
    pub days: i64,
    #[serde(default)]
    pub seconds: i64,
    #[serde(default)]
    pub microseconds: i64,
}

impl EpochOffset {
    /// 2000-01-01T00:00:00Z
    pub const Y2K: EpochOffset = EpochOffset {
        days: 10957,
        seconds: 0,
        microseconds: 0,
    };

    /// Total offset in whole seconds (microseconds truncated)
    ///
    /// `None` when the offset does not fit in an `i64` of microseconds.
    pub fn total_seconds(&self) -> Option<i64> {
        let secs = self.days.checked_mul(24 * 3600)?.checked_add(self.seconds)?;
        let micros = secs.checked_mul(1_000_000)?.checked_add(self.microseconds)?;
        Some(micros / 1_000_000)
    }
}

/// Timestamp rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampConfig {
    /// Protocol epoch relative to the Unix epoch
    #[serde(default)]
    pub epoch: EpochOffset,

    /// chrono `strftime` format
    #[serde(default = "default_timestamp_format")]
    pub format: String,
}

fn default_timestamp_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            epoch: EpochOffset::default(),
            format: default_timestamp_format(),
        }
    }
}

/// Fixed-width binary record layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructLayoutConfig {
    /// Byte order of multi-byte fields
    #[serde(default)]
    pub byte_order: ByteOrder,

    /// Prefix prepended to the id field value
    #[serde(default)]
    pub id_prefix: String,

    /// Timestamp field rendering
    #[serde(default)]
    pub timestamp: TimestampConfig,

    /// Fields in wire order
    pub fields: Vec<FieldConfig>,
}

impl StructLayoutConfig {
    /// Total encoded width
    pub fn width(&self) -> usize {
        self.fields.iter().map(|f| f.kind.width()).sum()
    }

    /// Weather station ("walker") packet: `>BIHHHHHHHHBB`, 23 bytes
    pub fn walker() -> Self {
        use FieldKind::{U16, U32, U8};
        use FieldRole::{Id, Timestamp, Value};

        Self {
            byte_order: ByteOrder::Big,
            id_prefix: "stalker".to_string(),
            timestamp: TimestampConfig {
                epoch: EpochOffset::Y2K,
                format: "%Y-%m-%d %H:%M".to_string(),
            },
            fields: vec![
                FieldConfig::new("id", U8, Id, None),
                FieldConfig::new("timestamp", U32, Timestamp, None),
                FieldConfig::new("air_temp", U16, Value, Some(100.0)),
                FieldConfig::new("wall_temp", U16, Value, Some(100.0)),
                FieldConfig::new("surface_temp", U16, Value, Some(100.0)),
                FieldConfig::new("case_temp", U16, Value, Some(100.0)),
                FieldConfig::new("humidity", U16, Value, Some(100.0)),
                FieldConfig::new("illuminance", U16, Value, None),
                FieldConfig::new("sound", U16, Value, None),
                FieldConfig::new("current", U16, Value, Some(100.0)),
                FieldConfig::new("battery", U8, Value, None),
                FieldConfig::new("version", U8, Value, None),
            ],
        }
    }
}

// ===== Aggregation =====

/// Device aggregator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Routing id of emitted batch records
    #[serde(default = "default_aggregator_id")]
    pub id: String,

    /// Flush discipline
    #[serde(default)]
    pub mode: AggregationMode,

    /// Flush period in milliseconds (0 = flush on demand only)
    #[serde(default = "default_flush_period_ms")]
    pub flush_period_ms: u64,

    /// Separator between serialized sub-entries in the batch payload
    #[serde(default = "default_entry_separator")]
    pub separator: Delimiter,

    /// Keep fixed access points in the table
    #[serde(default)]
    pub include_access_points: bool,

    /// Table bound; the stalest entry is evicted when a new identity arrives
    #[serde(default = "default_max_devices")]
    pub max_devices: usize,

    /// Sighting field holding the identity
    #[serde(default = "default_identity_field")]
    pub identity_field: String,

    /// Sighting field holding the display name
    #[serde(default = "default_name_field")]
    pub name_field: String,

    /// Sighting field flagging access points
    #[serde(default = "default_access_point_field")]
    pub access_point_field: String,

    /// OUI prefix (`"00-1A-2B"`) -> vendor name
    #[serde(default)]
    pub vendors: HashMap<String, String>,
}

fn default_aggregator_id() -> String {
    "wifi".to_string()
}

fn default_flush_period_ms() -> u64 {
    5000
}

fn default_entry_separator() -> Delimiter {
    Delimiter::PIPE
}

fn default_max_devices() -> usize {
    4096
}

fn default_identity_field() -> String {
    "eui".to_string()
}

fn default_name_field() -> String {
    "ssid".to_string()
}

fn default_access_point_field() -> String {
    "ap".to_string()
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            id: default_aggregator_id(),
            mode: AggregationMode::default(),
            flush_period_ms: default_flush_period_ms(),
            separator: default_entry_separator(),
            include_access_points: false,
            max_devices: default_max_devices(),
            identity_field: default_identity_field(),
            name_field: default_name_field(),
            access_point_field: default_access_point_field(),
            vendors: HashMap::new(),
        }
    }
}

impl AggregatorConfig {
    /// Flush period, `None` when flushing on demand only
    pub fn flush_period(&self) -> Option<Duration> {
        (self.flush_period_ms > 0).then(|| Duration::from_millis(self.flush_period_ms))
    }
}

/// Flush discipline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Flush removes every entry
    #[default]
    Destructive,
    /// Flush keeps entries; re-sightings update them in place
    Cumulative,
}

// ===== Sinks =====

/// Sink output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink name
    pub name: String,

    /// Delivery transport
    pub sink_type: SinkType,

    /// Only accept records whose `id` equals this value (accept all when unset)
    #[serde(default)]
    pub route_id: Option<String>,

    /// Ticket queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// What happens when the queue is full
    #[serde(default)]
    pub queue_full_policy: QueueFullPolicy,

    /// Pacing and retry
    #[serde(default)]
    pub delivery: DeliveryPolicy,

    /// Record formatter
    #[serde(default)]
    pub format: FormatConfig,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Sink transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// tracing output
    Log,
    /// Append lines to a file
    File,
    /// One TCP connection per delivery
    Tcp,
    /// Form-encoded HTTP POST
    Http,
}

/// Queue overflow policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullPolicy {
    /// Reject the incoming record
    #[default]
    Reject,
    /// Evict the oldest queued record to make room
    DropOldest,
}

/// Delivery pacing and retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPolicy {
    /// Minimum spacing after a successful delivery
    #[serde(default)]
    pub min_interval_ms: u64,

    /// Invocations per ticket before it is dropped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between a failed attempt and its retry
    #[serde(default = "default_failure_backoff_ms")]
    pub failure_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_failure_backoff_ms() -> u64 {
    100
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            min_interval_ms: 0,
            max_attempts: default_max_attempts(),
            failure_backoff_ms: default_failure_backoff_ms(),
        }
    }
}

impl DeliveryPolicy {
    /// Pacing interval after success
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Backoff after failure
    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }
}

/// Record formatter selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormatConfig {
    /// Record as a compact JSON line
    #[default]
    Json,

    /// Rename fields and attach a per-id channel key (form upload)
    FieldMap {
        /// Record id -> channel key
        #[serde(default)]
        channels: HashMap<String, String>,

        /// Record field -> output field
        #[serde(default)]
        fields: HashMap<String, String>,

        /// Output field carrying the channel key
        #[serde(default = "default_key_param")]
        key_param: String,
    },

    /// Batch payload -> one CSV row per device
    DeviceCsv {
        /// Sub-entry separator of the batch payload
        #[serde(default = "default_entry_separator")]
        separator: Delimiter,
    },
}

fn default_key_param() -> String {
    "key".to_string()
}
