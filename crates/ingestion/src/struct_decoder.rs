//! Fixed-width binary record decoder

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use contracts::{ByteOrder, FieldKind, FieldRole, Frame, Record, StructLayoutConfig};
use serde_json::{Number, Value};

use crate::decoder::RecordDecoder;
use crate::error::DecodeError;

/// Raw field value before role handling
#[derive(Debug, Clone, Copy)]
enum Raw {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
}

impl Raw {
    fn as_f64(self) -> f64 {
        match self {
            Raw::Unsigned(v) => v as f64,
            Raw::Signed(v) => v as f64,
            Raw::Float(v) => v,
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            Raw::Unsigned(v) => v as i64,
            Raw::Signed(v) => v,
            Raw::Float(v) => v as i64,
        }
    }

    fn render(self) -> String {
        match self {
            Raw::Unsigned(v) => v.to_string(),
            Raw::Signed(v) => v.to_string(),
            Raw::Float(v) => v.to_string(),
        }
    }
}

/// Decoder for a declared binary layout
///
/// Validates the frame width before touching any field.
#[derive(Debug, Clone)]
pub struct StructDecoder {
    name: String,
    layout: StructLayoutConfig,
    width: usize,
    epoch_offset: Option<i64>,
}

impl StructDecoder {
    /// Create decoder for a layout
    pub fn new(layout: StructLayoutConfig) -> Self {
        let width = layout.width();
        let epoch_offset = layout.timestamp.epoch.total_seconds();
        Self {
            name: "struct".to_string(),
            layout,
            width,
            epoch_offset,
        }
    }

    /// Weather station layout
    pub fn walker() -> Self {
        Self::new(StructLayoutConfig::walker()).with_name("walker")
    }

    /// Override the decoder name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Expected frame width
    pub fn width(&self) -> usize {
        self.width
    }

    fn timestamp(&self, raw: Raw) -> Result<String, DecodeError> {
        let secs = self
            .epoch_offset
            .and_then(|offset| raw.as_i64().checked_add(offset))
            .ok_or_else(|| DecodeError::malformed("timestamp overflows"))?;
        let dt = DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| DecodeError::malformed(format!("timestamp {secs} out of range")))?;

        let mut rendered = String::new();
        write!(rendered, "{}", dt.format(&self.layout.timestamp.format)).map_err(|_| {
            DecodeError::malformed(format!(
                "invalid timestamp format {:?}",
                self.layout.timestamp.format
            ))
        })?;
        Ok(rendered)
    }
}

impl RecordDecoder for StructDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, frame: &Frame) -> Result<Record, DecodeError> {
        let bytes = frame.as_bytes();
        if bytes.len() != self.width {
            return Err(DecodeError::WrongLength {
                expected: self.width,
                actual: bytes.len(),
            });
        }

        let mut record = Record::new();
        let mut offset = 0;

        for field in &self.layout.fields {
            let width = field.kind.width();
            let raw = read_raw(&bytes[offset..offset + width], field.kind, self.layout.byte_order);
            offset += width;

            let value = match field.role {
                FieldRole::Skip => continue,
                FieldRole::Id => Value::String(format!("{}{}", self.layout.id_prefix, raw.render())),
                FieldRole::Timestamp => Value::String(self.timestamp(raw)?),
                FieldRole::Value => match field.scale {
                    Some(scale) => float_value(raw.as_f64() / scale, &field.name)?,
                    None => match raw {
                        Raw::Unsigned(v) => Value::from(v),
                        Raw::Signed(v) => Value::from(v),
                        Raw::Float(v) => float_value(v, &field.name)?,
                    },
                },
            };
            record = record.with_field(field.name.clone(), value);
        }

        Ok(record)
    }
}

fn float_value(v: f64, field: &str) -> Result<Value, DecodeError> {
    Number::from_f64(v)
        .map(Value::Number)
        .ok_or_else(|| DecodeError::malformed(format!("field {field} is not a finite number")))
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

macro_rules! read_num {
    ($ty:ty, $bytes:expr, $order:expr) => {{
        let arr = array::<{ std::mem::size_of::<$ty>() }>($bytes);
        match $order {
            ByteOrder::Big => <$ty>::from_be_bytes(arr),
            ByteOrder::Little => <$ty>::from_le_bytes(arr),
        }
    }};
}

fn read_raw(bytes: &[u8], kind: FieldKind, order: ByteOrder) -> Raw {
    match kind {
        FieldKind::U8 => Raw::Unsigned(bytes[0] as u64),
        FieldKind::I8 => Raw::Signed(bytes[0] as i8 as i64),
        FieldKind::U16 => Raw::Unsigned(read_num!(u16, bytes, order) as u64),
        FieldKind::I16 => Raw::Signed(read_num!(i16, bytes, order) as i64),
        FieldKind::U32 => Raw::Unsigned(read_num!(u32, bytes, order) as u64),
        FieldKind::I32 => Raw::Signed(read_num!(i32, bytes, order) as i64),
        FieldKind::U64 => Raw::Unsigned(read_num!(u64, bytes, order)),
        FieldKind::I64 => Raw::Signed(read_num!(i64, bytes, order)),
        FieldKind::F32 => Raw::Float(read_num!(f32, bytes, order) as f64),
        FieldKind::F64 => Raw::Float(read_num!(f64, bytes, order)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{EpochOffset, FieldConfig, TimestampConfig};
    use serde_json::json;

    fn walker_packet(station: u8, ts: u32) -> Vec<u8> {
        let mut buf = vec![station];
        buf.extend_from_slice(&ts.to_be_bytes());
        for v in [2150u16, 1800, 2575, 3000, 4512, 640, 55, 125] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        buf.push(87);
        buf.push(2);
        buf
    }

    #[test]
    fn test_walker_decode() {
        let decoder = StructDecoder::walker();
        // 2000-01-01 00:00 + 1 day 1 hour 30 minutes
        let packet = walker_packet(3, 86_400 + 5_400);
        let record = decoder.decode(&Frame::new(1, packet)).unwrap();

        assert_eq!(record.id(), Some("stalker3"));
        assert_eq!(record.get_str("timestamp"), Some("2000-01-02 01:30"));
        assert_eq!(record.get("air_temp"), Some(&json!(21.5)));
        assert_eq!(record.get("humidity"), Some(&json!(45.12)));
        assert_eq!(record.get("illuminance"), Some(&json!(640)));
        assert_eq!(record.get("current"), Some(&json!(1.25)));
        assert_eq!(record.get("battery"), Some(&json!(87)));
        assert_eq!(record.get("version"), Some(&json!(2)));
    }

    #[test]
    fn test_wrong_length() {
        let decoder = StructDecoder::walker();
        let err = decoder.decode(&Frame::new(1, vec![0u8; 22])).unwrap_err();
        assert_eq!(
            err,
            DecodeError::WrongLength {
                expected: 23,
                actual: 22
            }
        );
    }

    #[test]
    fn test_little_endian_signed_and_skip() {
        let layout = StructLayoutConfig {
            byte_order: ByteOrder::Little,
            id_prefix: "node-".into(),
            timestamp: TimestampConfig {
                epoch: EpochOffset::default(),
                format: "%Y-%m-%dT%H:%M:%S".into(),
            },
            fields: vec![
                FieldConfig {
                    name: "id".into(),
                    kind: FieldKind::U16,
                    scale: None,
                    role: FieldRole::Id,
                },
                FieldConfig {
                    name: "pad".into(),
                    kind: FieldKind::U8,
                    scale: None,
                    role: FieldRole::Skip,
                },
                FieldConfig {
                    name: "delta".into(),
                    kind: FieldKind::I16,
                    scale: Some(10.0),
                    role: FieldRole::Value,
                },
                FieldConfig {
                    name: "at".into(),
                    kind: FieldKind::U32,
                    scale: None,
                    role: FieldRole::Timestamp,
                },
            ],
        };

        let mut buf = Vec::new();
        buf.extend_from_slice(&258u16.to_le_bytes());
        buf.push(0xAA);
        buf.extend_from_slice(&(-25i16).to_le_bytes());
        buf.extend_from_slice(&60u32.to_le_bytes());

        let decoder = StructDecoder::new(layout);
        assert_eq!(decoder.width(), 9);

        let record = decoder.decode(&Frame::new(1, buf)).unwrap();
        assert_eq!(record.id(), Some("node-258"));
        assert!(record.get("pad").is_none());
        assert_eq!(record.get("delta"), Some(&json!(-2.5)));
        assert_eq!(record.get_str("at"), Some("1970-01-01T00:01:00"));
    }

    #[test]
    fn test_epoch_offset_out_of_range_is_malformed() {
        let mut layout = StructLayoutConfig::walker();
        layout.timestamp.epoch = EpochOffset {
            days: 1_000_000,
            ..Default::default()
        };
        let decoder = StructDecoder::new(layout);

        let err = decoder
            .decode(&Frame::new(1, walker_packet(3, 60)))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }), "got: {err:?}");
    }
}
