//! Frame / Record / FormattedOutput - the three shapes data takes on its way
//! from the byte source to a delivery collaborator.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ContractError;

/// Raw frame payload
///
/// Produced by the frame extractor; never contains the framing delimiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Position of this frame in its source stream (starting at 1)
    pub seq: u64,

    /// Payload bytes (zero-copy)
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame
    pub fn new(seq: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }

    /// Payload length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload as raw bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as UTF-8 text
    pub fn as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }
}

/// Decoded record
///
/// A JSON object whose `id` field selects the sinks it is routed to.
/// Records are immutable once built: the builder methods consume `self`,
/// and `Clone` is a deep copy so fan-out edges never share state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Routing key field name
    pub const ID_KEY: &'static str = "id";

    /// Create an empty record (unroutable until an `id` is set)
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Create a record carrying only its routing id
    pub fn with_id(id: impl Into<String>) -> Self {
        Self::new().with_field(Self::ID_KEY, id.into())
    }

    /// Wrap an existing JSON object
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Builder: set a field, returning the updated record
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Routing id, if present and a string
    pub fn id(&self) -> Option<&str> {
        self.0.get(Self::ID_KEY).and_then(Value::as_str)
    }

    /// Field lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String field lookup
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// All fields
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Iterate over fields
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Unwrap into the underlying JSON object
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Serialize as a compact JSON string
    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

impl TryFrom<Value> for Record {
    type Error = ContractError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ContractError::unroutable(format!(
                "expected JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Formatter output handed to a delivery collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormattedOutput {
    /// A text body (JSON line, CSV rows, ...)
    Text(String),

    /// Key/value pairs (form-encoded upload)
    Form(Vec<(String, String)>),
}

impl FormattedOutput {
    /// Render as text; form pairs become `k=v&k=v`
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Form(pairs) => pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&"),
        }
    }

    /// Whether there is nothing to deliver
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Form(pairs) => pairs.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_id() {
        let record = Record::with_id("a").with_field("temp", 21.5);
        assert_eq!(record.id(), Some("a"));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_non_string_id_is_not_an_id() {
        let record = Record::new().with_field("id", 7);
        assert_eq!(record.id(), None);
    }

    #[test]
    fn test_clone_is_deep() {
        let original = Record::try_from(json!({"id": "a", "nested": {"x": 1}})).unwrap();
        let copy = original.clone();

        let mut map = copy.into_map();
        map["nested"]["x"] = json!(2);

        assert_eq!(original.get("nested").unwrap()["x"], json!(1));
        assert_eq!(map["nested"]["x"], json!(2));
    }

    #[test]
    fn test_try_from_rejects_non_object() {
        let err = Record::try_from(json!([1, 2, 3])).unwrap_err();
        assert!(err.to_string().contains("array"), "got: {err}");
    }

    #[test]
    fn test_frame_text() {
        let frame = Frame::new(1, &b"{\"id\":\"a\"}"[..]);
        assert_eq!(frame.as_str().unwrap(), "{\"id\":\"a\"}");
        assert_eq!(frame.len(), 10);
    }

    #[test]
    fn test_form_to_text() {
        let output = FormattedOutput::Form(vec![
            ("key".into(), "abc".into()),
            ("field1".into(), "21.5".into()),
        ]);
        assert_eq!(output.to_text(), "key=abc&field1=21.5");
    }
}
