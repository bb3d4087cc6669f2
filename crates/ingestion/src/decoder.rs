//! Frame decoding

use contracts::{DecoderConfig, Frame, Record, StructLayoutConfig};
use serde_json::Value;

use crate::error::DecodeError;
use crate::struct_decoder::StructDecoder;

/// Frame -> Record
///
/// Decoders are stateless: a bad frame never affects the next one.
pub trait RecordDecoder: Send + Sync {
    /// Decoder name (logging)
    fn name(&self) -> &str;

    /// Decode one frame
    fn decode(&self, frame: &Frame) -> Result<Record, DecodeError>;
}

/// UTF-8 JSON object per frame
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl RecordDecoder for JsonDecoder {
    fn name(&self) -> &str {
        "json"
    }

    fn decode(&self, frame: &Frame) -> Result<Record, DecodeError> {
        let text = frame
            .as_str()
            .map_err(|e| DecodeError::malformed(format!("invalid UTF-8: {e}")))?;

        if text.trim().is_empty() {
            return Err(DecodeError::malformed("empty frame"));
        }

        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(Record::from_map(map)),
            Ok(_) => Err(DecodeError::malformed("frame is not a JSON object")),
            Err(e) => Err(DecodeError::malformed(format!("invalid JSON: {e}"))),
        }
    }
}

/// Build the decoder selected by configuration
pub fn build_decoder(config: &DecoderConfig) -> Box<dyn RecordDecoder> {
    match config {
        DecoderConfig::Json => Box::new(JsonDecoder),
        DecoderConfig::Struct(layout) => Box::new(StructDecoder::new(layout.clone())),
        DecoderConfig::Walker => Box::new(
            StructDecoder::new(StructLayoutConfig::walker()).with_name("walker"),
        ),
    }
}
