//! Record formatters
//!
//! A formatter runs on the sink worker right before delivery. Failures drop the
//! ticket; they are never retried.

use std::collections::HashMap;

use contracts::{ContractError, FormatConfig, FormattedOutput, Record, RecordFormatter};
use serde_json::Value;
use tracing::warn;

/// Build the formatter named by configuration
pub fn build_formatter(config: &FormatConfig) -> Box<dyn RecordFormatter> {
    match config {
        FormatConfig::Json => Box::new(JsonLineFormatter),
        FormatConfig::FieldMap {
            channels,
            fields,
            key_param,
        } => Box::new(FieldMapFormatter::new(
            channels.clone(),
            fields.clone(),
            key_param.clone(),
        )),
        FormatConfig::DeviceCsv { separator } => {
            Box::new(DeviceCsvFormatter::new(separator.as_char()))
        }
    }
}

/// Record as one compact JSON line
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLineFormatter;

impl RecordFormatter for JsonLineFormatter {
    fn name(&self) -> &str {
        "json"
    }

    fn format(&self, record: &Record) -> Result<FormattedOutput, ContractError> {
        Ok(FormattedOutput::Text(record.to_json_string()))
    }
}

/// Per-id channel key plus renamed fields, as form pairs
///
/// Only mapped fields are emitted. The channel key always comes first, the
/// remaining pairs are ordered by output name.
#[derive(Debug, Clone)]
pub struct FieldMapFormatter {
    channels: HashMap<String, String>,
    fields: HashMap<String, String>,
    key_param: String,
}

impl FieldMapFormatter {
    pub fn new(
        channels: HashMap<String, String>,
        fields: HashMap<String, String>,
        key_param: impl Into<String>,
    ) -> Self {
        Self {
            channels,
            fields,
            key_param: key_param.into(),
        }
    }
}

impl RecordFormatter for FieldMapFormatter {
    fn name(&self) -> &str {
        "field_map"
    }

    fn format(&self, record: &Record) -> Result<FormattedOutput, ContractError> {
        let id = record
            .id()
            .ok_or_else(|| ContractError::format(self.name(), "record has no id"))?;
        let key = self.channels.get(id).ok_or_else(|| {
            ContractError::format(self.name(), format!("no channel configured for id '{id}'"))
        })?;

        let mut mapped: Vec<(String, String)> = record
            .iter()
            .filter_map(|(field, value)| {
                self.fields
                    .get(field)
                    .map(|out| (out.clone(), form_value(value)))
            })
            .collect();
        mapped.sort_by(|a, b| a.0.cmp(&b.0));

        let mut pairs = Vec::with_capacity(mapped.len() + 1);
        pairs.push((self.key_param.clone(), key.clone()));
        pairs.extend(mapped);
        Ok(FormattedOutput::Form(pairs))
    }
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Batch payload -> one `eui,vendor,ssid,last_seen` row per device
///
/// Sub-entries that are empty or not JSON objects are skipped with a warning.
#[derive(Debug, Clone, Copy)]
pub struct DeviceCsvFormatter {
    separator: char,
}

impl DeviceCsvFormatter {
    pub fn new(separator: char) -> Self {
        Self { separator }
    }
}

impl Default for DeviceCsvFormatter {
    fn default() -> Self {
        Self::new('|')
    }
}

impl RecordFormatter for DeviceCsvFormatter {
    fn name(&self) -> &str {
        "device_csv"
    }

    fn format(&self, record: &Record) -> Result<FormattedOutput, ContractError> {
        let payload = record
            .get_str("payload")
            .ok_or_else(|| ContractError::format(self.name(), "record has no string payload"))?;

        let rows: Vec<String> = payload
            .split(self.separator)
            .filter(|entry| !entry.trim().is_empty())
            .filter_map(|entry| match serde_json::from_str::<Value>(entry) {
                Ok(Value::Object(device)) => Some(
                    ["eui", "vendor", "ssid", "last_seen"]
                        .iter()
                        .map(|key| device.get(*key).map(form_value).unwrap_or_default())
                        .collect::<Vec<_>>()
                        .join(","),
                ),
                Ok(_) => {
                    warn!(entry = %entry, "skipping non-object device entry");
                    None
                }
                Err(e) => {
                    warn!(entry = %entry, error = %e, "skipping undecodable device entry");
                    None
                }
            })
            .collect();

        Ok(FormattedOutput::Text(rows.join("\n")))
    }
}
