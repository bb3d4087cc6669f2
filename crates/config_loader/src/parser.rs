//! Configuration parsing
//!
//! TOML (primary) and JSON.

use contracts::{ContractError, PipelineBlueprint};

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML (recommended)
    Toml,
    /// JSON
    Json,
}

impl ConfigFormat {
    /// Infer format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse TOML configuration
pub fn parse_toml(content: &str) -> Result<PipelineBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse JSON configuration
pub fn parse_json(content: &str) -> Result<PipelineBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse according to format
pub fn parse(content: &str, format: ConfigFormat) -> Result<PipelineBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        AggregationMode, DecoderConfig, Delimiter, FormatConfig, FramingConfig, IngestMode,
        SourceKind,
    };

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
[source]
kind = "file"
path = "/var/log/station.bin"

[decoder]
kind = "walker"

[framing]
mode = "fixed_length"
frame_len = 23

[[sinks]]
name = "log_sink"
sink_type = "log"
"#;
        let result = parse_toml(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let bp = result.unwrap();
        assert_eq!(bp.source.kind, SourceKind::File);
        assert_eq!(bp.decoder, DecoderConfig::Walker);
        assert_eq!(bp.framing, FramingConfig::FixedLength { frame_len: 23 });
        assert_eq!(bp.mode, IngestMode::Telemetry);
    }

    #[test]
    fn test_parse_toml_discovery() {
        let content = r#"
mode = "discovery"

[source]
kind = "tcp"
addr = "127.0.0.1:9000"

[aggregator]
mode = "cumulative"
flush_period_ms = 60000
include_access_points = true
vendors = { "00-1A-2B" = "Ayecom Technology" }

[[sinks]]
name = "csv"
sink_type = "file"
route_id = "wifi"
format = { kind = "device_csv" }
params = { path = "devices.csv" }
"#;
        let bp = parse_toml(content).unwrap();
        let aggregator = bp.aggregator.unwrap();
        assert_eq!(aggregator.mode, AggregationMode::Cumulative);
        assert_eq!(aggregator.id, "wifi");
        assert_eq!(aggregator.separator, Delimiter::PIPE);
        assert!(aggregator.include_access_points);
        assert_eq!(
            bp.sinks[0].format,
            FormatConfig::DeviceCsv {
                separator: Delimiter::PIPE
            }
        );
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r##"{
            "source": { "kind": "stdin" },
            "framing": { "mode": "delimited", "start": "#", "stop": "$" },
            "sinks": [{
                "name": "thingspeak",
                "sink_type": "http",
                "format": {
                    "kind": "field_map",
                    "channels": { "stalker3": "ABCDEF" },
                    "fields": { "air_temp": "field1" }
                }
            }]
        }"##;
        let result = parse_json(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let content = "invalid toml [[[";
        let result = parse_toml(content);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("toml"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("TOML"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("json"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
