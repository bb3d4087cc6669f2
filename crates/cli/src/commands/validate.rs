//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{PipelineBlueprint, SinkType};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    mode: String,
    source: String,
    framing: String,
    decoder: String,
    sink_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    aggregator_id: Option<String>,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(summarize(&blueprint)),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

fn summarize(blueprint: &PipelineBlueprint) -> ConfigSummary {
    let source = &blueprint.source;
    let location = source
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .or_else(|| source.addr.clone())
        .unwrap_or_else(|| "-".to_string());

    ConfigSummary {
        version: format!("{:?}", blueprint.version),
        mode: format!("{:?}", blueprint.mode),
        source: format!("{} ({:?}, {})", source.name, source.kind, location),
        framing: format!("{:?}", blueprint.framing),
        decoder: match blueprint.decoder.expected_width() {
            Some(width) => format!("{} ({} bytes)", decoder_kind(blueprint), width),
            None => decoder_kind(blueprint).to_string(),
        },
        sink_count: blueprint.sinks.len(),
        aggregator_id: blueprint.aggregator.as_ref().map(|a| a.id.clone()),
    }
}

fn decoder_kind(blueprint: &PipelineBlueprint) -> &'static str {
    match blueprint.decoder {
        contracts::DecoderConfig::Json => "json",
        contracts::DecoderConfig::Struct(_) => "struct",
        contracts::DecoderConfig::Walker => "walker",
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &PipelineBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.sinks.is_empty() {
        warnings.push("No sinks configured - decoded records will be dropped".to_string());
    }

    if blueprint.aggregator.is_some() && !blueprint.is_discovery() {
        warnings.push("[aggregator] is ignored outside discovery mode".to_string());
    }

    if let (true, Some(aggregator)) = (blueprint.is_discovery(), &blueprint.aggregator) {
        let reaches_aggregate = blueprint
            .sinks
            .iter()
            .any(|s| s.route_id.as_deref().map_or(true, |id| id == aggregator.id));
        if !reaches_aggregate {
            warnings.push(format!(
                "No sink accepts aggregator id '{}' - device batches will be unroutable",
                aggregator.id
            ));
        }
    }

    for sink in &blueprint.sinks {
        if sink.sink_type == SinkType::Http && sink.delivery.min_interval_ms == 0 {
            warnings.push(format!(
                "Sink '{}' posts over HTTP with no min_interval_ms - remote rate limits may reject uploads",
                sink.name
            ));
        }
        if blueprint.is_discovery() {
            continue;
        }
        let walker = blueprint.decoder == contracts::DecoderConfig::Walker;
        if let Some(ref route_id) = sink.route_id {
            if walker && !route_id.starts_with("stalker") {
                warnings.push(format!(
                    "Sink '{}' routes id '{}' but walker records are ids 'stalker<N>'",
                    sink.name, route_id
                ));
            }
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Mode: {}", summary.mode);
            println!("  Source: {}", summary.source);
            println!("  Framing: {}", summary.framing);
            println!("  Decoder: {}", summary.decoder);
            println!("  Sinks: {}", summary.sink_count);
            if let Some(ref id) = summary.aggregator_id {
                println!("  Aggregator id: {}", id);
            }
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_loader::{ConfigFormat, ConfigLoader};

    fn load(toml: &str) -> PipelineBlueprint {
        ConfigLoader::load_from_str(toml, ConfigFormat::Toml).unwrap()
    }

    #[test]
    fn test_discovery_without_matching_sink_warns() {
        let blueprint = load(
            r#"
mode = "discovery"

[source]
kind = "stdin"

[aggregator]
id = "wifi"

[[sinks]]
name = "weather"
sink_type = "log"
route_id = "stalker3"
"#,
        );

        let warnings = collect_warnings(&blueprint);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'wifi'"));
    }

    #[test]
    fn test_http_without_interval_warns() {
        let blueprint = load(
            r#"
[source]
kind = "stdin"

[[sinks]]
name = "upload"
sink_type = "http"
params = { url = "http://127.0.0.1:9/update" }
"#,
        );

        let warnings = collect_warnings(&blueprint);
        assert!(warnings.iter().any(|w| w.contains("upload")));
    }

    #[test]
    fn test_clean_config_has_no_warnings() {
        let blueprint = load(
            r#"
[source]
kind = "stdin"

[[sinks]]
name = "all"
sink_type = "log"
"#,
        );

        assert!(collect_warnings(&blueprint).is_empty());
        let summary = summarize(&blueprint);
        assert_eq!(summary.sink_count, 1);
        assert_eq!(summary.decoder, "json");
    }

    #[test]
    fn test_missing_file_is_invalid() {
        let args = ValidateArgs {
            config: "/nonexistent/sinknode.toml".into(),
            json: true,
        };
        let result = validate_config(&args);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("File not found"));
    }
}
