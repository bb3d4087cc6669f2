//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{FormatConfig, FramingConfig, PipelineBlueprint, SinkConfig};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    mode: String,
    source: SourceInfo,
    framing: String,
    decoder: DecoderInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    aggregator: Option<AggregatorInfo>,
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct SourceInfo {
    name: String,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    addr: Option<String>,
    read_timeout_ms: u64,
}

#[derive(Serialize)]
struct DecoderInfo {
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_width: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<String>,
}

#[derive(Serialize)]
struct AggregatorInfo {
    id: String,
    mode: String,
    flush_period_ms: u64,
    max_devices: usize,
    include_access_points: bool,
    vendor_prefixes: usize,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    route_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<SinkDetails>,
}

#[derive(Serialize)]
struct SinkDetails {
    queue_capacity: usize,
    queue_full_policy: String,
    min_interval_ms: u64,
    max_attempts: u32,
    failure_backoff_ms: u64,
    format: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    params: HashMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args.sinks);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args.sinks);
    }

    Ok(())
}

fn framing_description(framing: &FramingConfig) -> String {
    match framing {
        FramingConfig::Delimited {
            start,
            stop,
            max_frame_len,
        } => {
            let start = start
                .map(|d| format!("{:?}", d.as_char()))
                .unwrap_or_else(|| "none".to_string());
            let limit = max_frame_len
                .map(|n| format!(", max {} bytes", n))
                .unwrap_or_default();
            format!("delimited (start {}, stop {:?}{})", start, stop.as_char(), limit)
        }
        FramingConfig::FixedLength { frame_len } => format!("fixed length ({} bytes)", frame_len),
    }
}

fn format_description(format: &FormatConfig) -> String {
    match format {
        FormatConfig::Json => "json".to_string(),
        FormatConfig::FieldMap {
            channels, fields, ..
        } => format!(
            "field_map ({} channels, {} fields)",
            channels.len(),
            fields.len()
        ),
        FormatConfig::DeviceCsv { separator } => {
            format!("device_csv (separator {:?})", separator.as_char())
        }
    }
}

fn decoder_info(blueprint: &PipelineBlueprint) -> DecoderInfo {
    let (kind, fields) = match &blueprint.decoder {
        contracts::DecoderConfig::Json => ("json", Vec::new()),
        contracts::DecoderConfig::Struct(layout) => (
            "struct",
            layout.fields.iter().map(|f| f.name.clone()).collect(),
        ),
        contracts::DecoderConfig::Walker => (
            "walker",
            contracts::StructLayoutConfig::walker()
                .fields
                .iter()
                .map(|f| f.name.clone())
                .collect(),
        ),
    };
    DecoderInfo {
        kind: kind.to_string(),
        frame_width: blueprint.decoder.expected_width(),
        fields,
    }
}

fn sink_info(sink: &SinkConfig, details: bool) -> SinkInfo {
    SinkInfo {
        name: sink.name.clone(),
        sink_type: format!("{:?}", sink.sink_type),
        route_id: sink.route_id.clone().unwrap_or_else(|| "*".to_string()),
        details: details.then(|| SinkDetails {
            queue_capacity: sink.queue_capacity,
            queue_full_policy: format!("{:?}", sink.queue_full_policy),
            min_interval_ms: sink.delivery.min_interval_ms,
            max_attempts: sink.delivery.max_attempts,
            failure_backoff_ms: sink.delivery.failure_backoff_ms,
            format: format_description(&sink.format),
            params: sink.params.clone(),
        }),
    }
}

fn build_config_info(blueprint: &PipelineBlueprint, sink_details: bool) -> ConfigInfo {
    let source = &blueprint.source;
    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        mode: format!("{:?}", blueprint.mode),
        source: SourceInfo {
            name: source.name.clone(),
            kind: format!("{:?}", source.kind),
            path: source.path.as_ref().map(|p| p.display().to_string()),
            addr: source.addr.clone(),
            read_timeout_ms: source.read_timeout_ms,
        },
        framing: framing_description(&blueprint.framing),
        decoder: decoder_info(blueprint),
        aggregator: blueprint.aggregator.as_ref().map(|a| AggregatorInfo {
            id: a.id.clone(),
            mode: format!("{:?}", a.mode),
            flush_period_ms: a.flush_period_ms,
            max_devices: a.max_devices,
            include_access_points: a.include_access_points,
            vendor_prefixes: a.vendors.len(),
        }),
        sinks: blueprint
            .sinks
            .iter()
            .map(|s| sink_info(s, sink_details))
            .collect(),
    }
}

fn print_config_info(blueprint: &PipelineBlueprint, sink_details: bool) {
    let info = build_config_info(blueprint, sink_details);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 SinkNode Configuration                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("📥 Source");
    println!("   ├─ Version: {}", info.version);
    println!("   ├─ Mode: {}", info.mode);
    println!("   ├─ Name: {} ({})", info.source.name, info.source.kind);
    if let Some(ref path) = info.source.path {
        println!("   ├─ Path: {}", path);
    }
    if let Some(ref addr) = info.source.addr {
        println!("   ├─ Address: {}", addr);
    }
    println!("   ├─ Framing: {}", info.framing);
    match info.decoder.frame_width {
        Some(width) => println!("   └─ Decoder: {} ({} bytes)", info.decoder.kind, width),
        None => println!("   └─ Decoder: {}", info.decoder.kind),
    }

    if let Some(ref aggregator) = info.aggregator {
        println!("\n📡 Aggregator");
        println!("   ├─ Batch id: {}", aggregator.id);
        println!("   ├─ Mode: {}", aggregator.mode);
        if aggregator.flush_period_ms == 0 {
            println!("   ├─ Flush: on demand");
        } else {
            println!("   ├─ Flush: every {} ms", aggregator.flush_period_ms);
        }
        println!("   ├─ Max devices: {}", aggregator.max_devices);
        println!("   └─ Vendor prefixes: {}", aggregator.vendor_prefixes);
    }

    println!("\n📤 Sinks ({})", info.sinks.len());
    for (i, sink) in info.sinks.iter().enumerate() {
        let is_last = i == info.sinks.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!(
            "   {} {} ({}) route={}",
            prefix, sink.name, sink.sink_type, sink.route_id
        );

        if let Some(ref details) = sink.details {
            println!(
                "   {}  ├─ Queue: {} ({})",
                child_prefix, details.queue_capacity, details.queue_full_policy
            );
            println!(
                "   {}  ├─ Delivery: interval {} ms, {} attempts, backoff {} ms",
                child_prefix,
                details.min_interval_ms,
                details.max_attempts,
                details.failure_backoff_ms
            );
            println!("   {}  └─ Format: {}", child_prefix, details.format);
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_loader::{ConfigFormat, ConfigLoader};

    const CONFIG: &str = r##"
[source]
kind = "tcp"
addr = "127.0.0.1:7000"

[framing]
mode = "delimited"
start = "#"
stop = "\n"

[decoder]
kind = "walker"

[[sinks]]
name = "upload"
sink_type = "http"
route_id = "stalker3"
params = { url = "http://127.0.0.1:9/update" }

[sinks.delivery]
min_interval_ms = 15000

[sinks.format]
kind = "field_map"
channels = { stalker3 = "KEY3" }
fields = { air_temp = "field1" }
"##;

    #[test]
    fn test_info_with_sink_details() {
        let blueprint = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap();
        let info = build_config_info(&blueprint, true);

        assert_eq!(info.decoder.kind, "walker");
        assert_eq!(info.decoder.frame_width, Some(23));
        assert_eq!(info.decoder.fields.len(), 12);
        assert_eq!(info.source.addr.as_deref(), Some("127.0.0.1:7000"));

        let sink = &info.sinks[0];
        assert_eq!(sink.route_id, "stalker3");
        let details = sink.details.as_ref().unwrap();
        assert_eq!(details.min_interval_ms, 15000);
        assert_eq!(details.format, "field_map (1 channels, 1 fields)");
    }

    #[test]
    fn test_info_json_omits_details() {
        let blueprint = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap();
        let json = serde_json::to_value(build_config_info(&blueprint, false)).unwrap();

        assert!(json["sinks"][0].get("details").is_none());
        assert_eq!(json["framing"], "delimited (start '#', stop '\\n')");
    }
}
