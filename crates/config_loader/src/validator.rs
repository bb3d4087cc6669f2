//! Configuration validation
//!
//! Rules:
//! - source transport has its address (path / addr)
//! - framing delimiters are distinct, widths > 0
//! - struct layouts are non-empty and fixed-length framing matches their width
//! - struct timestamp epoch offsets fit in 64-bit microseconds
//! - aggregator section present in discovery mode
//! - sink names unique, transport params present
//! - delivery policy: max_attempts >= 1, backoff shorter than interval
//! - queue_capacity > 0

use std::collections::HashSet;

use contracts::{
    ContractError, DecoderConfig, FormatConfig, FramingConfig, PipelineBlueprint, SinkConfig,
    SinkType, SourceKind,
};

/// Validate a PipelineBlueprint
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    validate_source(blueprint)?;
    validate_framing(blueprint)?;
    validate_decoder(blueprint)?;
    validate_aggregator(blueprint)?;
    validate_sink_names(blueprint)?;
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        validate_sink(idx, sink)?;
    }
    Ok(())
}

/// Source transport must name what it opens
fn validate_source(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let source = &blueprint.source;
    match source.kind {
        SourceKind::Stdin => {}
        SourceKind::File if source.path.is_none() => {
            return Err(ContractError::config_validation(
                "source.path",
                "file source requires a path",
            ));
        }
        SourceKind::Tcp if source.addr.as_deref().map_or(true, str::is_empty) => {
            return Err(ContractError::config_validation(
                "source.addr",
                "tcp source requires addr (host:port)",
            ));
        }
        _ => {}
    }

    if source.read_timeout_ms == 0 {
        return Err(ContractError::config_validation(
            "source.read_timeout_ms",
            "read_timeout_ms must be > 0",
        ));
    }
    Ok(())
}

fn validate_framing(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    match &blueprint.framing {
        FramingConfig::Delimited {
            start,
            stop,
            max_frame_len,
        } => {
            if *start == Some(*stop) {
                return Err(ContractError::config_validation(
                    "framing.start / framing.stop",
                    format!(
                        "start and stop delimiters must differ, both are {:?}",
                        stop.as_char()
                    ),
                ));
            }
            if *max_frame_len == Some(0) {
                return Err(ContractError::config_validation(
                    "framing.max_frame_len",
                    "max_frame_len must be > 0",
                ));
            }
        }
        FramingConfig::FixedLength { frame_len } => {
            if *frame_len == 0 {
                return Err(ContractError::config_validation(
                    "framing.frame_len",
                    "frame_len must be > 0",
                ));
            }
            if let Some(width) = blueprint.decoder.expected_width() {
                if width != *frame_len {
                    return Err(ContractError::config_validation(
                        "framing.frame_len",
                        format!("frame_len ({frame_len}) does not match decoder width ({width})"),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn validate_decoder(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let DecoderConfig::Struct(layout) = &blueprint.decoder else {
        return Ok(());
    };

    if layout.fields.is_empty() {
        return Err(ContractError::config_validation(
            "decoder.fields",
            "struct layout must declare at least one field",
        ));
    }

    if layout.timestamp.epoch.total_seconds().is_none() {
        return Err(ContractError::config_validation(
            "decoder.timestamp.epoch",
            "epoch offset is out of range",
        ));
    }

    let mut seen = HashSet::new();
    for field in &layout.fields {
        if !seen.insert(field.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("decoder.fields[name={}]", field.name),
                "duplicate field name",
            ));
        }
        if let Some(scale) = field.scale {
            if scale == 0.0 || !scale.is_finite() {
                return Err(ContractError::config_validation(
                    format!("decoder.fields[{}].scale", field.name),
                    format!("scale must be a finite non-zero number, got {scale}"),
                ));
            }
        }
    }
    Ok(())
}

fn validate_aggregator(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    match &blueprint.aggregator {
        None if blueprint.is_discovery() => Err(ContractError::config_validation(
            "aggregator",
            "discovery mode requires an [aggregator] section",
        )),
        Some(aggregator) => {
            if aggregator.id.is_empty() {
                return Err(ContractError::config_validation(
                    "aggregator.id",
                    "aggregator id cannot be empty",
                ));
            }
            if aggregator.max_devices == 0 {
                return Err(ContractError::config_validation(
                    "aggregator.max_devices",
                    "max_devices must be > 0",
                ));
            }
            Ok(())
        }
        None => Ok(()),
    }
}

fn validate_sink_names(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{idx}].name"),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
    }
    Ok(())
}

fn validate_sink(idx: usize, sink: &SinkConfig) -> Result<(), ContractError> {
    let field = |name: &str| format!("sinks[{idx}].{name}");

    if sink.queue_capacity == 0 {
        return Err(ContractError::config_validation(
            field("queue_capacity"),
            "queue_capacity must be > 0",
        ));
    }

    let delivery = &sink.delivery;
    if delivery.max_attempts == 0 {
        return Err(ContractError::config_validation(
            field("delivery.max_attempts"),
            "max_attempts must be >= 1",
        ));
    }
    if delivery.min_interval_ms > 0 && delivery.failure_backoff_ms >= delivery.min_interval_ms {
        return Err(ContractError::config_validation(
            field("delivery.failure_backoff_ms"),
            format!(
                "failure_backoff_ms ({}) must be < min_interval_ms ({})",
                delivery.failure_backoff_ms, delivery.min_interval_ms
            ),
        ));
    }

    if sink.route_id.as_deref() == Some("") {
        return Err(ContractError::config_validation(
            field("route_id"),
            "route_id cannot be empty (omit it to accept every record)",
        ));
    }

    let required = match sink.sink_type {
        SinkType::Log => None,
        SinkType::File => Some("path"),
        SinkType::Tcp => Some("addr"),
        SinkType::Http => Some("url"),
    };
    if let Some(param) = required {
        if sink.params.get(param).map_or(true, |v| v.is_empty()) {
            return Err(ContractError::config_validation(
                field(&format!("params.{param}")),
                format!("{:?} sink requires '{param}' param", sink.sink_type),
            ));
        }
    }

    if let FormatConfig::FieldMap { key_param, .. } = &sink.format {
        if key_param.is_empty() {
            return Err(ContractError::config_validation(
                field("format.key_param"),
                "key_param cannot be empty",
            ));
        }
    }

    Ok(())
}
