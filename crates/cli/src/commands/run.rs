//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::{FramingConfig, PipelineBlueprint, SourceKind};
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if apply_source_override(&mut blueprint, args) {
        config_loader::validate(&blueprint)
            .map_err(|e| CliError::config_validation(e.to_string()))?;
    }

    info!(
        source = %blueprint.source.name,
        kind = ?blueprint.source.kind,
        mode = ?blueprint.mode,
        sinks = blueprint.sinks.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        blueprint,
        max_records: (args.max_records > 0).then_some(args.max_records),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        drain_timeout: Duration::from_secs(args.drain_timeout),
        buffer_size: args.buffer_size,
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    };

    info!("Starting pipeline...");
    let stats = Pipeline::new(pipeline_config)
        .run(setup_shutdown_signal())
        .await
        .context("Pipeline execution failed")?;

    info!(
        records = stats.records_received,
        delivered = stats.delivered(),
        stop_reason = ?stats.stop_reason,
        duration_secs = stats.duration.as_secs_f64(),
        throughput = format!("{:.2}", stats.throughput()),
        "Pipeline completed"
    );
    stats.print_summary();

    info!("SinkNode finished");
    Ok(())
}

/// Replace the configured source with the one given on the command line
///
/// Returns whether anything changed.
fn apply_source_override(blueprint: &mut PipelineBlueprint, args: &RunArgs) -> bool {
    let source = &mut blueprint.source;
    if args.stdin {
        info!("Overriding source with stdin from CLI");
        source.kind = SourceKind::Stdin;
    } else if let Some(ref path) = args.file {
        info!(path = %path.display(), "Overriding source with file from CLI");
        source.kind = SourceKind::File;
        source.path = Some(path.clone());
    } else if let Some(ref addr) = args.tcp {
        info!(addr = %addr, "Overriding source with tcp from CLI");
        source.kind = SourceKind::Tcp;
        source.addr = Some(addr.clone());
    } else {
        return false;
    }
    true
}

/// Resolve on Ctrl+C or SIGTERM
///
/// A handler that cannot be installed never resolves; the pipeline then
/// stops on its other conditions only.
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &PipelineBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Source:");
    println!("  Name: {}", blueprint.source.name);
    match blueprint.source.kind {
        SourceKind::Stdin => println!("  Kind: stdin"),
        SourceKind::File => println!(
            "  Kind: file ({})",
            blueprint
                .source
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        ),
        SourceKind::Tcp => println!(
            "  Kind: tcp ({})",
            blueprint.source.addr.as_deref().unwrap_or_default()
        ),
    }

    match &blueprint.framing {
        FramingConfig::Delimited { start, stop, .. } => println!(
            "  Framing: delimited (start={:?}, stop={:?})",
            start.map(|d| d.as_char()),
            stop.as_char()
        ),
        FramingConfig::FixedLength { frame_len } => {
            println!("  Framing: fixed length ({} bytes)", frame_len)
        }
    }
    println!("  Decoder: {:?}", blueprint.decoder);
    println!("  Mode: {:?}", blueprint.mode);

    if let Some(ref aggregator) = blueprint.aggregator {
        println!("\nAggregator:");
        println!("  Id: {}", aggregator.id);
        println!("  Mode: {:?}", aggregator.mode);
        println!("  Flush period: {} ms", aggregator.flush_period_ms);
    }

    if !blueprint.sinks.is_empty() {
        println!("\nSinks ({}):", blueprint.sinks.len());
        for sink in &blueprint.sinks {
            println!(
                "  - {} ({:?}) route={}",
                sink.name,
                sink.sink_type,
                sink.route_id.as_deref().unwrap_or("*")
            );
        }
    }

    println!();
}
