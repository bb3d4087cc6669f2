//! Pipeline orchestrator - wires source, ingestion, aggregator, router and sinks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use aggregator::DeviceAggregator;
use anyhow::{Context, Result};
use contracts::{PipelineBlueprint, Record};
use dispatcher::Router;
use ingestion::IngestionPipeline;
use observability::{record_record_received, record_sink_snapshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::stats::{PipelineStats, StopReason};
use crate::error::CliError;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Validated pipeline blueprint
    pub blueprint: PipelineBlueprint,

    /// Maximum number of records to ingest (None = unlimited)
    pub max_records: Option<u64>,

    /// Pipeline timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Upper bound on the graceful drain after the record loop ends
    pub drain_timeout: Duration,

    /// Channel buffer size
    pub buffer_size: usize,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until the source closes, a limit is hit, or `shutdown` resolves
    ///
    /// The source is opened first; failing to open it is the only fatal
    /// runtime error. Every other problem is logged and counted.
    pub async fn run<F>(self, shutdown: F) -> Result<PipelineStats>
    where
        F: Future<Output = ()>,
    {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;
        let buffer_size = self.config.buffer_size.max(1);

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        // Source first: nothing else is built if it is unavailable
        let source = ingestion::open_source(&blueprint.source)
            .map_err(|e| CliError::source_unavailable(e.to_string()))?;
        let decoder = ingestion::build_decoder(&blueprint.decoder);
        info!(
            source = %blueprint.source.name,
            kind = ?blueprint.source.kind,
            decoder = decoder.name(),
            "Source opened"
        );

        // Router and sinks
        if blueprint.sinks.is_empty() {
            warn!("No sinks configured - records will be dropped");
        }
        let router = Arc::new(
            Router::from_configs(&blueprint.sinks)
                .map_err(|e| CliError::pipeline_execution(e.to_string()))?,
        );
        router
            .start()
            .map_err(|e| CliError::pipeline_execution(e.to_string()))?;

        let (router_tx, router_rx) = async_channel::bounded::<Record>(buffer_size);
        let router_task = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.run(router_rx).await })
        };
        info!(sinks = blueprint.sinks.len(), "Router started");

        // Aggregator (discovery mode only)
        let mut aggregator = match (&blueprint.aggregator, blueprint.is_discovery()) {
            (Some(config), true) => {
                let mut aggregator = DeviceAggregator::new(config.clone(), router_tx.clone());
                aggregator
                    .start()
                    .map_err(|e| CliError::pipeline_execution(e.to_string()))?;
                Some(aggregator)
            }
            (None, true) => {
                return Err(CliError::config_validation(
                    "discovery mode requires an [aggregator] section",
                )
                .into())
            }
            _ => None,
        };

        // Ingestion
        let mut ingestion = IngestionPipeline::new(
            source,
            blueprint.framing.clone(),
            decoder,
            buffer_size,
        );
        let records = ingestion
            .take_receiver()
            .context("Failed to get ingestion receiver")?;
        ingestion.start().context("Failed to start ingestion")?;

        info!(
            max_records = ?self.config.max_records,
            timeout = ?self.config.timeout,
            mode = ?blueprint.mode,
            "Pipeline running"
        );

        let mut stats = PipelineStats::default();
        let deadline = self.config.timeout.map(|t| start_time + t);
        let mut last_record: Option<Instant> = None;
        tokio::pin!(shutdown);

        loop {
            let record = tokio::select! {
                record = records.recv() => match record {
                    Ok(record) => record,
                    Err(_) => {
                        info!("Source closed");
                        stats.stop_reason = StopReason::SourceClosed;
                        break;
                    }
                },
                _ = &mut shutdown => {
                    warn!("Received shutdown signal, stopping pipeline...");
                    stats.stop_reason = StopReason::Signal;
                    break;
                }
                _ = sleep_until(deadline) => {
                    warn!(timeout = ?self.config.timeout, "Pipeline timed out");
                    stats.stop_reason = StopReason::Timeout;
                    break;
                }
            };

            let now = Instant::now();
            stats.records_received += 1;
            stats
                .record_metrics
                .update(&record, last_record.map(|prev| now - prev));
            last_record = Some(now);
            record_record_received(record.id());

            match &aggregator {
                Some(aggregator) => {
                    if let Err(e) = aggregator.sight_record(&record) {
                        stats.sightings_rejected += 1;
                        warn!(error = %e, "Sighting rejected");
                    }
                }
                None => {
                    if router_tx.send(record).await.is_err() {
                        warn!("Router channel closed");
                        stats.stop_reason = StopReason::RouterClosed;
                        break;
                    }
                }
            }

            if let Some(max) = self.config.max_records {
                if stats.records_received >= max {
                    info!(records = stats.records_received, "Reached max records limit");
                    stats.stop_reason = StopReason::MaxRecords;
                    break;
                }
            }
        }

        // Shutdown: stop reading, flush the aggregator, then drain sinks
        info!("Shutting down pipeline...");
        ingestion.stop();
        drop(records);
        stats.ingestion = ingestion.metrics().snapshot();

        if let Some(aggregator) = aggregator.as_mut() {
            aggregator.shutdown().await;
            stats.aggregator = Some(aggregator.stats().snapshot());
        }
        drop(aggregator);
        drop(router_tx);

        let drain = tokio::time::timeout(self.config.drain_timeout, router_task);
        match drain.await {
            Ok(Ok(snapshot)) => debug!(routed = snapshot.routed, "Router drained"),
            Ok(Err(e)) => warn!(error = %e, "Router task failed"),
            Err(_) => {
                warn!(
                    timeout = ?self.config.drain_timeout,
                    "Drain timed out, stopping sinks with records still queued"
                );
                router.stop();
                router.join().await;
            }
        }

        stats.router = router.stats();
        stats.sinks = router.metrics();
        for (name, sink) in &stats.sinks {
            record_sink_snapshot(
                name,
                sink.queue_len,
                sink.delivered_count,
                sink.failure_count,
                sink.dropped_count,
            );
        }
        stats.duration = start_time.elapsed();

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            records = stats.records_received,
            throughput = format!("{:.2}", stats.throughput()),
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{SinkConfig, SinkType, SourceConfig, SourceKind};
    use std::collections::HashMap;
    use std::io::Write;

    fn blueprint(input: &std::path::Path, output: &std::path::Path) -> PipelineBlueprint {
        let toml = format!(
            r#"
[source]
kind = "file"
path = "{}"

[[sinks]]
name = "out"
sink_type = "file"
params = {{ path = "{}" }}
"#,
            input.display(),
            output.display()
        );
        config_loader::ConfigLoader::load_from_str(&toml, config_loader::ConfigFormat::Toml)
            .unwrap()
    }

    fn config(blueprint: PipelineBlueprint) -> PipelineConfig {
        PipelineConfig {
            blueprint,
            max_records: None,
            timeout: Some(Duration::from_secs(10)),
            drain_timeout: Duration::from_secs(5),
            buffer_size: 16,
            metrics_port: None,
        }
    }

    #[tokio::test]
    async fn test_file_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out.jsonl");
        let mut file = std::fs::File::create(&input).unwrap();
        writeln!(file, r#"{{"id":"a","v":1}}"#).unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file, r#"{{"id":"b","v":2}}"#).unwrap();
        drop(file);

        let stats = Pipeline::new(config(blueprint(&input, &output)))
            .run(std::future::pending())
            .await
            .unwrap();

        assert_eq!(stats.stop_reason, StopReason::SourceClosed);
        assert_eq!(stats.records_received, 2);
        assert_eq!(stats.ingestion.decode_errors, 1);
        assert_eq!(stats.delivered(), 2);

        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_max_records() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jsonl");
        let output = dir.path().join("out.jsonl");
        let lines: String = (0..20).map(|i| format!("{{\"id\":\"r{i}\"}}\n")).collect();
        std::fs::write(&input, lines).unwrap();

        let mut config = config(blueprint(&input, &output));
        config.max_records = Some(5);
        let stats = Pipeline::new(config).run(std::future::pending()).await.unwrap();

        assert_eq!(stats.stop_reason, StopReason::MaxRecords);
        assert_eq!(stats.records_received, 5);
        assert_eq!(stats.delivered(), 5);
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal() {
        let blueprint = PipelineBlueprint {
            source: SourceConfig {
                name: "missing".into(),
                kind: SourceKind::File,
                path: Some("/nonexistent/sinknode.bin".into()),
                addr: None,
                read_timeout_ms: 100,
            },
            sinks: vec![SinkConfig {
                name: "log".into(),
                sink_type: SinkType::Log,
                route_id: None,
                queue_capacity: 10,
                queue_full_policy: Default::default(),
                delivery: Default::default(),
                format: Default::default(),
                params: HashMap::new(),
            }],
            ..blueprint(
                std::path::Path::new("/tmp/unused"),
                std::path::Path::new("/tmp/unused"),
            )
        };

        let err = Pipeline::new(config(blueprint))
            .run(std::future::pending())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Source unavailable"));
    }
}
