//! # Integration Tests
//!
//! End-to-end checks across crates, no network peers required:
//! - config snapshot round trip
//! - byte source -> framing -> decoder -> router -> sinks
//! - discovery sightings -> aggregator -> device CSV
//! - pacing and retry through the router

#[cfg(test)]
mod support {
    use std::sync::{Arc, Mutex};

    use contracts::{ContractError, Deliver, FormattedOutput};
    use tokio::time::Instant;

    /// Delivery that records every attempt and fails the first `failures`
    #[derive(Clone, Default)]
    pub struct Recorder {
        pub calls: Arc<Mutex<Vec<(Instant, FormattedOutput)>>>,
        pub failures: usize,
    }

    impl Recorder {
        pub fn failing(failures: usize) -> Self {
            Self {
                failures,
                ..Default::default()
            }
        }

        pub fn outputs(&self) -> Vec<FormattedOutput> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(_, out)| out.clone())
                .collect()
        }

        pub fn times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    impl Deliver for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn deliver(&mut self, output: &FormattedOutput) -> Result<(), ContractError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((Instant::now(), output.clone()));
            if calls.len() <= self.failures {
                return Err(ContractError::delivery("recorder", "injected failure"));
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{ConfigVersion, DecoderConfig, FramingConfig, SinkType};

    const WEATHER: &str = r#"
[source]
name = "radio"
kind = "tcp"
addr = "127.0.0.1:7000"

[framing]
mode = "fixed_length"
frame_len = 23

[decoder]
kind = "walker"

[[sinks]]
name = "upload"
sink_type = "http"
route_id = "stalker3"
params = { url = "http://127.0.0.1:9/update" }

[sinks.delivery]
min_interval_ms = 15000
max_attempts = 5
failure_backoff_ms = 1000
"#;

    #[test]
    fn test_blueprint_survives_toml_round_trip() {
        let blueprint = ConfigLoader::load_from_str(WEATHER, ConfigFormat::Toml).unwrap();
        let rendered = ConfigLoader::to_toml(&blueprint).unwrap();
        let reloaded = ConfigLoader::load_from_str(&rendered, ConfigFormat::Toml).unwrap();

        assert_eq!(reloaded.version, ConfigVersion::V1);
        assert_eq!(reloaded.decoder, DecoderConfig::Walker);
        assert_eq!(reloaded.framing, FramingConfig::FixedLength { frame_len: 23 });
        assert_eq!(reloaded.sinks[0].sink_type, SinkType::Http);
        assert_eq!(reloaded.sinks[0].delivery, blueprint.sinks[0].delivery);
    }

    #[test]
    fn test_walker_width_mismatch_rejected() {
        let broken = WEATHER.replace("frame_len = 23", "frame_len = 24");
        let err = ConfigLoader::load_from_str(&broken, ConfigFormat::Toml).unwrap_err();
        assert!(err.to_string().contains("frame_len"));
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use aggregator::DeviceAggregator;
    use contracts::{
        AggregatorConfig, DecoderConfig, DeliveryPolicy, FormattedOutput, FramingConfig, Record,
        SinkConfig,
    };
    use dispatcher::{
        DeviceCsvFormatter, FieldMapFormatter, QueueConfig, RateLimitedSink, RoutePredicate,
        Router,
    };
    use ingestion::{build_decoder, IngestionPipeline, MemorySource};

    use crate::support::Recorder;

    fn pipeline(data: Vec<u8>, framing: FramingConfig, decoder: &DecoderConfig) -> IngestionPipeline {
        IngestionPipeline::new(
            Box::new(MemorySource::new("memory", data)),
            framing,
            build_decoder(decoder),
            16,
        )
    }

    fn walker_packet(station: u8, air_temp: u16, humidity: u16) -> Vec<u8> {
        let mut buf = vec![station];
        buf.extend_from_slice(&0u32.to_be_bytes());
        for v in [air_temp, 1800, 2575, 3000, humidity, 640, 55, 125] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        buf.push(87);
        buf.push(2);
        buf
    }

    fn file_sink(name: &str, route_id: Option<&str>, path: &std::path::Path) -> SinkConfig {
        let toml = format!(
            "name = \"{name}\"\nsink_type = \"file\"\nparams = {{ path = \"{}\" }}\n{}",
            path.display(),
            route_id
                .map(|id| format!("route_id = \"{id}\"\n"))
                .unwrap_or_default()
        );
        let mut config: SinkConfig = toml_sink(&toml);
        config.queue_capacity = 64;
        config
    }

    fn toml_sink(toml: &str) -> SinkConfig {
        let blueprint = config_loader::ConfigLoader::load_from_str(
            &format!("[source]\nkind = \"stdin\"\n\n[[sinks]]\n{toml}"),
            config_loader::ConfigFormat::Toml,
        )
        .unwrap();
        blueprint.sinks.into_iter().next().unwrap()
    }

    /// JSON lines -> router -> two file sinks, one filtered by id
    #[tokio::test]
    async fn test_json_lines_fan_out_to_files() {
        let dir = tempfile::tempdir().unwrap();
        let all_path = dir.path().join("all.jsonl");
        let s3_path = dir.path().join("stalker3.jsonl");

        let input = concat!(
            "{\"id\":\"stalker3\",\"air_temp\":21.5}\n",
            "{\"id\":\"stalker4\",\"air_temp\":19.0}\n",
            "not json\n",
            "{\"air_temp\":1.0}\n",
            "{\"id\":\"stalker3\",\"air_temp\":22.0}\n",
        );

        let router = Arc::new(
            Router::from_configs(&[
                file_sink("all", None, &all_path),
                file_sink("s3", Some("stalker3"), &s3_path),
            ])
            .unwrap(),
        );
        router.start().unwrap();

        let mut ingestion = pipeline(
            input.as_bytes().to_vec(),
            FramingConfig::default(),
            &DecoderConfig::Json,
        );
        let rx = ingestion.take_receiver().unwrap();
        ingestion.start().unwrap();

        let snapshot = tokio::time::timeout(Duration::from_secs(5), router.run(rx))
            .await
            .unwrap();

        assert_eq!(ingestion.metrics().snapshot().decode_errors, 1);
        assert_eq!(snapshot.routed, 3);
        assert_eq!(snapshot.unroutable, 1);

        let all = std::fs::read_to_string(&all_path).unwrap();
        let s3 = std::fs::read_to_string(&s3_path).unwrap();
        assert_eq!(all.lines().count(), 3);
        assert_eq!(s3.lines().count(), 2);
        for line in s3.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["id"], "stalker3");
        }
    }

    /// Binary weather packets -> walker decoder -> field-mapped upload form
    #[tokio::test]
    async fn test_walker_packets_to_field_map() {
        let mut data = walker_packet(3, 2150, 4512);
        data.extend(walker_packet(4, 1900, 5000));
        data.extend(walker_packet(3, 2200, 4600));

        let recorder = Recorder::default();
        let formatter = FieldMapFormatter::new(
            [("stalker3".to_string(), "KEY3".to_string())].into(),
            [
                ("air_temp".to_string(), "field1".to_string()),
                ("humidity".to_string(), "field5".to_string()),
            ]
            .into(),
            "api_key",
        );
        let sink = RateLimitedSink::new(
            "upload",
            Box::new(formatter),
            recorder.clone(),
            DeliveryPolicy::default(),
            QueueConfig::default(),
        );

        let router = Router::new();
        router
            .add(sink, RoutePredicate::from_route_id(Some("stalker3")))
            .unwrap();
        router.start().unwrap();

        let decoder = DecoderConfig::Walker;
        let framing = FramingConfig::FixedLength {
            frame_len: decoder.expected_width().unwrap(),
        };
        let mut ingestion = pipeline(data, framing, &decoder);
        let rx = ingestion.take_receiver().unwrap();
        ingestion.start().unwrap();

        let snapshot = tokio::time::timeout(Duration::from_secs(5), router.run(rx))
            .await
            .unwrap();

        assert_eq!(snapshot.routed, 3);
        assert_eq!(snapshot.unmatched, 1);

        let outputs = recorder.outputs();
        assert_eq!(
            outputs,
            vec![
                FormattedOutput::Form(vec![
                    ("api_key".into(), "KEY3".into()),
                    ("field1".into(), "21.5".into()),
                    ("field5".into(), "45.12".into()),
                ]),
                FormattedOutput::Form(vec![
                    ("api_key".into(), "KEY3".into()),
                    ("field1".into(), "22.0".into()),
                    ("field5".into(), "46.0".into()),
                ]),
            ]
        );
    }

    /// Sightings -> aggregator -> one batch -> device CSV rows
    #[tokio::test]
    async fn test_discovery_batch_to_device_csv() {
        let input = concat!(
            "{\"eui\":\"aa:bb:cc:00:00:01\",\"ssid\":\"home\"}\n",
            "{\"eui\":\"aa:bb:cc:00:00:02\",\"ssid\":null}\n",
            "{\"eui\":\"11:22:33:44:55:66\",\"ssid\":\"corp\",\"ap\":true}\n",
            "{\"eui\":\"AA-BB-CC-00-00-01\"}\n",
            "{\"ssid\":\"no identity\"}\n",
        );

        let recorder = Recorder::default();
        let router = Arc::new(Router::new());
        router
            .add(
                RateLimitedSink::new(
                    "devices",
                    Box::new(DeviceCsvFormatter::default()),
                    recorder.clone(),
                    DeliveryPolicy::default(),
                    QueueConfig::default(),
                ),
                RoutePredicate::from_route_id(Some("wifi")),
            )
            .unwrap();
        router.start().unwrap();

        let (router_tx, router_rx) = async_channel::bounded::<Record>(16);
        let router_task = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.run(router_rx).await })
        };

        let config = AggregatorConfig {
            flush_period_ms: 0,
            vendors: [("AA:BB:CC".to_string(), "Acme".to_string())].into(),
            ..Default::default()
        };
        let mut aggregator = DeviceAggregator::new(config, router_tx);
        aggregator.start().unwrap();

        let mut ingestion = pipeline(
            input.as_bytes().to_vec(),
            FramingConfig::default(),
            &DecoderConfig::Json,
        );
        let rx = ingestion.take_receiver().unwrap();
        ingestion.start().unwrap();

        let mut rejected = 0;
        while let Ok(record) = rx.recv().await {
            if aggregator.sight_record(&record).is_err() {
                rejected += 1;
            }
        }
        aggregator.shutdown().await;
        let stats = aggregator.stats().snapshot();
        drop(aggregator);

        let snapshot = tokio::time::timeout(Duration::from_secs(5), router_task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(rejected, 1);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.flushes, 1);
        assert_eq!(snapshot.routed, 1);

        let outputs = recorder.outputs();
        assert_eq!(outputs.len(), 1);
        let text = outputs[0].to_text();
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("AA-BB-CC-00-00-01,Acme,home,"));
        assert!(rows[1].starts_with("AA-BB-CC-00-00-02,Acme,,"));
    }
}

#[cfg(test)]
mod delivery_tests {
    use std::time::Duration;

    use contracts::{DeliveryPolicy, QueueFullPolicy, Record};
    use dispatcher::{JsonLineFormatter, QueueConfig, RateLimitedSink, RoutePredicate, Router};

    use crate::support::Recorder;

    fn paced(min_interval_ms: u64, max_attempts: u32, failure_backoff_ms: u64) -> DeliveryPolicy {
        DeliveryPolicy {
            min_interval_ms,
            max_attempts,
            failure_backoff_ms,
        }
    }

    /// A slow sink does not hold back a fast one
    #[tokio::test(start_paused = true)]
    async fn test_sinks_are_paced_independently() {
        let slow = Recorder::default();
        let fast = Recorder::default();

        let router = Router::new();
        for (name, recorder, interval) in [("slow", &slow, 1000), ("fast", &fast, 10)] {
            router
                .add(
                    RateLimitedSink::new(
                        name,
                        Box::new(JsonLineFormatter),
                        recorder.clone(),
                        paced(interval, 1, 1),
                        QueueConfig::default(),
                    ),
                    RoutePredicate::All,
                )
                .unwrap();
        }
        router.start().unwrap();

        let start = tokio::time::Instant::now();
        for i in 0..4 {
            assert_eq!(router.route(Record::with_id(format!("r{i}"))), 2);
        }
        router.drain().await;

        let slow_times = slow.times();
        let fast_times = fast.times();
        assert_eq!(slow_times.len(), 4);
        assert_eq!(fast_times.len(), 4);
        assert!(fast_times[3] - start < Duration::from_millis(100));
        assert!(slow_times[3] - start >= Duration::from_millis(3000));
    }

    /// Failures are retried after the backoff, then the ticket is dropped
    #[tokio::test(start_paused = true)]
    async fn test_retry_then_exhaust() {
        let recorder = Recorder::failing(4);
        let router = Router::new();
        router
            .add(
                RateLimitedSink::new(
                    "flaky",
                    Box::new(JsonLineFormatter),
                    recorder.clone(),
                    paced(0, 3, 50),
                    QueueConfig::default(),
                ),
                RoutePredicate::All,
            )
            .unwrap();
        router.start().unwrap();

        router.route(Record::with_id("first"));
        router.route(Record::with_id("second"));
        router.drain().await;

        let times = recorder.times();
        // first: 3 failed attempts; second: 1 failure, then success
        assert_eq!(times.len(), 5);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(50));
        }

        let metrics = router.metrics();
        let (_, flaky) = &metrics[0];
        assert_eq!(flaky.exhausted_count, 1);
        assert_eq!(flaky.delivered_count, 1);
        assert_eq!(flaky.failure_count, 4);
    }

    /// A full queue evicts the oldest ticket under drop-oldest
    #[tokio::test]
    async fn test_drop_oldest_before_start() {
        let recorder = Recorder::default();
        let sink = RateLimitedSink::new(
            "bounded",
            Box::new(JsonLineFormatter),
            recorder.clone(),
            DeliveryPolicy::default(),
            QueueConfig {
                capacity: 2,
                full_policy: QueueFullPolicy::DropOldest,
            },
        );

        for i in 0..4 {
            sink.enqueue(Record::with_id(format!("r{i}"))).unwrap();
        }
        assert_eq!(sink.queue_len(), 2);

        sink.start().unwrap();
        sink.shutdown().await;

        let delivered: Vec<String> = recorder.outputs().iter().map(|o| o.to_text()).collect();
        assert_eq!(delivered.len(), 2);
        assert!(delivered[0].contains("r2"));
        assert!(delivered[1].contains("r3"));
        assert_eq!(sink.metrics().snapshot().dropped_count, 2);
    }
}
