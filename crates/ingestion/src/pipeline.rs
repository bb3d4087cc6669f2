//! Ingestion Pipeline main entry
//!
//! One extractor worker per source: a dedicated OS thread reads bytes, cuts
//! frames, decodes them and hands records downstream over a bounded channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use async_channel::{bounded, Receiver, Sender};
use contracts::{ByteSource, FramingConfig, Record};
use tracing::{debug, info, instrument, warn};

use crate::config::IngestionMetrics;
use crate::decoder::RecordDecoder;
use crate::error::{IngestionError, Result};
use crate::framing::{extract, Frames};

/// Ingestion Pipeline
///
/// Nothing is read until [`IngestionPipeline::start`] is called. The record
/// receiver closes once the worker ends (source closed, stopped, or the
/// receiver side went away).
pub struct IngestionPipeline {
    source_name: String,
    source: Option<Box<dyn ByteSource>>,
    framing: FramingConfig,
    decoder: Arc<dyn RecordDecoder>,
    metrics: Arc<IngestionMetrics>,
    tx: Option<Sender<Record>>,
    rx: Option<Receiver<Record>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl IngestionPipeline {
    /// Create new Ingestion Pipeline
    ///
    /// # Arguments
    /// * `source` - Opened byte source
    /// * `framing` - Frame extraction strategy
    /// * `decoder` - Frame decoder
    /// * `channel_capacity` - Record channel capacity
    pub fn new(
        source: Box<dyn ByteSource>,
        framing: FramingConfig,
        decoder: Box<dyn RecordDecoder>,
        channel_capacity: usize,
    ) -> Self {
        let (tx, rx) = bounded(channel_capacity.max(1));

        Self {
            source_name: source.name().to_string(),
            source: Some(source),
            framing,
            decoder: Arc::from(decoder),
            metrics: Arc::new(IngestionMetrics::new()),
            tx: Some(tx),
            rx: Some(rx),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Spawn the extractor worker
    ///
    /// # Errors
    /// `AlreadyStarted` on a second call: the source is consumed by the first.
    #[instrument(name = "ingestion_start", skip(self), fields(source = %self.source_name))]
    pub fn start(&mut self) -> Result<()> {
        let (Some(source), Some(tx)) = (self.source.take(), self.tx.take()) else {
            return Err(IngestionError::AlreadyStarted {
                source_name: self.source_name.clone(),
            });
        };

        self.running.store(true, Ordering::SeqCst);

        let frames = extract(source, &self.framing)
            .with_running_flag(self.running.clone())
            .with_metrics(self.metrics.clone());
        let decoder = self.decoder.clone();
        let metrics = self.metrics.clone();
        let running = self.running.clone();
        let source_name = self.source_name.clone();

        let handle = std::thread::Builder::new()
            .name(format!("extract-{}", self.source_name))
            .spawn(move || {
                run_worker(frames, decoder.as_ref(), &tx, &metrics, &source_name);
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                IngestionError::SpawnFailed {
                    source_name: self.source_name.clone(),
                    message: e.to_string(),
                }
            })?;

        info!(decoder = %self.decoder.name(), "extractor worker started");
        self.worker = Some(handle);
        Ok(())
    }

    /// Ask the worker to stop
    ///
    /// Cooperative: noticed between reads. Sources that block without a read
    /// timeout (stdin) end at their next read.
    #[instrument(name = "ingestion_stop", skip(self), fields(source = %self.source_name))]
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!("stop requested");
        }
    }

    /// Whether the worker is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Get record stream receiver
    ///
    /// Note: Can only be called once, subsequent calls return None
    pub fn take_receiver(&mut self) -> Option<Receiver<Record>> {
        self.rx.take()
    }

    /// Get metrics reference
    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        self.metrics.clone()
    }

    /// Source name
    pub fn source_name(&self) -> &str {
        &self.source_name
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<S: ByteSource>(
    frames: Frames<S>,
    decoder: &dyn RecordDecoder,
    tx: &Sender<Record>,
    metrics: &IngestionMetrics,
    source_name: &str,
) {
    for frame in frames {
        match decoder.decode(&frame) {
            Ok(record) => {
                metrics.record_decoded();
                if tx.send_blocking(record).is_err() {
                    debug!(source = %source_name, "record receiver dropped, stopping");
                    break;
                }
            }
            Err(e) => {
                metrics.record_decode_error();
                metrics::counter!(
                    "sinknode_decode_errors_total",
                    "source" => source_name.to_string(),
                    "kind" => e.kind()
                )
                .increment(1);
                warn!(
                    source = %source_name,
                    seq = frame.seq,
                    decoder = %decoder.name(),
                    error = %e,
                    "dropping undecodable frame"
                );
            }
        }
    }

    let snapshot = metrics.snapshot();
    info!(
        source = %source_name,
        frames = snapshot.frames_extracted,
        records = snapshot.records_decoded,
        decode_errors = snapshot.decode_errors,
        truncated = snapshot.truncated_frames,
        "extractor worker finished"
    );
}
