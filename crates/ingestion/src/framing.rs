//! Frame extraction
//!
//! Turns an unbounded byte stream into discrete frame payloads.
//!
//! Delimited framing is a two-state machine:
//!
//! ```text
//!   Idle ──(start byte, or any byte when start is unset)──> Recording
//!   Recording ──(stop byte: emit frame)──> Idle
//!   Recording ──(other byte: append)──> Recording
//! ```
//!
//! With no start delimiter the byte that opens a frame is itself payload and
//! is handled as in `Recording` (so a bare stop byte yields an empty frame).
//! An oversized frame is discarded; without a start delimiter the rest of it,
//! up to and including the next stop byte, is skipped as well.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use contracts::{is_retryable, ByteSource, Frame, FramingConfig};
use tracing::{debug, trace, warn};

use crate::config::IngestionMetrics;

/// Read buffer size for [`Frames`]
const READ_BUF_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy)]
enum Strategy {
    Delimited {
        start: Option<u8>,
        stop: u8,
        max_frame_len: Option<usize>,
    },
    FixedLength {
        frame_len: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Recording,
    /// Swallowing the tail of an oversized frame until the next stop byte
    Skipping,
}

/// Stateful frame scanner
///
/// Fed one byte at a time; knows nothing about where bytes come from.
pub struct FrameExtractor {
    source_name: String,
    strategy: Strategy,
    state: State,
    acc: BytesMut,
    seq: u64,
    metrics: Arc<IngestionMetrics>,
}

impl FrameExtractor {
    /// Create an extractor for the given framing
    pub fn new(source_name: impl Into<String>, framing: &FramingConfig) -> Self {
        let strategy = match *framing {
            FramingConfig::Delimited {
                start,
                stop,
                max_frame_len,
            } => Strategy::Delimited {
                start: start.map(|d| d.byte()),
                stop: stop.byte(),
                max_frame_len,
            },
            FramingConfig::FixedLength { frame_len } => Strategy::FixedLength {
                frame_len: frame_len.max(1),
            },
        };

        Self {
            source_name: source_name.into(),
            strategy,
            state: State::Idle,
            acc: BytesMut::new(),
            seq: 0,
            metrics: Arc::new(IngestionMetrics::new()),
        }
    }

    /// Share an existing metrics instance
    pub fn with_metrics(mut self, metrics: Arc<IngestionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Whether a frame is currently being accumulated
    pub fn is_recording(&self) -> bool {
        self.state == State::Recording
    }

    /// Frames emitted so far
    pub fn frames_emitted(&self) -> u64 {
        self.seq
    }

    /// Feed one byte; returns a frame when one completes
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.strategy {
            Strategy::Delimited {
                start,
                stop,
                max_frame_len,
            } => self.push_delimited(byte, start, stop, max_frame_len),
            Strategy::FixedLength { frame_len } => {
                self.acc.extend_from_slice(&[byte]);
                self.state = State::Recording;
                if self.acc.len() == frame_len {
                    Some(self.emit())
                } else {
                    None
                }
            }
        }
    }

    fn push_delimited(
        &mut self,
        byte: u8,
        start: Option<u8>,
        stop: u8,
        max_frame_len: Option<usize>,
    ) -> Option<Frame> {
        if self.state == State::Skipping {
            if byte == stop {
                trace!(source = %self.source_name, "oversized frame skipped");
                self.state = State::Idle;
            }
            return None;
        }

        if self.state == State::Idle {
            match start {
                Some(start) if byte == start => {
                    self.state = State::Recording;
                    self.acc.clear();
                    return None;
                }
                Some(_) => {
                    trace!(source = %self.source_name, byte, "discarding byte outside frame");
                    return None;
                }
                None => {
                    self.state = State::Recording;
                    self.acc.clear();
                }
            }
        }

        if byte == stop {
            return Some(self.emit());
        }

        self.acc.extend_from_slice(&[byte]);

        if let Some(max) = max_frame_len {
            if self.acc.len() > max {
                warn!(
                    source = %self.source_name,
                    max_frame_len = max,
                    "frame exceeds maximum length, discarding"
                );
                self.discard();
                if start.is_none() {
                    self.state = State::Skipping;
                }
            }
        }

        None
    }

    /// Source closed: drop whatever partial frame is pending
    ///
    /// Returns the number of bytes discarded (0 when idle).
    pub fn finish(&mut self) -> usize {
        let pending = self.acc.len();
        let truncated = match self.strategy {
            Strategy::Delimited { .. } => self.state == State::Recording,
            Strategy::FixedLength { .. } => pending > 0,
        };

        if truncated {
            warn!(
                source = %self.source_name,
                discarded_bytes = pending,
                "framing truncation: source closed mid-frame, partial frame discarded"
            );
            self.discard();
        }
        pending
    }

    fn emit(&mut self) -> Frame {
        self.seq += 1;
        self.state = State::Idle;
        self.metrics.record_frame();
        metrics::counter!("sinknode_frames_extracted_total", "source" => self.source_name.clone())
            .increment(1);
        Frame::new(self.seq, self.acc.split().freeze())
    }

    fn discard(&mut self) {
        self.acc.clear();
        self.state = State::Idle;
        self.metrics.record_truncated();
        metrics::counter!("sinknode_frames_truncated_total", "source" => self.source_name.clone())
            .increment(1);
    }
}

/// Lazy, unbounded sequence of frames read from a [`ByteSource`]
///
/// Ends when the source closes, errors fatally, or the stop flag is cleared.
/// To restart, build a new `Frames` over a new source.
pub struct Frames<S> {
    source: S,
    extractor: FrameExtractor,
    buf: Box<[u8]>,
    pos: usize,
    filled: usize,
    running: Option<Arc<AtomicBool>>,
    metrics: Arc<IngestionMetrics>,
    done: bool,
}

/// Build a frame sequence over `source`
pub fn extract<S: ByteSource>(source: S, framing: &FramingConfig) -> Frames<S> {
    let metrics = Arc::new(IngestionMetrics::new());
    let extractor = FrameExtractor::new(source.name(), framing).with_metrics(metrics.clone());
    Frames {
        source,
        extractor,
        buf: vec![0u8; READ_BUF_SIZE].into_boxed_slice(),
        pos: 0,
        filled: 0,
        running: None,
        metrics,
        done: false,
    }
}

impl<S: ByteSource> Frames<S> {
    /// Stop once `running` is cleared (checked between reads)
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    /// Share an existing metrics instance
    pub fn with_metrics(mut self, metrics: Arc<IngestionMetrics>) -> Self {
        self.extractor.metrics = metrics.clone();
        self.metrics = metrics;
        self
    }

    fn stop_requested(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.load(Ordering::Relaxed))
    }

    fn close(&mut self) {
        self.extractor.finish();
        self.done = true;
    }
}

impl<S: ByteSource> Iterator for Frames<S> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.done {
            return None;
        }

        loop {
            while self.pos < self.filled {
                let byte = self.buf[self.pos];
                self.pos += 1;
                if let Some(frame) = self.extractor.push(byte) {
                    return Some(frame);
                }
            }

            if self.stop_requested() {
                debug!(source = %self.source.name(), "stop requested, ending frame sequence");
                self.close();
                return None;
            }

            match self.source.read_bytes(&mut self.buf) {
                Ok(0) => {
                    debug!(source = %self.source.name(), "source closed");
                    self.close();
                    return None;
                }
                Ok(n) => {
                    self.pos = 0;
                    self.filled = n;
                    self.metrics.record_bytes(n);
                }
                Err(e) if is_retryable(&e) => continue,
                Err(e) => {
                    warn!(source = %self.source.name(), error = %e, "source read failed, closing");
                    self.close();
                    return None;
                }
            }
        }
    }
}
