//! # Ingestion Pipeline
//!
//! Byte stream ingestion module.
//!
//! Responsibilities:
//! - Open byte sources (stdin, file, TCP, in-memory)
//! - Cut the stream into frames (`FrameExtractor`)
//! - Decode frames into `Record`s (`RecordDecoder`), dropping bad ones
//! - Send records downstream via async-channel
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{build_decoder, open_source, IngestionPipeline};
//!
//! let source = open_source(&blueprint.source)?;
//! let decoder = build_decoder(&blueprint.decoder);
//! let mut pipeline = IngestionPipeline::new(source, blueprint.framing.clone(), decoder, 100);
//!
//! let rx = pipeline.take_receiver().unwrap();
//! pipeline.start()?;
//! while let Ok(record) = rx.recv().await {
//!     router.route(record);
//! }
//! ```

mod config;
mod decoder;
mod error;
mod framing;
mod pipeline;
mod sources;
mod struct_decoder;

// Re-exports
pub use config::{IngestionMetrics, MetricsSnapshot};
pub use decoder::{build_decoder, JsonDecoder, RecordDecoder};
pub use error::{DecodeError, IngestionError, Result};
pub use framing::{extract, FrameExtractor, Frames};
pub use pipeline::IngestionPipeline;
pub use sources::{
    open_source, FileSource, MemorySource, ReaderSource, StdinSource, TcpSource,
};
pub use struct_decoder::StructDecoder;
