//! Ingestion error types

use thiserror::Error;

/// Per-frame decode failure
///
/// Never stops the frame sequence: the frame is logged and discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// Frame content is not a valid record
    #[error("malformed frame: {message}")]
    Malformed {
        /// What was wrong
        message: String,
    },

    /// Fixed-width frame has the wrong size
    #[error("wrong frame length: expected {expected} bytes, got {actual}")]
    WrongLength {
        /// Layout width
        expected: usize,
        /// Actual frame length
        actual: usize,
    },
}

impl DecodeError {
    /// Create malformed frame error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed",
            Self::WrongLength { .. } => "wrong_length",
        }
    }
}

/// Ingestion error
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Pipeline was already started (the source is consumed by the first start)
    #[error("ingestion for source {source_name} already started")]
    AlreadyStarted {
        /// Source name
        source_name: String,
    },

    /// Worker thread could not be spawned
    #[error("failed to spawn extractor worker for {source_name}: {message}")]
    SpawnFailed {
        /// Source name
        source_name: String,
        /// Error message
        message: String,
    },
}

/// Ingestion Result type alias
pub type Result<T> = std::result::Result<T, IngestionError>;
