//! Aggregator error types

use thiserror::Error;

/// Aggregator error
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// Worker not started yet
    #[error("aggregator {id} is not started")]
    NotStarted {
        /// Aggregator id
        id: String,
    },

    /// Worker already started
    #[error("aggregator {id} is already started")]
    AlreadyStarted {
        /// Aggregator id
        id: String,
    },

    /// Worker stopped, no further commands accepted
    #[error("aggregator {id} is stopped")]
    Stopped {
        /// Aggregator id
        id: String,
    },

    /// Command queue full, sighting rejected
    #[error("aggregator {id} command queue is full")]
    QueueFull {
        /// Aggregator id
        id: String,
    },

    /// Record is not a usable sighting
    #[error("invalid sighting: {message}")]
    InvalidSighting {
        /// Error message
        message: String,
    },
}

/// Aggregator Result type alias
pub type Result<T> = std::result::Result<T, AggregatorError>;
