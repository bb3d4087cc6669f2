//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Sink name already registered
    #[error("sink '{name}' is already registered")]
    DuplicateSink { name: String },

    /// Queue full - record rejected
    #[error("queue full for sink '{sink_name}', record rejected")]
    QueueFull { sink_name: String },

    /// Delivery loop already started
    #[error("sink '{sink_name}' already started")]
    AlreadyStarted { sink_name: String },

    /// Router is not running
    #[error("router is not running")]
    NotRunning,

    /// Sink intake closed (stopped or draining)
    #[error("sink '{sink_name}' is not accepting records")]
    Closed { sink_name: String },

    /// Error from a collaborator contract
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
