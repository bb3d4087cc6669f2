//! Layered error definitions
//!
//! Categorized by source: config / source / routing / format / delivery

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Source Errors =====
    /// Byte source could not be opened (fatal at startup)
    #[error("source '{source_name}' unavailable: {message}")]
    SourceUnavailable {
        source_name: String,
        message: String,
    },

    // ===== Routing Errors =====
    /// Record cannot be routed (missing id, or not a JSON object)
    #[error("unroutable record: {message}")]
    Unroutable { message: String },

    // ===== Format Errors =====
    /// Formatter could not render a record
    #[error("formatter '{formatter}' failed: {message}")]
    Format { formatter: String, message: String },

    // ===== Delivery Errors =====
    /// Delivery attempt failed
    #[error("sink '{sink_name}' delivery failed: {message}")]
    Delivery { sink_name: String, message: String },

    /// Delivery transport could not be reached
    #[error("sink '{sink_name}' connection error: {message}")]
    DeliveryConnection { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create source unavailable error
    pub fn source_unavailable(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create unroutable record error
    pub fn unroutable(message: impl Into<String>) -> Self {
        Self::Unroutable {
            message: message.into(),
        }
    }

    /// Create formatter error
    pub fn format(formatter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Format {
            formatter: formatter.into(),
            message: message.into(),
        }
    }

    /// Create delivery error
    pub fn delivery(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delivery {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Create delivery connection error
    pub fn delivery_connection(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeliveryConnection {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }
}
