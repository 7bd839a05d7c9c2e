//! Transport Error Types
//!
//! Errors raised at the cluster-client boundary. Failures while setting up
//! listeners or reading configuration are fatal at startup and propagate to
//! the caller; failures of steady-state best-effort sends are logged by the
//! caller and dropped.

use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// A message could not be handed to the transport
    #[error("Send error: {destination}: {message}")]
    Send {
        destination: String,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A listener or subscription could not be registered
    #[error("Listener setup error: {channel}: {message}")]
    ListenerSetup { channel: String, message: String },

    /// Frame encoding or decoding failed
    #[error("Codec error: {message}")]
    Codec {
        message: String,
        source: serde_json::Error,
    },

    /// The client was closed
    #[error("Transport closed")]
    Closed,

    /// The client has not been connected yet
    #[error("Transport not connected: {operation}")]
    NotConnected { operation: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a send error
    pub fn send(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Send {
            destination: destination.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a send error with source
    pub fn send_with_source(
        destination: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Send {
            destination: destination.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a listener setup error
    pub fn listener_setup(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ListenerSetup {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create a codec error
    pub fn codec(message: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Codec {
            message: message.into(),
            source,
        }
    }

    pub fn not_connected(operation: impl Into<String>) -> Self {
        Self::NotConnected {
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error for a specific field
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Whether the error should abort startup instead of being logged
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::ListenerSetup { .. } | TransportError::Configuration { .. }
        )
    }
}
