//! Error types for the HA message-queue client
//!
//! Two failure kinds are distinguished throughout the crate: configuration
//! errors are programmer-facing and raised synchronously to the caller, while
//! transport (I/O) errors are the resilient steady-state kind that the retry
//! path recovers from.

use thiserror::Error;

/// Main error type for HA broker client operations
#[derive(Debug, Error)]
pub enum FleetMqError {
    /// Malformed addressing input, endpoint immutability violation, priority
    /// position gap, unknown broker passed to close_one. Never retried.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// No connected broker available, or the underlying transport operation
    /// itself failed on every candidate.
    #[error("IO error: {message}")]
    Io { message: String },

    /// Packet could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialize(#[from] crate::serialize::SerializeError),

    /// Error surfaced by the underlying transport for a single broker
    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),
}

impl FleetMqError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a transport-level IO error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }
}

/// Result type for HA broker client operations
pub type Result<T> = std::result::Result<T, FleetMqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let error = FleetMqError::configuration("mismatched hosts and ports");
        assert_eq!(
            error.to_string(),
            "Configuration error: mismatched hosts and ports"
        );
        assert!(matches!(error, FleetMqError::Configuration { .. }));
    }

    #[test]
    fn test_io_error_display() {
        let error = FleetMqError::io("no connected brokers");
        assert_eq!(error.to_string(), "IO error: no connected brokers");
        assert!(matches!(error, FleetMqError::Io { .. }));
    }
}
