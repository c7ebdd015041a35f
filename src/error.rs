//! Error types for the booking service
//!
//! Fallible operations return `anyhow::Result`; the failures the service
//! reasons about are variants of [`BookingError`].

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific booking scenarios
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Session oracle unavailable: {message}")]
    OracleUnavailable { message: String },

    #[error("Session start failed: {message}")]
    SessionStartFailed { message: String },

    #[error("Protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    #[error("Booking service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Invalid match type: {value}")]
    InvalidMatchType { value: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl BookingError {
    /// Whether this error must stop the service rather than be logged and skipped
    pub fn is_fatal(&self) -> bool {
        matches!(self, BookingError::ProtocolViolation { .. })
    }
}
