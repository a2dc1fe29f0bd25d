//! Error types for webhook delivery operations.
//!
//! Covers everything a delivery attempt can run into: transport
//! failures, timeouts, rejecting endpoints, and storage trouble. Every
//! failed attempt drives the retry counter the same way regardless of
//! variant; the distinction exists for logs and for deciding whether a
//! retry can help at all.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for webhook delivery operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Endpoint responded with a status outside the 2xx range.
    #[error("endpoint rejected delivery: HTTP {status_code}")]
    HttpStatus {
        /// HTTP status code returned by the endpoint
        status_code: u16,
    },

    /// Database operation failed during delivery.
    #[error("database error: {message}")]
    Database {
        /// Database error message
        message: String,
    },

    /// Invalid client or request configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Graceful shutdown did not finish within its deadline.
    #[error("scheduler shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// How long shutdown was allowed to take
        timeout: Duration,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates an error for a non-2xx HTTP response.
    pub fn http_status(status_code: u16) -> Self {
        Self::HttpStatus { status_code }
    }

    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Every HTTP status counts as retryable: the attempt budget, not
    /// the status class, bounds how long a broken endpoint is retried.
    /// Only configuration errors are hopeless.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::HttpStatus { .. }
            | Self::Database { .. } => true,

            Self::Configuration { .. } | Self::ShutdownTimeout { .. } => false,
        }
    }

    /// HTTP status of the failed attempt, when the endpoint responded.
    pub fn response_status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status_code } => Some(*status_code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DeliveryError::network("connection refused").is_retryable());
        assert!(DeliveryError::timeout(10).is_retryable());
        assert!(DeliveryError::database("connection lost").is_retryable());

        // Rejections are retried too: a 404 today may be a 200 after the
        // receiver finishes deploying
        assert!(DeliveryError::http_status(404).is_retryable());
        assert!(DeliveryError::http_status(500).is_retryable());

        assert!(!DeliveryError::configuration("invalid URL").is_retryable());
    }

    #[test]
    fn response_status_extracted_from_http_failures() {
        assert_eq!(DeliveryError::http_status(503).response_status(), Some(503));
        assert_eq!(DeliveryError::timeout(10).response_status(), None);
    }

    #[test]
    fn error_display_format() {
        assert_eq!(DeliveryError::timeout(10).to_string(), "request timeout after 10s");
        assert_eq!(
            DeliveryError::http_status(500).to_string(),
            "endpoint rejected delivery: HTTP 500"
        );
    }
}
