//! Error types for the monitoring client.

use stackrelay_core::RelayError;
use thiserror::Error;

/// Errors raised while talking to the Cloud Monitoring API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client configuration is unusable.
    #[error("invalid client configuration: {0}")]
    Config(String),

    /// A request argument was rejected before sending.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transport-level failure (connect, timeout, TLS, body read).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error body.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    /// No access token could be obtained.
    #[error("credentials error: {0}")]
    Credentials(String),
}

impl ClientError {
    /// Converts into the engine's error type, tagging the failed operation.
    pub fn into_relay(self, operation: &str) -> RelayError {
        RelayError::remote(operation, self.to_string())
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
