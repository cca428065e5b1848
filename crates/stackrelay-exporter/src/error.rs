//! Error types for the exporter.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use stackrelay_core::RelayError;
use stackrelay_monitoring::ClientError;
use thiserror::Error;

/// Result type alias for exporter operations.
pub type ExporterResult<T> = Result<T, ExporterError>;

/// Errors that can occur while running the exporter.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Failed to bind the scrape listener.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(std::net::SocketAddr, std::io::Error),

    /// The scrape server stopped with an error.
    #[error("server error: {0}")]
    Serve(String),

    /// The registry could not be encoded.
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] std::fmt::Error),

    /// The poll loop stopped, leaving the registry stale.
    #[error("poll loop stopped: {0}")]
    PollStopped(String),

    /// The monitoring client could not be created.
    #[error("monitoring client: {0}")]
    Client(#[from] ClientError),

    /// Engine error (configuration, plan, registration, I/O).
    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ExporterError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: "internal_error".to_string(),
            message: self.to_string(),
        };

        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"error":"internal_error","message":"failed to serialize error"}"#.to_string()
        });

        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "application/json")],
            json,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn relay_errors_are_transparent() {
        let err = ExporterError::from(RelayError::configuration("project id cannot be empty"));
        assert_eq!(
            err.to_string(),
            RelayError::configuration("project id cannot be empty").to_string()
        );
    }

    #[test]
    fn bind_failed_display() {
        let addr: std::net::SocketAddr = "0.0.0.0:8081".parse().unwrap();
        let err = ExporterError::BindFailed(
            addr,
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        );
        assert_eq!(err.to_string(), "failed to bind to 0.0.0.0:8081: address in use");
    }

    #[tokio::test]
    async fn encode_error_response() {
        let response = ExporterError::Encode(std::fmt::Error).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "internal_error");
        assert!(json["message"].as_str().unwrap().contains("encode"));
    }
}
