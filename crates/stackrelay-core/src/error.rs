//! Error types for the stackrelay-core crate.

use thiserror::Error;

/// Errors that can occur while planning, polling and exposing metrics.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A required startup parameter is missing or invalid.
    #[error("configuration error: {reason}")]
    Configuration {
        /// The reason the configuration was rejected.
        reason: String,
    },

    /// A plan entry could not be split into metric type and schedule.
    #[error("malformed plan entry '{entry}': {reason}")]
    MalformedEntry {
        /// The raw entry as supplied by the user.
        entry: String,
        /// The reason the entry is malformed.
        reason: String,
    },

    /// A schedule expression could not be parsed or never fires.
    #[error("invalid schedule '{expr}': {reason}")]
    InvalidSchedule {
        /// The offending expression.
        expr: String,
        /// The reason the expression is invalid.
        reason: String,
    },

    /// A metric type does not have the `domain/path` structure needed to derive a name.
    #[error("invalid metric type '{metric_type}': {reason}")]
    InvalidMetricType {
        /// The offending metric type.
        metric_type: String,
        /// The reason the metric type is invalid.
        reason: String,
    },

    /// A time window whose start is not strictly before its end.
    #[error("invalid window: start={start}, end={end}")]
    InvalidWindow {
        /// Window start, RFC 3339.
        start: String,
        /// Window end, RFC 3339.
        end: String,
    },

    /// A schedule fires less than a minute after "now", so the derived window is empty.
    #[error("degenerate window for schedule '{expr}': next fire is {elapsed_secs}s away")]
    DegenerateWindow {
        /// The schedule expression.
        expr: String,
        /// Seconds until the next fire.
        elapsed_secs: i64,
    },

    /// The remote monitoring backend failed.
    #[error("remote api error during {operation}: {reason}")]
    RemoteApi {
        /// The backend operation that failed.
        operation: String,
        /// The reason the call failed.
        reason: String,
    },

    /// A collector key was registered twice with a different shape or label schema.
    #[error("registration conflict for {name} ({resource_type}): {reason}")]
    RegistrationConflict {
        /// The derived metric name.
        name: String,
        /// The resource type.
        resource_type: String,
        /// What differs between the two registrations.
        reason: String,
    },

    /// File creation or write failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Shorthand for a [`RelayError::Configuration`].
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`RelayError::RemoteApi`].
    pub fn remote(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RemoteApi {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for stackrelay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
