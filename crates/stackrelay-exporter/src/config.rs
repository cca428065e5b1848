//! Exporter configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use stackrelay_core::{MetricSpec, RelayError, Result, normalize};
use stackrelay_monitoring::{ClientConfig, Credentials, DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT};

use crate::poll::DEFAULT_POLL_INTERVAL;
use crate::registry::DEFAULT_PREFIX;
use crate::snapshot::validate_output_dir;

/// Default scrape port.
pub const DEFAULT_LISTEN_PORT: u16 = 8081;

/// Default scrape path.
pub const DEFAULT_HANDLER_PATH: &str = "/stackmetrics";

/// Path of the liveness endpoint; the scrape path may not shadow it.
pub const HEALTH_PATH: &str = "/health";

const HANDLER_PATH_PATTERN: &str = r"^/[a-z]+$";
const NAMESPACE_PATTERN: &str = r"^[a-zA-Z_][a-zA-Z0-9_]*$";

/// How fetched series are republished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputMode {
    /// Newline-delimited JSON files, one per metric per window.
    #[default]
    Json,
    /// A Prometheus scrape endpoint.
    Prometheus,
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Prometheus => f.write_str("prometheus"),
        }
    }
}

/// Configuration for an exporter run.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Project whose metrics are read.
    pub project_id: String,
    /// Raw `metricType[|schedule]` entries.
    pub metric_entries: Vec<String>,
    /// Output mode.
    pub output: OutputMode,
    /// Directory for JSON snapshots.
    pub output_path: Option<PathBuf>,
    /// Port of the scrape server.
    pub listen_port: u16,
    /// Path of the scrape endpoint.
    pub handler_path: String,
    /// Tick of the continuous poll loop.
    pub poll_interval: Duration,
    /// Prefix of every exposed metric name.
    pub namespace: String,
    /// Cloud Monitoring API endpoint.
    pub api_endpoint: String,
    /// Fixed bearer token; the metadata server is used when absent.
    pub access_token: Option<String>,
    /// Per-request timeout for API calls.
    pub request_timeout: Duration,
}

impl ExporterConfig {
    /// Creates a configuration with defaults for everything but the project.
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            metric_entries: Vec::new(),
            output: OutputMode::default(),
            output_path: None,
            listen_port: DEFAULT_LISTEN_PORT,
            handler_path: DEFAULT_HANDLER_PATH.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            namespace: DEFAULT_PREFIX.to_string(),
            api_endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Adds a metric entry.
    #[must_use]
    pub fn with_metric(mut self, entry: impl Into<String>) -> Self {
        self.metric_entries.push(entry.into());
        self
    }

    /// Sets the output mode.
    #[must_use]
    pub const fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Sets the snapshot directory.
    #[must_use]
    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Sets the scrape port.
    #[must_use]
    pub const fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Sets the scrape path.
    #[must_use]
    pub fn with_handler_path(mut self, path: impl Into<String>) -> Self {
        self.handler_path = path.into();
        self
    }

    /// Sets the poll tick.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the metric name prefix.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = endpoint.into();
        self
    }

    /// Sets a fixed access token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Sets the API request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Address the scrape server binds to.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.listen_port))
    }

    /// Normalizes the metric entries into a plan.
    ///
    /// # Errors
    ///
    /// Returns the first malformed entry or invalid schedule.
    pub fn plan(&self) -> Result<Vec<MetricSpec>> {
        normalize(&self.metric_entries)
    }

    /// Configuration for the monitoring client.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.project_id.clone())
            .with_endpoint(self.api_endpoint.clone())
            .with_credentials(Credentials::from_token(self.access_token.clone()))
            .with_request_timeout(self.request_timeout)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Configuration` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(RelayError::configuration("project id cannot be empty"));
        }
        if self.metric_entries.iter().all(|e| e.trim().is_empty()) {
            return Err(RelayError::configuration(
                "at least one metric type is required",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(RelayError::configuration("request timeout must be positive"));
        }

        match self.output {
            OutputMode::Json => {
                let dir = self.output_path.as_deref().ok_or_else(|| {
                    RelayError::configuration("an output path is required for json output")
                })?;
                validate_output_dir(dir)?;
            }
            OutputMode::Prometheus => {
                if self.listen_port == 0 {
                    return Err(RelayError::configuration("listen port must be positive"));
                }
                if !matches_pattern(HANDLER_PATH_PATTERN, &self.handler_path)? {
                    return Err(RelayError::configuration(format!(
                        "handler path '{}' must match {HANDLER_PATH_PATTERN}",
                        self.handler_path
                    )));
                }
                if self.handler_path == HEALTH_PATH {
                    return Err(RelayError::configuration(format!(
                        "handler path cannot be {HEALTH_PATH}"
                    )));
                }
                if self.poll_interval.is_zero() {
                    return Err(RelayError::configuration("poll interval must be positive"));
                }
                if !matches_pattern(NAMESPACE_PATTERN, &self.namespace)? {
                    return Err(RelayError::configuration(format!(
                        "namespace '{}' must match {NAMESPACE_PATTERN}",
                        self.namespace
                    )));
                }
            }
        }
        Ok(())
    }
}

fn matches_pattern(pattern: &str, value: &str) -> Result<bool> {
    let re = Regex::new(pattern)
        .map_err(|e| RelayError::configuration(format!("bad pattern {pattern}: {e}")))?;
    Ok(re.is_match(value))
}
