//! Command-line argument parsing with clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use stackrelay_monitoring::DEFAULT_ENDPOINT;

use crate::config::{DEFAULT_HANDLER_PATH, DEFAULT_LISTEN_PORT, ExporterConfig, OutputMode};
use crate::registry::DEFAULT_PREFIX;

/// Export Cloud Monitoring time series as JSON snapshots or Prometheus metrics.
#[derive(Parser, Debug, Clone)]
#[command(name = "stackrelay")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Project to read metrics from.
    #[arg(long, env = "STACKRELAY_PROJECT_ID", default_value = "")]
    pub project_id: String,

    /// Metric type to export, optionally followed by `|` and a cron
    /// expression, e.g. "storage.googleapis.com/storage/total_bytes|*/5 * * * *".
    /// Repeat to export several metrics, or separate them with `;`.
    #[arg(long = "metric-type", env = "STACKRELAY_METRIC_TYPES", value_delimiter = ';')]
    pub metric_types: Vec<String>,

    /// Where fetched series go.
    #[arg(long, value_enum, default_value_t = OutputMode::Json)]
    pub output_type: OutputMode,

    /// Directory for JSON snapshots (required for json output).
    #[arg(long)]
    pub output_path: Option<PathBuf>,

    /// Port of the scrape endpoint.
    #[arg(long, default_value_t = DEFAULT_LISTEN_PORT)]
    pub listen_port: u16,

    /// Path of the scrape endpoint.
    #[arg(long, default_value = DEFAULT_HANDLER_PATH)]
    pub handler_path: String,

    /// Seconds between polls in prometheus mode.
    #[arg(long, default_value_t = 60)]
    pub poll_interval_secs: u64,

    /// Prefix of exposed metric names.
    #[arg(long, default_value = DEFAULT_PREFIX)]
    pub namespace: String,

    /// Cloud Monitoring API endpoint.
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub api_endpoint: String,

    /// Bearer token for the API; the GCE metadata server is used when unset.
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Timeout of each API request, in seconds.
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl Cli {
    /// Converts the arguments into an exporter configuration.
    #[must_use]
    pub fn into_config(self) -> ExporterConfig {
        let mut config = ExporterConfig::new(self.project_id)
            .with_output(self.output_type)
            .with_listen_port(self.listen_port)
            .with_handler_path(self.handler_path)
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs))
            .with_namespace(self.namespace)
            .with_api_endpoint(self.api_endpoint)
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs));
        config.metric_entries = self.metric_types;
        config.output_path = self.output_path;
        config.access_token = self.access_token;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_help_does_not_panic() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::parse_from([
            "stackrelay",
            "--project-id",
            "p",
            "--metric-type",
            "a.b.com/x/y",
        ]);
        assert_eq!(cli.output_type, OutputMode::Json);
        assert_eq!(cli.listen_port, 8081);
        assert_eq!(cli.handler_path, "/stackmetrics");
        assert_eq!(cli.poll_interval_secs, 60);
        assert_eq!(cli.namespace, "stackdriver");
        assert_eq!(cli.request_timeout_secs, 30);
    }

    #[test]
    fn repeated_metric_types_keep_order() {
        let cli = Cli::parse_from([
            "stackrelay",
            "--project-id",
            "p",
            "--metric-type",
            "a.b.com/x/y|*/5 * * * *",
            "--metric-type",
            "a.b.com/x/z",
        ]);
        assert_eq!(cli.metric_types, vec!["a.b.com/x/y|*/5 * * * *", "a.b.com/x/z"]);
    }

    #[test]
    fn semicolon_delimited_metric_types() {
        let cli = Cli::parse_from([
            "stackrelay",
            "--project-id",
            "p",
            "--metric-type",
            "a.b.com/x/y|0,30 * * * *;a.b.com/x/z",
        ]);
        assert_eq!(cli.metric_types, vec!["a.b.com/x/y|0,30 * * * *", "a.b.com/x/z"]);
    }

    #[test]
    fn prometheus_into_config() {
        let cli = Cli::parse_from([
            "stackrelay",
            "--project-id",
            "p",
            "--metric-type",
            "a.b.com/x/y",
            "--output-type",
            "prometheus",
            "--listen-port",
            "9100",
            "--handler-path",
            "/metrics",
            "--poll-interval-secs",
            "15",
        ]);
        let config = cli.into_config();
        assert_eq!(config.output, OutputMode::Prometheus);
        assert_eq!(config.listen_port, 9100);
        assert_eq!(config.handler_path, "/metrics");
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.metric_entries, vec!["a.b.com/x/y"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_into_config() {
        let cli = Cli::parse_from([
            "stackrelay",
            "--project-id",
            "p",
            "--metric-type",
            "a.b.com/x/y",
            "--output-path",
            "/var/lib/stackrelay",
        ]);
        let config = cli.into_config();
        assert_eq!(config.output, OutputMode::Json);
        assert_eq!(config.output_path, Some(PathBuf::from("/var/lib/stackrelay")));
    }

    #[test]
    fn unknown_output_type_rejected() {
        let result = Cli::try_parse_from([
            "stackrelay",
            "--project-id",
            "p",
            "--output-type",
            "csv",
        ]);
        assert!(result.is_err());
    }
}
