//! REST client for the Cloud Monitoring v3 API.
//!
//! # Example
//!
//! ```rust,no_run
//! use stackrelay_monitoring::{ClientConfig, Credentials, StackdriverClient};
//!
//! # async fn example() -> Result<(), stackrelay_monitoring::ClientError> {
//! let config = ClientConfig::new("my-project")
//!     .with_credentials(Credentials::from_token(std::env::var("TOKEN").ok()));
//! let client = StackdriverClient::new(config)?;
//! let descriptor = client
//!     .get_metric_descriptor("storage.googleapis.com/storage/total_bytes")
//!     .await?;
//! println!("{}", descriptor.description);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use chrono::SecondsFormat;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use stackrelay_core::{
    MetricDescriptor, MonitoringBackend, ResourceDescriptor, Result as RelayResult, Series, Window,
};
use tracing::{debug, trace};

use crate::auth::{Credentials, TokenProvider};
use crate::error::{ClientError, ClientResult};

/// Default API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://monitoring.googleapis.com";

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on pages followed for a single listing.
const MAX_PAGES: usize = 1000;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Project whose time series are read.
    pub project_id: String,
    /// Base URL of the API, without a trailing path.
    pub endpoint: String,
    /// Where access tokens come from.
    pub credentials: Credentials,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Creates a configuration with default endpoint, timeout and
    /// metadata-server credentials.
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            credentials: Credentials::from_token(None),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` for an empty project id or endpoint,
    /// an endpoint that is not http(s), or a zero timeout.
    pub fn validate(&self) -> ClientResult<()> {
        if self.project_id.trim().is_empty() {
            return Err(ClientError::Config("project id cannot be empty".to_string()));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "endpoint must start with http:// or https://, got '{}'",
                self.endpoint
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(ClientError::Config("request timeout must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTimeSeriesResponse {
    #[serde(default)]
    time_series: Vec<Series>,
    #[serde(default)]
    next_page_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Cloud Monitoring client.
pub struct StackdriverClient {
    http: reqwest::Client,
    config: ClientConfig,
    tokens: TokenProvider,
}

impl std::fmt::Debug for StackdriverClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackdriverClient")
            .field("project_id", &self.config.project_id)
            .field("endpoint", &self.config.endpoint)
            .field("request_timeout", &self.config.request_timeout)
            .finish_non_exhaustive()
    }
}

impl StackdriverClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let tokens = TokenProvider::new(config.credentials.clone());
        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    /// The project being read.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }

    /// Lists all series of `metric_type` with points inside `window`,
    /// following pagination to the end.
    ///
    /// # Errors
    ///
    /// Returns an error on an empty metric type, a transport failure, a
    /// non-success status or an undecodable page.
    pub async fn list_time_series(
        &self,
        metric_type: &str,
        window: &Window,
    ) -> ClientResult<Vec<Series>> {
        require_metric_type(metric_type)?;
        let url = self.project_url("timeSeries");
        let mut series = Vec::new();
        let mut page_token: Option<String> = None;

        for page in 0..MAX_PAGES {
            let query = time_series_query(metric_type, window, page_token.as_deref());
            let response: ListTimeSeriesResponse = self.get_json(&url, &query).await?;
            trace!(
                metric_type,
                page,
                count = response.time_series.len(),
                "received time series page"
            );
            series.extend(response.time_series);
            if response.next_page_token.is_empty() {
                debug!(metric_type, total = series.len(), "listed time series");
                return Ok(series);
            }
            page_token = Some(response.next_page_token);
        }

        Err(ClientError::InvalidRequest(format!(
            "time series listing for {metric_type} exceeded {MAX_PAGES} pages"
        )))
    }

    /// Fetches a metric descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error on an empty metric type or a failed request.
    pub async fn get_metric_descriptor(&self, metric_type: &str) -> ClientResult<MetricDescriptor> {
        require_metric_type(metric_type)?;
        let url = self.project_url(&format!("metricDescriptors/{metric_type}"));
        self.get_json(&url, &[]).await
    }

    /// Fetches a monitored resource descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error on an empty resource type or a failed request.
    pub async fn get_resource_descriptor(
        &self,
        resource_type: &str,
    ) -> ClientResult<ResourceDescriptor> {
        if resource_type.is_empty() {
            return Err(ClientError::InvalidRequest(
                "resource type cannot be empty".to_string(),
            ));
        }
        let url = self.project_url(&format!("monitoredResourceDescriptors/{resource_type}"));
        self.get_json(&url, &[]).await
    }

    fn project_url(&self, path: &str) -> String {
        project_url(&self.config.endpoint, &self.config.project_id, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&'static str, String)],
    ) -> ClientResult<T> {
        let mut request = self.http.get(url).query(query);
        if let Some(token) = self.tokens.token(&self.http).await? {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

impl MonitoringBackend for StackdriverClient {
    async fn fetch_series(&self, metric_type: &str, window: &Window) -> RelayResult<Vec<Series>> {
        self.list_time_series(metric_type, window)
            .await
            .map_err(|e| e.into_relay("list time series"))
    }

    async fn fetch_metric_descriptor(&self, metric_type: &str) -> RelayResult<MetricDescriptor> {
        self.get_metric_descriptor(metric_type)
            .await
            .map_err(|e| e.into_relay("get metric descriptor"))
    }

    async fn fetch_resource_descriptor(
        &self,
        resource_type: &str,
    ) -> RelayResult<ResourceDescriptor> {
        self.get_resource_descriptor(resource_type)
            .await
            .map_err(|e| e.into_relay("get monitored resource descriptor"))
    }
}

fn require_metric_type(metric_type: &str) -> ClientResult<()> {
    if metric_type.is_empty() {
        return Err(ClientError::InvalidRequest(
            "metric type cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn project_url(endpoint: &str, project_id: &str, path: &str) -> String {
    format!(
        "{}/v3/projects/{project_id}/{path}",
        endpoint.trim_end_matches('/')
    )
}

fn time_series_query(
    metric_type: &str,
    window: &Window,
    page_token: Option<&str>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("filter", format!("metric.type = \"{metric_type}\"")),
        (
            "interval.startTime",
            window.start().to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        (
            "interval.endTime",
            window.end().to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        ("view", "FULL".to_string()),
    ];
    if let Some(token) = page_token {
        query.push(("pageToken", token.to_string()));
    }
    query
}

/// Best-effort extraction of a readable message from an error body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.status.is_empty() => {
            format!("{} ({})", envelope.error.message, envelope.error.status)
        }
        Ok(envelope) => envelope.error.message,
        Err(_) => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use stackrelay_core::ValueKind;
    use test_case::test_case;

    fn window() -> Window {
        Window::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 10, 0).unwrap(),
        )
        .unwrap()
    }

    mod config_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn defaults() {
            let config = ClientConfig::new("proj");
            assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
            assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
            assert!(matches!(config.credentials, Credentials::MetadataServer(_)));
            assert!(config.validate().is_ok());
        }

        #[test_case(ClientConfig::new(""); "empty project")]
        #[test_case(ClientConfig::new("  "); "blank project")]
        #[test_case(ClientConfig::new("p").with_endpoint("monitoring.googleapis.com"); "no scheme")]
        #[test_case(ClientConfig::new("p").with_request_timeout(Duration::ZERO); "zero timeout")]
        fn invalid(config: ClientConfig) {
            assert!(matches!(config.validate(), Err(ClientError::Config(_))));
        }

        #[test]
        fn new_rejects_invalid_config() {
            assert!(StackdriverClient::new(ClientConfig::new("")).is_err());
        }

        #[test]
        fn debug_omits_credentials() {
            let client = StackdriverClient::new(
                ClientConfig::new("proj").with_credentials(Credentials::Static("secret".into())),
            )
            .unwrap();
            let debug = format!("{client:?}");
            assert!(debug.contains("proj"));
            assert!(!debug.contains("secret"));
        }
    }

    mod request_tests {
        use super::*;
        use test_case::test_case;

        #[test_case("https://monitoring.googleapis.com"; "bare")]
        #[test_case("https://monitoring.googleapis.com/"; "trailing slash")]
        fn builds_project_urls(endpoint: &str) {
            assert_eq!(
                project_url(endpoint, "proj", "timeSeries"),
                "https://monitoring.googleapis.com/v3/projects/proj/timeSeries"
            );
        }

        #[test]
        fn descriptor_url_keeps_metric_path() {
            assert_eq!(
                project_url(
                    DEFAULT_ENDPOINT,
                    "proj",
                    "metricDescriptors/storage.googleapis.com/storage/total_bytes"
                ),
                "https://monitoring.googleapis.com/v3/projects/proj/metricDescriptors/storage.googleapis.com/storage/total_bytes"
            );
        }

        #[test]
        fn time_series_query_first_page() {
            let query = time_series_query("a.b.com/x/y", &window(), None);
            assert_eq!(
                query,
                vec![
                    ("filter", "metric.type = \"a.b.com/x/y\"".to_string()),
                    ("interval.startTime", "2024-05-01T12:00:00Z".to_string()),
                    ("interval.endTime", "2024-05-01T12:10:00Z".to_string()),
                    ("view", "FULL".to_string()),
                ]
            );
        }

        #[test]
        fn time_series_query_next_page() {
            let query = time_series_query("a.b.com/x/y", &window(), Some("tok"));
            assert_eq!(query.last(), Some(&("pageToken", "tok".to_string())));
        }

        #[tokio::test]
        async fn empty_metric_type_rejected_before_sending() {
            let client = StackdriverClient::new(
                ClientConfig::new("proj").with_credentials(Credentials::Anonymous),
            )
            .unwrap();
            let err = client.list_time_series("", &window()).await.unwrap_err();
            assert!(matches!(err, ClientError::InvalidRequest(_)));
            let err = client.fetch_metric_descriptor("").await.unwrap_err();
            assert!(err.to_string().contains("get metric descriptor"));
        }
    }

    mod response_tests {
        use super::*;

        #[test]
        fn parses_time_series_page() {
            let body = r#"{
                "timeSeries": [{
                    "metric": {"type": "storage.googleapis.com/storage/object_count"},
                    "resource": {
                        "type": "gcs_bucket",
                        "labels": {"bucket_name": "b1", "location": "us", "project_id": "p"}
                    },
                    "metricKind": "GAUGE",
                    "valueType": "INT64",
                    "points": [{
                        "interval": {"endTime": "2024-05-01T12:05:00Z"},
                        "value": {"int64Value": "42"}
                    }]
                }],
                "nextPageToken": "abc"
            }"#;
            let page: ListTimeSeriesResponse = serde_json::from_str(body).unwrap();
            assert_eq!(page.next_page_token, "abc");
            assert_eq!(page.time_series.len(), 1);
            let series = &page.time_series[0];
            assert_eq!(series.resource_type(), "gcs_bucket");
            assert_eq!(series.value_type, ValueKind::Int64);
        }

        #[test]
        fn empty_page_parses() {
            let page: ListTimeSeriesResponse = serde_json::from_str("{}").unwrap();
            assert!(page.time_series.is_empty());
            assert!(page.next_page_token.is_empty());
        }

        #[test]
        fn extracts_google_error_message() {
            let body = r#"{"error":{"code":403,"message":"Permission denied","status":"PERMISSION_DENIED"}}"#;
            assert_eq!(error_message(body), "Permission denied (PERMISSION_DENIED)");
        }

        #[test]
        fn error_without_status() {
            let body = r#"{"error":{"code":400,"message":"bad filter"}}"#;
            assert_eq!(error_message(body), "bad filter");
        }

        #[test]
        fn non_json_error_body_kept() {
            assert_eq!(error_message("  upstream timeout\n"), "upstream timeout");
        }
    }
}
