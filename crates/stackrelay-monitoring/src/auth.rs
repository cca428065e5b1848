//! Access tokens for the Cloud Monitoring API.
//!
//! Tokens come either from a fixed value (usually an environment variable)
//! or from the GCE metadata server, which hands out short-lived tokens for
//! the instance's default service account. Metadata tokens are cached and
//! refreshed shortly before they expire.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Token endpoint of the GCE metadata server.
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens closer than this to their expiry are refreshed.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Where access tokens come from.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Send requests without an `Authorization` header.
    Anonymous,
    /// Use a fixed bearer token.
    Static(String),
    /// Fetch tokens from a metadata server at the given URL.
    MetadataServer(String),
}

impl Credentials {
    /// Fixed token, or the default metadata server when `token` is `None`.
    #[must_use]
    pub fn from_token(token: Option<String>) -> Self {
        match token {
            Some(token) if !token.is_empty() => Self::Static(token),
            _ => Self::MetadataServer(METADATA_TOKEN_URL.to_string()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::Static(_) => f.write_str("Static(<redacted>)"),
            Self::MetadataServer(url) => f.debug_tuple("MetadataServer").field(url).finish(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }
}

/// Hands out bearer tokens for outgoing requests.
pub struct TokenProvider {
    credentials: Credentials,
    cache: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl TokenProvider {
    /// Creates a provider for the given credentials.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            cache: Mutex::new(None),
        }
    }

    /// The configured credentials.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns a token to send, or `None` for anonymous access.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Credentials` if the metadata server cannot be
    /// reached or answers with something other than a token.
    pub async fn token(&self, http: &reqwest::Client) -> ClientResult<Option<String>> {
        match &self.credentials {
            Credentials::Anonymous => Ok(None),
            Credentials::Static(token) => Ok(Some(token.clone())),
            Credentials::MetadataServer(url) => {
                let mut cache = self.cache.lock().await;
                if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh(Instant::now())) {
                    return Ok(Some(cached.value.clone()));
                }
                let fetched = fetch_metadata_token(http, url).await?;
                debug!(expires_in_secs = fetched.expires_in, "refreshed metadata token");
                let value = fetched.access_token.clone();
                *cache = Some(CachedToken {
                    value: fetched.access_token,
                    expires_at: Instant::now() + Duration::from_secs(fetched.expires_in),
                });
                Ok(Some(value))
            }
        }
    }
}

async fn fetch_metadata_token(http: &reqwest::Client, url: &str) -> ClientResult<MetadataToken> {
    let response = http
        .get(url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| ClientError::Credentials(format!("metadata server unreachable: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Credentials(format!(
            "metadata server returned {status}"
        )));
    }

    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| ClientError::Credentials(format!("unexpected metadata token response: {e}")))
}
