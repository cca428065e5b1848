//! Scrape server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{Router, get};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::HEALTH_PATH;
use crate::error::{ExporterError, ExporterResult};
use crate::registry::{CONTENT_TYPE, CollectorRegistry};

/// Create the scrape router: the registry at `handler_path` plus a health check.
pub fn create_router(registry: Arc<CollectorRegistry>, handler_path: &str) -> Router {
    Router::new()
        .route(handler_path, get(scrape))
        .route(HEALTH_PATH, get(health_check))
        .with_state(registry)
        .layer(TraceLayer::new_for_http())
}

async fn scrape(
    State(registry): State<Arc<CollectorRegistry>>,
) -> ExporterResult<impl IntoResponse> {
    let body = registry.encode()?;
    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], body))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// HTTP server exposing a collector registry.
#[derive(Debug, Clone)]
pub struct ScrapeServer {
    registry: Arc<CollectorRegistry>,
    handler_path: String,
}

impl ScrapeServer {
    /// Create a server for `registry` scraped at `handler_path`.
    #[must_use]
    pub fn new(registry: Arc<CollectorRegistry>, handler_path: impl Into<String>) -> Self {
        Self {
            registry,
            handler_path: handler_path.into(),
        }
    }

    /// Create the router without starting the server.
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.registry), &self.handler_path)
    }

    /// Serve scrapes until the server fails.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails or the server stops
    /// with an error.
    pub async fn serve(&self, addr: SocketAddr) -> ExporterResult<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ExporterError::BindFailed(addr, e))?;

        info!(addr = %addr, path = %self.handler_path, "scrape server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| ExporterError::Serve(e.to_string()))
    }

    /// Serve scrapes for as long as `poller`, the task refreshing the
    /// registry, keeps running.
    ///
    /// # Errors
    ///
    /// Returns the server's error, or `ExporterError::PollStopped` once the
    /// poller exits, since scrapes would only see stale values from then on.
    pub async fn serve_while(
        &self,
        addr: SocketAddr,
        poller: JoinHandle<()>,
    ) -> ExporterResult<()> {
        tokio::select! {
            result = self.serve(addr) => result,
            joined = poller => Err(ExporterError::PollStopped(match joined {
                Ok(()) => "poll loop exited".to_string(),
                Err(e) => e.to_string(),
            })),
        }
    }
}
