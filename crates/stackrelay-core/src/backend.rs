//! The seam between the engine and a monitoring backend.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::error::{RelayError, Result};
use crate::types::{MetricDescriptor, ResourceDescriptor, Series, Window};

/// A source of time series and descriptors.
///
/// Implementations must be shareable across tasks; every call may fail
/// with `RelayError::RemoteApi`.
pub trait MonitoringBackend: Send + Sync {
    /// Lists every series of `metric_type` with points inside `window`.
    fn fetch_series(
        &self,
        metric_type: &str,
        window: &Window,
    ) -> impl Future<Output = Result<Vec<Series>>> + Send;

    /// Fetches the descriptor of a metric type.
    fn fetch_metric_descriptor(
        &self,
        metric_type: &str,
    ) -> impl Future<Output = Result<MetricDescriptor>> + Send;

    /// Fetches the descriptor of a monitored resource type.
    fn fetch_resource_descriptor(
        &self,
        resource_type: &str,
    ) -> impl Future<Output = Result<ResourceDescriptor>> + Send;
}

impl<B: MonitoringBackend> MonitoringBackend for Arc<B> {
    fn fetch_series(
        &self,
        metric_type: &str,
        window: &Window,
    ) -> impl Future<Output = Result<Vec<Series>>> + Send {
        (**self).fetch_series(metric_type, window)
    }

    fn fetch_metric_descriptor(
        &self,
        metric_type: &str,
    ) -> impl Future<Output = Result<MetricDescriptor>> + Send {
        (**self).fetch_metric_descriptor(metric_type)
    }

    fn fetch_resource_descriptor(
        &self,
        resource_type: &str,
    ) -> impl Future<Output = Result<ResourceDescriptor>> + Send {
        (**self).fetch_resource_descriptor(resource_type)
    }
}

/// A backend that serves canned data from memory.
///
/// Used for dry runs and tests. Series are returned regardless of the
/// window; metric types can be marked as failing to simulate outages.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    series: RwLock<HashMap<String, Vec<Series>>>,
    metrics: RwLock<HashMap<String, MetricDescriptor>>,
    resources: RwLock<HashMap<String, ResourceDescriptor>>,
    failing: RwLock<HashMap<String, String>>,
    series_calls: AtomicUsize,
    resource_calls: AtomicUsize,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a metric descriptor.
    pub fn insert_metric(&self, descriptor: MetricDescriptor) {
        self.metrics
            .write()
            .insert(descriptor.metric_type.clone(), descriptor);
    }

    /// Adds a resource descriptor.
    pub fn insert_resource(&self, descriptor: ResourceDescriptor) {
        self.resources
            .write()
            .insert(descriptor.resource_type.clone(), descriptor);
    }

    /// Replaces the series returned for a metric type.
    pub fn set_series(&self, metric_type: impl Into<String>, series: Vec<Series>) {
        self.series.write().insert(metric_type.into(), series);
    }

    /// Makes every call for `metric_type` fail with `reason`.
    pub fn fail(&self, metric_type: impl Into<String>, reason: impl Into<String>) {
        self.failing.write().insert(metric_type.into(), reason.into());
    }

    /// Clears a failure set by [`InMemoryBackend::fail`].
    pub fn recover(&self, metric_type: &str) {
        self.failing.write().remove(metric_type);
    }

    /// Number of `fetch_series` calls served so far.
    #[must_use]
    pub fn series_calls(&self) -> usize {
        self.series_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch_resource_descriptor` calls served so far.
    #[must_use]
    pub fn resource_calls(&self) -> usize {
        self.resource_calls.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &str, key: &str) -> Result<()> {
        match self.failing.read().get(key) {
            Some(reason) => Err(RelayError::remote(operation, reason.clone())),
            None => Ok(()),
        }
    }
}

impl MonitoringBackend for InMemoryBackend {
    async fn fetch_series(&self, metric_type: &str, _window: &Window) -> Result<Vec<Series>> {
        self.series_calls.fetch_add(1, Ordering::SeqCst);
        self.check("list time series", metric_type)?;
        Ok(self
            .series
            .read()
            .get(metric_type)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_metric_descriptor(&self, metric_type: &str) -> Result<MetricDescriptor> {
        self.check("get metric descriptor", metric_type)?;
        self.metrics.read().get(metric_type).cloned().ok_or_else(|| {
            RelayError::remote(
                "get metric descriptor",
                format!("metric descriptor not found: {metric_type}"),
            )
        })
    }

    async fn fetch_resource_descriptor(&self, resource_type: &str) -> Result<ResourceDescriptor> {
        self.resource_calls.fetch_add(1, Ordering::SeqCst);
        self.check("get monitored resource descriptor", resource_type)?;
        self.resources.read().get(resource_type).cloned().ok_or_else(|| {
            RelayError::remote(
                "get monitored resource descriptor",
                format!("resource descriptor not found: {resource_type}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LabelDescriptor, ValueKind};
    use chrono::{Duration, Utc};

    fn window() -> Window {
        let end = Utc::now();
        Window::new(end - Duration::minutes(5), end).unwrap()
    }

    #[tokio::test]
    async fn serves_inserted_descriptors() {
        let backend = InMemoryBackend::new();
        backend.insert_metric(MetricDescriptor {
            metric_type: "a.b.com/x/y".to_string(),
            value_type: ValueKind::Double,
            metric_kind: None,
            description: String::new(),
            monitored_resource_types: vec!["r".to_string()],
        });
        backend.insert_resource(ResourceDescriptor {
            resource_type: "r".to_string(),
            description: String::new(),
            labels: vec![LabelDescriptor {
                key: "k".to_string(),
                description: String::new(),
            }],
        });

        let metric = backend.fetch_metric_descriptor("a.b.com/x/y").await.unwrap();
        assert_eq!(metric.value_type, ValueKind::Double);
        let resource = backend.fetch_resource_descriptor("r").await.unwrap();
        assert_eq!(resource.labels.len(), 1);
        assert_eq!(backend.resource_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_descriptor_is_remote_error() {
        let backend = InMemoryBackend::new();
        let err = backend.fetch_metric_descriptor("missing/metric").await.unwrap_err();
        assert!(matches!(err, RelayError::RemoteApi { .. }));
    }

    #[tokio::test]
    async fn failure_and_recovery() {
        let backend = InMemoryBackend::new();
        backend.set_series("a.b.com/x/y", vec![Series::new("a.b.com/x/y", "r", ValueKind::Double)]);
        backend.fail("a.b.com/x/y", "quota exceeded");

        assert!(backend.fetch_series("a.b.com/x/y", &window()).await.is_err());
        backend.recover("a.b.com/x/y");
        assert_eq!(backend.fetch_series("a.b.com/x/y", &window()).await.unwrap().len(), 1);
        assert_eq!(backend.series_calls(), 2);
    }

    #[tokio::test]
    async fn shared_through_arc() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.set_series("a.b.com/x/y", Vec::new());
        let series = MonitoringBackend::fetch_series(&backend, "a.b.com/x/y", &window())
            .await
            .unwrap();
        assert!(series.is_empty());
    }
}
