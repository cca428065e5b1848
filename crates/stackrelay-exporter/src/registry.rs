//! Prometheus collectors for Cloud Monitoring metrics.
//!
//! Each `(metric type, resource type)` pair gets one collector family,
//! labelled by the resource type's label keys in sorted order. Collectors
//! are created once during the registration pass and never removed. An
//! exposed name belongs to exactly one pair; a second pair deriving the same
//! name is a conflict.
//!
//! Gauges are `prometheus_client` families. Distributions are exposed by
//! [`DistributionFamily`], which republishes the backend's own buckets.
//!
//! # Example
//!
//! ```rust
//! use stackrelay_core::{ResourceLabelSchema, ValueKind};
//! use stackrelay_exporter::registry::{CollectorRegistry, Registration};
//!
//! let registry = CollectorRegistry::new();
//! let schema = ResourceLabelSchema::from_keys(["bucket_name", "location"]);
//! let registration = registry
//!     .ensure_registered(
//!         "storage.googleapis.com/storage/total_bytes",
//!         "gcs_bucket",
//!         ValueKind::Double,
//!         &schema,
//!         "Total size of all objects",
//!     )
//!     .unwrap();
//! assert!(matches!(registration, Registration::Created(_)));
//!
//! let output = registry.encode().unwrap();
//! assert!(output.contains("stackdriver_storage_googleapis_storage_total_bytes_gcs_bucket"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use chrono::Utc;
use parking_lot::RwLock;
use prometheus_client::collector::Collector as EncodeCollector;
use prometheus_client::encoding::DescriptorEncoder;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::MetricType;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use stackrelay_core::{
    CollectorKey, HistogramData, MetricSpec, MonitoringBackend, RelayError, ResourceLabelSchema,
    Result, Shape, ValueKind,
};
use tracing::{debug, info, warn};

use crate::catalog::DescriptorCatalog;
use crate::poll::PollTarget;

/// Prefix of every exposed metric name.
pub const DEFAULT_PREFIX: &str = "stackdriver";

/// Content type of [`CollectorRegistry::encode`] output.
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Label set of a collector: `(key, value)` pairs in schema order.
pub type LabelPairs = Vec<(String, String)>;

type GaugeFamily = Family<LabelPairs, Gauge<f64, AtomicU64>>;

/// Histogram family holding the latest distribution per label set.
///
/// Unlike a `prometheus_client` histogram it does not observe values: each
/// update replaces the label set's buckets with the ones the backend
/// reported.
#[derive(Debug, Clone)]
pub struct DistributionFamily {
    name: String,
    help: String,
    values: Arc<RwLock<HashMap<LabelPairs, HistogramData>>>,
}

impl DistributionFamily {
    fn new(name: &str, help: &str) -> Self {
        Self {
            name: name.to_string(),
            help: format!("{help}."),
            values: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replaces the distribution for `labels`.
    pub fn set(&self, labels: &LabelPairs, data: HistogramData) {
        self.values.write().insert(labels.clone(), data);
    }

    /// The distribution last set for `labels`.
    #[must_use]
    pub fn get(&self, labels: &LabelPairs) -> Option<HistogramData> {
        self.values.read().get(labels).cloned()
    }
}

impl EncodeCollector for DistributionFamily {
    fn encode(&self, mut encoder: DescriptorEncoder) -> std::result::Result<(), std::fmt::Error> {
        let mut metric =
            encoder.encode_descriptor(&self.name, &self.help, None, MetricType::Histogram)?;
        for (labels, data) in self.values.read().iter() {
            // The text encoder writes `+Inf` only for `f64::MAX`.
            let buckets: Vec<(f64, u64)> = data
                .buckets
                .iter()
                .map(|&(bound, n)| (if bound.is_finite() { bound } else { f64::MAX }, n))
                .collect();
            metric
                .encode_family(labels)?
                .encode_histogram::<()>(data.sum, data.count, &buckets, None)?;
        }
        Ok(())
    }
}

/// The metric family behind a collector.
#[derive(Debug, Clone)]
pub enum CollectorVec {
    /// One gauge per label set.
    Gauge(GaugeFamily),
    /// One distribution per label set.
    Histogram(DistributionFamily),
}

impl CollectorVec {
    fn new(shape: Shape, name: &str, help: &str) -> Self {
        match shape {
            Shape::Gauge => Self::Gauge(GaugeFamily::default()),
            Shape::Histogram => Self::Histogram(DistributionFamily::new(name, help)),
        }
    }

    const fn shape(&self) -> Shape {
        match self {
            Self::Gauge(_) => Shape::Gauge,
            Self::Histogram(_) => Shape::Histogram,
        }
    }
}

/// A registered collector.
#[derive(Debug)]
pub struct Collector {
    key: CollectorKey,
    metric_type: String,
    schema: ResourceLabelSchema,
    vec: CollectorVec,
}

impl Collector {
    /// The collector's identity.
    #[must_use]
    pub const fn key(&self) -> &CollectorKey {
        &self.key
    }

    /// The metric type feeding this collector.
    #[must_use]
    pub fn metric_type(&self) -> &str {
        &self.metric_type
    }

    /// Label keys, in the order values must be supplied.
    #[must_use]
    pub const fn schema(&self) -> &ResourceLabelSchema {
        &self.schema
    }

    /// Gauge or histogram.
    #[must_use]
    pub const fn shape(&self) -> Shape {
        self.vec.shape()
    }

    /// Sets the gauge for `labels`. No-op on a histogram collector.
    pub fn record(&self, labels: &LabelPairs, value: f64) {
        if let CollectorVec::Gauge(family) = &self.vec {
            family.get_or_create(labels).set(value);
        }
    }

    /// Replaces the distribution for `labels`. No-op on a gauge collector.
    pub fn record_histogram(&self, labels: &LabelPairs, data: HistogramData) {
        if let CollectorVec::Histogram(family) = &self.vec {
            family.set(labels, data);
        }
    }
}

/// Outcome of [`CollectorRegistry::ensure_registered`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// A new collector was registered.
    Created(CollectorKey),
    /// An identical collector already existed; nothing changed.
    Existing(CollectorKey),
    /// The value kind cannot be exposed; nothing was registered.
    Skipped,
}

/// Registry of collectors, indexed by exposed name.
pub struct CollectorRegistry {
    registry: RwLock<Registry>,
    collectors: RwLock<HashMap<String, Arc<Collector>>>,
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("collectors", &self.collectors.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorRegistry {
    /// Creates a registry with the default prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }

    /// Creates a registry whose metric names start with `prefix_`.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            registry: RwLock::new(Registry::with_prefix(prefix.into())),
            collectors: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a collector for `metric_type` under `resource_type` unless
    /// an identical one exists.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::InvalidMetricType` if no name can be derived and
    /// `RelayError::RegistrationConflict` if the derived name is already
    /// taken by another metric type or resource type, or by a collector of a
    /// different shape or label schema.
    pub fn ensure_registered(
        &self,
        metric_type: &str,
        resource_type: &str,
        kind: ValueKind,
        schema: &ResourceLabelSchema,
        help: &str,
    ) -> Result<Registration> {
        let Some(shape) = kind.shape() else {
            info!(metric_type, resource_type, %kind, "skipping metric with unsupported value type");
            return Ok(Registration::Skipped);
        };
        let key = CollectorKey::derive(metric_type, resource_type)?;

        let mut collectors = self.collectors.write();
        if let Some(existing) = collectors.get(&key.name) {
            if existing.metric_type != metric_type || existing.key.resource_type != resource_type {
                return Err(conflict(
                    &key,
                    format!(
                        "name already exposes {} under {}",
                        existing.metric_type, existing.key.resource_type
                    ),
                ));
            }
            if existing.shape() != shape {
                return Err(conflict(
                    &key,
                    format!("registered as {:?}, requested as {shape:?}", existing.shape()),
                ));
            }
            if existing.schema() != schema {
                return Err(conflict(
                    &key,
                    format!(
                        "registered with labels {:?}, requested with {:?}",
                        existing.schema().keys(),
                        schema.keys()
                    ),
                ));
            }
            debug!(collector = %key, "collector already registered");
            return Ok(Registration::Existing(key));
        }

        let vec = CollectorVec::new(shape, &key.name, help);
        {
            let mut registry = self.registry.write();
            match &vec {
                CollectorVec::Gauge(family) => {
                    registry.register(key.name.clone(), help, family.clone());
                }
                CollectorVec::Histogram(family) => {
                    registry.register_collector(Box::new(family.clone()));
                }
            }
        }

        debug!(collector = %key, ?shape, labels = schema.len(), "registered collector");
        collectors.insert(
            key.name.clone(),
            Arc::new(Collector {
                key: key.clone(),
                metric_type: metric_type.to_string(),
                schema: schema.clone(),
                vec,
            }),
        );
        Ok(Registration::Created(key))
    }

    /// Looks up a registered collector.
    #[must_use]
    pub fn collector(&self, key: &CollectorKey) -> Option<Arc<Collector>> {
        self.collectors
            .read()
            .get(&key.name)
            .filter(|collector| collector.key == *key)
            .cloned()
    }

    /// Number of registered collectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.collectors.read().len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collectors.read().is_empty()
    }

    /// Encodes every collector in the OpenMetrics text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> std::result::Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry.read())?;
        Ok(buffer)
    }
}

fn conflict(key: &CollectorKey, reason: String) -> RelayError {
    RelayError::RegistrationConflict {
        name: key.name.clone(),
        resource_type: key.resource_type.clone(),
        reason,
    }
}

/// Registers collectors for every metric in `plan` and returns the poll
/// targets.
///
/// Metrics whose value kind cannot be exposed, or that report no resource
/// types, produce no target.
///
/// # Errors
///
/// Any descriptor fetch failure or registration conflict aborts the pass.
pub async fn register_plan<B: MonitoringBackend>(
    backend: &B,
    registry: &CollectorRegistry,
    plan: &[MetricSpec],
) -> Result<Vec<PollTarget>> {
    let mut catalog = DescriptorCatalog::new(backend);
    let mut targets = Vec::with_capacity(plan.len());

    for spec in plan {
        let metric_type = spec.metric_type();
        let class = catalog.classify(metric_type).await?;
        if class.kind.shape().is_none() {
            info!(metric_type, kind = %class.kind, "metric not exposed");
            continue;
        }
        if class.resource_types.is_empty() {
            warn!(metric_type, "metric descriptor lists no resource types");
            continue;
        }

        let mut collectors = HashMap::new();
        for resource_type in &class.resource_types {
            let resource = catalog.resource(resource_type).await?;
            let help = format!("{} {}", class.description, resource.description);
            let registration = registry.ensure_registered(
                metric_type,
                resource_type,
                class.kind,
                &resource.schema,
                help.trim(),
            )?;
            let key = match registration {
                Registration::Created(key) | Registration::Existing(key) => key,
                Registration::Skipped => continue,
            };
            if let Some(collector) = registry.collector(&key) {
                collectors.insert(resource_type.clone(), collector);
            }
        }

        let lookback = spec.schedule().nominal_interval(Utc::now())?;
        targets.push(PollTarget::new(spec.clone(), class.kind, lookback, collectors));
    }

    info!(
        metrics = targets.len(),
        collectors = registry.len(),
        "registration complete"
    );
    Ok(targets)
}
