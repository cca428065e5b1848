//! Core types for the exporter.
//!
//! The series and descriptor types mirror the JSON shapes of the Cloud
//! Monitoring v3 REST API so that fetched data can be written back out
//! field for field:
//! - [`Series`], [`Point`], [`TypedValue`]: fetched time series
//! - [`MetricDescriptor`], [`ResourceDescriptor`]: backend metadata
//! - [`ValueKind`], [`Shape`]: how a metric is exposed
//! - [`ResourceLabelSchema`], [`CollectorKey`]: collector identity
//! - [`Window`]: a polling window

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RelayError, Result};

/// The value type a metric descriptor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueKind {
    /// 64-bit float.
    Double,
    /// 64-bit signed integer.
    Int64,
    /// Currency amount, carried as a double.
    Money,
    /// Boolean, exposed as 1.0 / 0.0.
    Bool,
    /// Bucketed distribution.
    Distribution,
    /// Text value; cannot be exposed.
    String,
    /// Anything the backend reports that we do not know about.
    #[serde(other)]
    Unsupported,
}

/// The shape of an exposed collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// A gauge vector.
    Gauge,
    /// A histogram vector.
    Histogram,
}

impl ValueKind {
    /// Returns the collector shape for this kind, or `None` when the kind
    /// cannot be exposed.
    #[must_use]
    pub const fn shape(self) -> Option<Shape> {
        match self {
            Self::Double => Some(Shape::Gauge),
            Self::Int64 => Some(Shape::Gauge),
            Self::Money => Some(Shape::Gauge),
            Self::Bool => Some(Shape::Gauge),
            Self::Distribution => Some(Shape::Histogram),
            Self::String => None,
            Self::Unsupported => None,
        }
    }

    /// Projects a point value onto a number for this kind.
    ///
    /// Returns [`Reading::Unmapped`] when the kind is not numeric or the
    /// point does not carry the field this kind reads from.
    #[must_use]
    pub fn read(self, value: &TypedValue) -> Reading {
        let projected = match self {
            Self::Double | Self::Money => value.double_value,
            Self::Int64 => value.int64_value.map(|v| v as f64),
            Self::Bool => value.bool_value.map(|b| if b { 1.0 } else { 0.0 }),
            Self::Distribution => value.distribution_value.as_ref().map(|d| d.mean),
            Self::String | Self::Unsupported => None,
        };
        projected.map_or(Reading::Unmapped, Reading::Value)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Double => "DOUBLE",
            Self::Int64 => "INT64",
            Self::Money => "MONEY",
            Self::Bool => "BOOL",
            Self::Distribution => "DISTRIBUTION",
            Self::String => "STRING",
            Self::Unsupported => "UNSUPPORTED",
        };
        f.write_str(s)
    }
}

/// The number extracted from a point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// A genuine reading.
    Value(f64),
    /// The point could not be mapped to a number.
    Unmapped,
}

impl Reading {
    /// The value to expose: unmapped readings expose `0.0`.
    #[must_use]
    pub const fn or_zero(self) -> f64 {
        match self {
            Self::Value(v) => v,
            Self::Unmapped => 0.0,
        }
    }

    /// Returns true when the reading could not be mapped.
    #[must_use]
    pub const fn is_unmapped(self) -> bool {
        matches!(self, Self::Unmapped)
    }
}

/// Label keys of a resource type, sorted lexicographically.
///
/// Collectors are declared with these keys and label values are always
/// produced by walking them in order, so keys and values line up position
/// for position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceLabelSchema(Vec<String>);

impl ResourceLabelSchema {
    /// Builds a schema from label keys in any order; duplicates are removed.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();
        Self(keys)
    }

    /// The sorted label keys.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.0
    }

    /// Number of label keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the schema has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Label values in schema order; keys absent from `labels` yield `""`.
    #[must_use]
    pub fn values_for(&self, labels: &HashMap<String, String>) -> Vec<String> {
        self.0
            .iter()
            .map(|key| labels.get(key).cloned().unwrap_or_default())
            .collect()
    }

    /// `(key, value)` pairs in schema order.
    #[must_use]
    pub fn pairs_for(&self, labels: &HashMap<String, String>) -> Vec<(String, String)> {
        self.0
            .iter()
            .cloned()
            .zip(self.values_for(labels))
            .collect()
    }
}

/// Identity of an exposed collector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectorKey {
    /// Name derived from the metric type and resource type, without prefix.
    pub name: String,
    /// The monitored resource type.
    pub resource_type: String,
}

impl CollectorKey {
    /// Derives the key for a metric type under a resource type.
    ///
    /// `storage.googleapis.com/storage/total_bytes` under `gcs_bucket`
    /// becomes `storage_googleapis_storage_total_bytes_gcs_bucket`: the
    /// first two components of the domain, every path segment, then the
    /// resource type.
    pub fn derive(metric_type: &str, resource_type: &str) -> Result<Self> {
        let invalid = |reason: &str| RelayError::InvalidMetricType {
            metric_type: metric_type.to_string(),
            reason: reason.to_string(),
        };

        let (domain, path) = metric_type
            .split_once('/')
            .ok_or_else(|| invalid("expected a domain followed by '/'"))?;
        if domain.is_empty() {
            return Err(invalid("empty domain"));
        }
        if resource_type.is_empty() {
            return Err(invalid("empty resource type"));
        }

        let path: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if path.is_empty() {
            return Err(invalid("no metric name after the domain"));
        }

        let segments: Vec<&str> = domain
            .split('.')
            .take(2)
            .filter(|s| !s.is_empty())
            .chain(path)
            .chain(std::iter::once(resource_type))
            .collect();

        let name = sanitize(&segments.join("_"), '_');
        Ok(Self {
            name,
            resource_type: resource_type.to_string(),
        })
    }
}

impl fmt::Display for CollectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.resource_type)
    }
}

/// Replaces every character outside `[A-Za-z0-9_]` with `substitute`.
#[must_use]
pub fn sanitize(raw: &str, substitute: char) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                substitute
            }
        })
        .collect()
}

/// A polling window; `start` is strictly before `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Window {
    /// Creates a window.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::InvalidWindow` unless `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(RelayError::InvalidWindow {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// Window start.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Window end.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Length of the window.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Metric identity inside a series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricRef {
    /// The metric type.
    #[serde(rename = "type")]
    pub metric_type: String,
    /// Metric labels.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// The monitored resource a series is attributed to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoredResource {
    /// The resource type, e.g. `gcs_bucket`.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource labels, e.g. `bucket_name`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// Start and end of a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeInterval {
    /// Start of the interval; absent for gauge metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// End of the interval.
    pub end_time: DateTime<Utc>,
}

/// A bucketed distribution value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    /// Number of values in the population.
    #[serde(default, with = "int64_string")]
    pub count: i64,
    /// Arithmetic mean of the population.
    #[serde(default)]
    pub mean: f64,
    /// Bucket options, counts, exemplars and anything else, kept verbatim.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// A distribution flattened into per-bucket counts.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramData {
    /// Sum of all values, `mean * count`.
    pub sum: f64,
    /// Number of values.
    pub count: u64,
    /// `(upper bound, count)` per bucket, not cumulative. The last bound is
    /// always `f64::INFINITY`.
    pub buckets: Vec<(f64, u64)>,
}

impl HistogramData {
    /// An empty histogram with only the overflow bucket.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            sum: 0.0,
            count: 0,
            buckets: vec![(f64::INFINITY, 0)],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum BucketOptions {
    LinearBuckets(LinearBuckets),
    ExponentialBuckets(ExponentialBuckets),
    ExplicitBuckets(ExplicitBuckets),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinearBuckets {
    #[serde(default)]
    num_finite_buckets: u32,
    #[serde(default)]
    width: f64,
    #[serde(default)]
    offset: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExponentialBuckets {
    #[serde(default)]
    num_finite_buckets: u32,
    #[serde(default)]
    growth_factor: f64,
    #[serde(default)]
    scale: f64,
}

#[derive(Debug, Deserialize)]
struct ExplicitBuckets {
    #[serde(default)]
    bounds: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct BucketCount(#[serde(with = "int64_string")] i64);

impl BucketOptions {
    /// Upper bounds of every bucket except the overflow bucket. The
    /// underflow bucket ends at the first bound.
    fn finite_bounds(&self) -> Vec<f64> {
        match self {
            Self::LinearBuckets(l) => (0..=l.num_finite_buckets)
                .map(|i| l.offset + l.width * f64::from(i))
                .collect(),
            Self::ExponentialBuckets(e) => (0..=e.num_finite_buckets)
                .map(|i| e.scale * e.growth_factor.powf(f64::from(i)))
                .collect(),
            Self::ExplicitBuckets(e) => e.bounds.clone(),
        }
    }
}

impl Distribution {
    /// Flattens the distribution using its `bucketOptions` and
    /// `bucketCounts`.
    ///
    /// Missing trailing counts are zero and surplus counts fold into the
    /// overflow bucket. Without usable bucket fields the whole population
    /// lands in the overflow bucket.
    #[must_use]
    pub fn histogram(&self) -> HistogramData {
        let count = u64::try_from(self.count).unwrap_or(0);
        let sum = self.mean * count as f64;

        let options = self
            .rest
            .get("bucketOptions")
            .and_then(|v| BucketOptions::deserialize(v).ok());
        let counts: Vec<u64> = self
            .rest
            .get("bucketCounts")
            .and_then(|v| Vec::<BucketCount>::deserialize(v).ok())
            .unwrap_or_default()
            .into_iter()
            .map(|c| u64::try_from(c.0).unwrap_or(0))
            .collect();

        let Some(options) = options.filter(|_| !counts.is_empty()) else {
            return HistogramData {
                sum,
                count,
                buckets: vec![(f64::INFINITY, count)],
            };
        };

        let mut buckets: Vec<(f64, u64)> = options
            .finite_bounds()
            .into_iter()
            .chain(std::iter::once(f64::INFINITY))
            .map(|bound| (bound, 0))
            .collect();
        let last = buckets.len() - 1;
        for (index, n) in counts.into_iter().enumerate() {
            buckets[index.min(last)].1 += n;
        }

        HistogramData {
            sum,
            count,
            buckets,
        }
    }
}

/// One-of value of a point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedValue {
    /// Set for `DOUBLE` and `MONEY` metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_value: Option<f64>,
    /// Set for `INT64` metrics; string encoded on the wire.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "int64_string::option"
    )]
    pub int64_value: Option<i64>,
    /// Set for `BOOL` metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,
    /// Set for `STRING` metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    /// Set for `DISTRIBUTION` metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution_value: Option<Distribution>,
}

impl TypedValue {
    /// A double value.
    #[must_use]
    pub fn double(v: f64) -> Self {
        Self {
            double_value: Some(v),
            ..Self::default()
        }
    }

    /// An int64 value.
    #[must_use]
    pub fn int64(v: i64) -> Self {
        Self {
            int64_value: Some(v),
            ..Self::default()
        }
    }

    /// A bool value.
    #[must_use]
    pub fn boolean(v: bool) -> Self {
        Self {
            bool_value: Some(v),
            ..Self::default()
        }
    }
}

/// A single data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// The interval the point covers.
    pub interval: TimeInterval,
    /// The value.
    pub value: TypedValue,
}

impl Point {
    /// A point ending at `end_time`.
    #[must_use]
    pub const fn at(end_time: DateTime<Utc>, value: TypedValue) -> Self {
        Self {
            interval: TimeInterval {
                start_time: None,
                end_time,
            },
            value,
        }
    }
}

/// One time series as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    /// The metric and its labels.
    pub metric: MetricRef,
    /// The resource the series belongs to.
    pub resource: MonitoredResource,
    /// `GAUGE`, `DELTA` or `CUMULATIVE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_kind: Option<String>,
    /// Value type of the points.
    #[serde(default = "unsupported")]
    pub value_type: ValueKind,
    /// Points, most recent first as the backend returns them.
    #[serde(default)]
    pub points: Vec<Point>,
    /// Unit of the values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Fields not modeled above, kept verbatim.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

const fn unsupported() -> ValueKind {
    ValueKind::Unsupported
}

impl Series {
    /// Creates an empty series for a metric under a resource.
    #[must_use]
    pub fn new(
        metric_type: impl Into<String>,
        resource_type: impl Into<String>,
        value_type: ValueKind,
    ) -> Self {
        Self {
            metric: MetricRef {
                metric_type: metric_type.into(),
                labels: HashMap::new(),
            },
            resource: MonitoredResource {
                resource_type: resource_type.into(),
                labels: HashMap::new(),
            },
            metric_kind: None,
            value_type,
            points: Vec::new(),
            unit: None,
            rest: Map::new(),
        }
    }

    /// Adds a resource label and returns self for chaining.
    #[must_use]
    pub fn resource_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource.labels.insert(key.into(), value.into());
        self
    }

    /// Adds a point and returns self for chaining.
    #[must_use]
    pub fn point(mut self, point: Point) -> Self {
        self.points.push(point);
        self
    }

    /// The resource type of this series.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource.resource_type
    }

    /// The point with the greatest end time. The first of equal maxima wins.
    #[must_use]
    pub fn latest_point(&self) -> Option<&Point> {
        let mut latest: Option<&Point> = None;
        for point in &self.points {
            match latest {
                Some(current) if point.interval.end_time <= current.interval.end_time => {}
                _ => latest = Some(point),
            }
        }
        latest
    }
}

/// Backend metadata about a metric type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDescriptor {
    /// The metric type.
    #[serde(rename = "type")]
    pub metric_type: String,
    /// Value type of the metric's points.
    #[serde(default = "unsupported")]
    pub value_type: ValueKind,
    /// `GAUGE`, `DELTA` or `CUMULATIVE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_kind: Option<String>,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
    /// Resource types this metric can be reported under.
    #[serde(default)]
    pub monitored_resource_types: Vec<String>,
}

/// A label declared by a resource descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDescriptor {
    /// Label key.
    pub key: String,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
}

/// Backend metadata about a monitored resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// The resource type.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
    /// Labels identifying a resource of this type.
    #[serde(default)]
    pub labels: Vec<LabelDescriptor>,
}

impl ResourceDescriptor {
    /// The sorted label schema of this resource type.
    #[must_use]
    pub fn label_schema(&self) -> ResourceLabelSchema {
        ResourceLabelSchema::from_keys(self.labels.iter().map(|l| l.key.clone()))
    }
}

/// int64 fields are JSON strings in the REST API; accept numbers as well.
mod int64_string {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Str(String),
        Num(i64),
    }

    fn parse<E: serde::de::Error>(repr: Repr) -> Result<i64, E> {
        match repr {
            Repr::Num(n) => Ok(n),
            Repr::Str(s) => s.parse().map_err(E::custom),
        }
    }

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        parse(Repr::deserialize(deserializer)?)
    }

    pub mod option {
        use super::{Repr, parse};
        use serde::{Deserialize, Deserializer, Serializer};

        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            value: &Option<i64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_str(&v.to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<i64>, D::Error> {
            Option::<Repr>::deserialize(deserializer)?
                .map(parse)
                .transpose()
        }
    }
}
