//! End-to-end tests for prometheus mode.
//!
//! These tests verify:
//! 1. The registration pass over a plan
//! 2. Registration idempotency and conflicts
//! 3. Poll ticks pushing into collectors
//! 4. Scrapes through the router

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use stackrelay_core::{
    InMemoryBackend, LabelDescriptor, MetricDescriptor, Point, RelayError, ResourceDescriptor,
    Series, TypedValue, ValueKind, normalize,
};
use stackrelay_exporter::{CollectorRegistry, PollLoop, ScrapeServer, register_plan};
use tower::ServiceExt;

const TOTAL_BYTES: &str = "storage.googleapis.com/storage/total_bytes";
const OBJECT_COUNT: &str = "storage.googleapis.com/storage/object_count";
const STRING_METRIC: &str = "storage.googleapis.com/storage/bucket_class";

fn labels(keys: &[&str]) -> Vec<LabelDescriptor> {
    keys.iter()
        .map(|key| LabelDescriptor {
            key: (*key).to_string(),
            description: String::new(),
        })
        .collect()
}

fn metric(metric_type: &str, kind: ValueKind, resources: &[&str]) -> MetricDescriptor {
    MetricDescriptor {
        metric_type: metric_type.to_string(),
        value_type: kind,
        metric_kind: Some("GAUGE".to_string()),
        description: format!("{metric_type} description"),
        monitored_resource_types: resources.iter().map(|r| (*r).to_string()).collect(),
    }
}

fn backend() -> Arc<InMemoryBackend> {
    let backend = InMemoryBackend::new();
    backend.insert_metric(metric(TOTAL_BYTES, ValueKind::Double, &["gcs_bucket"]));
    backend.insert_metric(metric(OBJECT_COUNT, ValueKind::Int64, &["gcs_bucket"]));
    backend.insert_metric(metric(STRING_METRIC, ValueKind::String, &["gcs_bucket"]));
    backend.insert_resource(ResourceDescriptor {
        resource_type: "gcs_bucket".to_string(),
        description: "A Cloud Storage bucket.".to_string(),
        labels: labels(&["project_id", "bucket_name", "location"]),
    });
    Arc::new(backend)
}

fn bucket_series(metric_type: &str, bucket: &str, value: TypedValue) -> Series {
    Series::new(metric_type, "gcs_bucket", ValueKind::Double)
        .resource_label("project_id", "p")
        .resource_label("bucket_name", bucket)
        .resource_label("location", "us")
        .point(Point::at(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 4, 0).unwrap(),
            value,
        ))
}

async fn scrape(server: &ScrapeServer) -> String {
    let request = Request::builder()
        .uri("/stackmetrics")
        .body(Body::empty())
        .unwrap();
    let response = server.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_registration_pass_builds_targets() {
    let backend = backend();
    let registry = CollectorRegistry::new();
    let plan = normalize([TOTAL_BYTES, OBJECT_COUNT, STRING_METRIC]).unwrap();

    let targets = register_plan(&backend, &registry, &plan).await.unwrap();

    // The STRING metric is skipped.
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0].metric_type(), TOTAL_BYTES);
    assert_eq!(targets[1].metric_type(), OBJECT_COUNT);
    assert_eq!(targets[0].lookback(), chrono::Duration::minutes(10));
    assert_eq!(registry.len(), 2);

    // Both metrics share one resource type.
    assert_eq!(backend.resource_calls(), 1);
}

#[tokio::test]
async fn test_registration_is_idempotent() {
    let backend = backend();
    let registry = CollectorRegistry::new();
    let plan = normalize([TOTAL_BYTES]).unwrap();

    register_plan(&backend, &registry, &plan).await.unwrap();
    register_plan(&backend, &registry, &plan).await.unwrap();

    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_descriptor_failure_aborts_startup() {
    let backend = backend();
    backend.fail(OBJECT_COUNT, "permission denied");
    let registry = CollectorRegistry::new();
    let plan = normalize([TOTAL_BYTES, OBJECT_COUNT]).unwrap();

    let err = register_plan(&backend, &registry, &plan).await.unwrap_err();
    assert!(matches!(err, RelayError::RemoteApi { .. }));
}

#[tokio::test]
async fn test_shape_change_is_a_conflict() {
    let backend = backend();
    let registry = CollectorRegistry::new();
    register_plan(&backend, &registry, &normalize([TOTAL_BYTES]).unwrap())
        .await
        .unwrap();

    backend.insert_metric(metric(TOTAL_BYTES, ValueKind::Distribution, &["gcs_bucket"]));
    let err = register_plan(&backend, &registry, &normalize([TOTAL_BYTES]).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::RegistrationConflict { .. }));
}

#[tokio::test]
async fn test_metrics_deriving_one_name_abort_startup() {
    let backend = backend();
    let twin = "storage.googleapis.com/storage_total_bytes";
    backend.insert_metric(metric(twin, ValueKind::Double, &["gcs_bucket"]));
    let registry = CollectorRegistry::new();

    let err = register_plan(&backend, &registry, &normalize([TOTAL_BYTES, twin]).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::RegistrationConflict { .. }));
    assert_eq!(registry.len(), 1);
}

// ============================================================================
// Poll and scrape
// ============================================================================

#[tokio::test]
async fn test_poll_then_scrape() {
    let backend = backend();
    backend.set_series(
        TOTAL_BYTES,
        vec![
            bucket_series(TOTAL_BYTES, "b1", TypedValue::double(2048.0)),
            bucket_series(TOTAL_BYTES, "b2", TypedValue::double(10.0)),
        ],
    );
    backend.set_series(
        OBJECT_COUNT,
        vec![bucket_series(OBJECT_COUNT, "b1", TypedValue::int64(42))],
    );

    let registry = Arc::new(CollectorRegistry::new());
    let plan = normalize([TOTAL_BYTES, OBJECT_COUNT]).unwrap();
    let targets = register_plan(&backend, &registry, &plan).await.unwrap();

    let poll = PollLoop::new(Arc::clone(&backend), targets);
    let report = poll
        .poll_once(Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap())
        .await;
    assert_eq!(report.metrics_polled, 2);
    assert_eq!(report.readings_pushed, 3);

    let body = scrape(&ScrapeServer::new(registry, "/stackmetrics")).await;
    assert!(body.contains(
        "stackdriver_storage_googleapis_storage_total_bytes_gcs_bucket{bucket_name=\"b1\",location=\"us\",project_id=\"p\"} 2048.0"
    ));
    assert!(body.contains(
        "stackdriver_storage_googleapis_storage_total_bytes_gcs_bucket{bucket_name=\"b2\",location=\"us\",project_id=\"p\"} 10.0"
    ));
    assert!(body.contains(
        "stackdriver_storage_googleapis_storage_object_count_gcs_bucket{bucket_name=\"b1\",location=\"us\",project_id=\"p\"} 42.0"
    ));
    assert!(!body.contains("bucket_class"));
}

#[tokio::test]
async fn test_failed_metric_keeps_previous_values() {
    let backend = backend();
    backend.set_series(
        TOTAL_BYTES,
        vec![bucket_series(TOTAL_BYTES, "b1", TypedValue::double(5.0))],
    );

    let registry = Arc::new(CollectorRegistry::new());
    let targets = register_plan(&backend, &registry, &normalize([TOTAL_BYTES]).unwrap())
        .await
        .unwrap();
    let poll = PollLoop::new(Arc::clone(&backend), targets);
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap();
    poll.poll_once(now).await;

    backend.fail(TOTAL_BYTES, "unavailable");
    let report = poll.poll_once(now + chrono::Duration::minutes(1)).await;
    assert_eq!(report.metrics_failed, 1);

    let body = scrape(&ScrapeServer::new(registry, "/stackmetrics")).await;
    assert!(body.contains("project_id=\"p\"} 5.0"));
}
