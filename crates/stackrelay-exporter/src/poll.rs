//! Continuous polling into the collector registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use stackrelay_core::{
    Distribution, HistogramData, MetricSpec, MonitoringBackend, Series, Shape, ValueKind,
    window_for_interval,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::registry::Collector;

/// Default tick of the poll loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// A metric to poll and the collectors its series land in.
#[derive(Debug, Clone)]
pub struct PollTarget {
    spec: MetricSpec,
    kind: ValueKind,
    lookback: chrono::Duration,
    collectors: HashMap<String, Arc<Collector>>,
}

impl PollTarget {
    /// Creates a target. `collectors` is keyed by resource type.
    #[must_use]
    pub const fn new(
        spec: MetricSpec,
        kind: ValueKind,
        lookback: chrono::Duration,
        collectors: HashMap<String, Arc<Collector>>,
    ) -> Self {
        Self {
            spec,
            kind,
            lookback,
            collectors,
        }
    }

    /// The metric type.
    #[must_use]
    pub fn metric_type(&self) -> &str {
        self.spec.metric_type()
    }

    /// The value kind from the metric descriptor.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Length of the window fetched each tick.
    #[must_use]
    pub const fn lookback(&self) -> chrono::Duration {
        self.lookback
    }

    /// The collector for a resource type, if one was registered.
    #[must_use]
    pub fn collector(&self, resource_type: &str) -> Option<&Arc<Collector>> {
        self.collectors.get(resource_type)
    }
}

/// Counters for one pass over the targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Targets fetched successfully.
    pub metrics_polled: usize,
    /// Targets whose fetch failed.
    pub metrics_failed: usize,
    /// Series returned across all targets.
    pub series_seen: usize,
    /// Values pushed into collectors.
    pub readings_pushed: usize,
    /// Pushed values that were zero because the point could not be mapped.
    pub unmapped: usize,
    /// Series without points or without a collector for their resource type.
    pub series_skipped: usize,
}

/// Background loop that refreshes collectors from the backend.
pub struct PollLoop<B> {
    backend: B,
    targets: Vec<PollTarget>,
    interval: Duration,
}

impl<B> std::fmt::Debug for PollLoop<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollLoop")
            .field("targets", &self.targets.len())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl<B: MonitoringBackend + 'static> PollLoop<B> {
    /// Creates a loop over `targets` with the default tick.
    #[must_use]
    pub fn new(backend: B, targets: Vec<PollTarget>) -> Self {
        Self {
            backend,
            targets,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the tick.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The targets, in poll order.
    #[must_use]
    pub fn targets(&self) -> &[PollTarget] {
        &self.targets
    }

    /// Spawns the loop on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Polls every tick, forever. The first tick fires immediately.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = self.poll_once(Utc::now()).await;
            info!(
                polled = report.metrics_polled,
                failed = report.metrics_failed,
                series = report.series_seen,
                pushed = report.readings_pushed,
                unmapped = report.unmapped,
                "poll tick complete"
            );
        }
    }

    /// Runs one pass over all targets as of `now`.
    ///
    /// A failure for one metric is logged and does not affect the others.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        for target in &self.targets {
            let metric_type = target.metric_type();

            let window = match window_for_interval(target.lookback, now) {
                Ok(window) => window,
                Err(e) => {
                    warn!(metric_type, error = %e, "cannot derive poll window");
                    report.metrics_failed += 1;
                    continue;
                }
            };

            let series = match self.backend.fetch_series(metric_type, &window).await {
                Ok(series) => series,
                Err(e) => {
                    warn!(metric_type, error = %e, "failed to fetch time series");
                    report.metrics_failed += 1;
                    continue;
                }
            };

            report.metrics_polled += 1;
            report.series_seen += series.len();
            for item in &series {
                apply(target, item, &mut report);
            }
        }

        report
    }
}

fn apply(target: &PollTarget, series: &Series, report: &mut TickReport) {
    let metric_type = target.metric_type();
    let Some(collector) = target.collector(series.resource_type()) else {
        debug!(
            metric_type,
            resource_type = series.resource_type(),
            "no collector for resource type"
        );
        report.series_skipped += 1;
        return;
    };
    let Some(point) = series.latest_point() else {
        report.series_skipped += 1;
        return;
    };

    let labels = collector.schema().pairs_for(&series.resource.labels);
    let mapped = match collector.shape() {
        Shape::Gauge => {
            let reading = target.kind().read(&point.value);
            collector.record(&labels, reading.or_zero());
            !reading.is_unmapped()
        }
        Shape::Histogram => {
            let data = point.value.distribution_value.as_ref().map(Distribution::histogram);
            let mapped = data.is_some();
            collector.record_histogram(&labels, data.unwrap_or_else(HistogramData::empty));
            mapped
        }
    };

    if !mapped {
        warn!(
            metric_type,
            kind = %target.kind(),
            resource_type = series.resource_type(),
            "unmapped point value, exposing 0"
        );
        report.unmapped += 1;
    }
    report.readings_pushed += 1;
}
