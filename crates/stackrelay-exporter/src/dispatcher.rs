//! Cron-driven JSON snapshot jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use stackrelay_core::{MetricSpec, MonitoringBackend, Result, window_for};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::snapshot::write_snapshot;

/// Source of the current time for scheduling.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Runs one snapshot job per schedule fire for every plan entry.
pub struct SnapshotDispatcher<B> {
    backend: Arc<B>,
    output_dir: PathBuf,
    plan: Vec<MetricSpec>,
    clock: Clock,
}

impl<B> std::fmt::Debug for SnapshotDispatcher<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotDispatcher")
            .field("output_dir", &self.output_dir)
            .field("entries", &self.plan.len())
            .finish_non_exhaustive()
    }
}

impl<B: MonitoringBackend + 'static> SnapshotDispatcher<B> {
    /// Creates a dispatcher writing into `output_dir`.
    #[must_use]
    pub fn new(backend: Arc<B>, output_dir: impl Into<PathBuf>, plan: Vec<MetricSpec>) -> Self {
        Self {
            backend,
            output_dir: output_dir.into(),
            plan,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the wall clock used to compute fire times.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Spawns one scheduling task per plan entry.
    ///
    /// Each task sleeps until its entry's next fire, then spawns a job and
    /// goes back to sleep, so slow jobs may overlap later ones.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let dir = Arc::new(self.output_dir);
        self.plan
            .into_iter()
            .map(|spec| {
                let backend = Arc::clone(&self.backend);
                let dir = Arc::clone(&dir);
                tokio::spawn(schedule_entry(backend, dir, spec, Arc::clone(&self.clock)))
            })
            .collect()
    }
}

async fn schedule_entry<B: MonitoringBackend + 'static>(
    backend: Arc<B>,
    dir: Arc<PathBuf>,
    spec: MetricSpec,
    clock: Clock,
) {
    info!(
        metric_type = spec.metric_type(),
        schedule = spec.schedule_expr(),
        "scheduled snapshots"
    );
    let spec = Arc::new(spec);

    loop {
        let now = clock();
        let fire_at = match spec.schedule().next_after(now) {
            Ok(t) => t,
            Err(e) => {
                error!(metric_type = spec.metric_type(), error = %e, "schedule stopped");
                return;
            }
        };
        tokio::time::sleep((fire_at - now).to_std().unwrap_or_default()).await;

        let backend = Arc::clone(&backend);
        let dir = Arc::clone(&dir);
        let spec = Arc::clone(&spec);
        tokio::spawn(async move {
            match run_job(&*backend, &dir, &spec, fire_at).await {
                Ok(path) => debug!(path = %path.display(), "snapshot complete"),
                Err(e) => warn!(
                    metric_type = spec.metric_type(),
                    error = %e,
                    "snapshot failed"
                ),
            }
        });
    }
}

/// Fetches the window ending at `fired_at` and writes it to a snapshot.
///
/// # Errors
///
/// Returns `RelayError::DegenerateWindow` when the next fire is less than
/// a minute after `fired_at`, and any fetch or write error.
pub async fn run_job<B: MonitoringBackend>(
    backend: &B,
    dir: &Path,
    spec: &MetricSpec,
    fired_at: DateTime<Utc>,
) -> Result<PathBuf> {
    let window = window_for(spec.schedule(), fired_at)?;
    let series = backend.fetch_series(spec.metric_type(), &window).await?;
    info!(
        metric_type = spec.metric_type(),
        series = series.len(),
        start = %window.start(),
        end = %window.end(),
        "fetched snapshot window"
    );
    write_snapshot(dir, spec.metric_type(), &window, &series).await
}
