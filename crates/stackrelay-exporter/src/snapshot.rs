//! Newline-delimited JSON snapshot files.
//!
//! One file per metric per window. Each line is one series serialized
//! exactly as fetched, so fields the exporter does not model survive.

use std::path::{Path, PathBuf};

use stackrelay_core::{RelayError, Result, Series, Window, sanitize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Path of the snapshot for `metric_type` over `window`.
///
/// The file name is the metric type with every character outside
/// `[A-Za-z0-9_]` replaced by `-`, followed by the window's start and end
/// in Unix seconds.
#[must_use]
pub fn snapshot_path(dir: &Path, metric_type: &str, window: &Window) -> PathBuf {
    dir.join(format!(
        "{}_{}_{}.json",
        sanitize(metric_type, '-'),
        window.start().timestamp(),
        window.end().timestamp()
    ))
}

/// Writes one JSON line per series, in order, and returns the file path.
///
/// An existing file at the same path is truncated. A failure part way
/// through leaves a partial file behind.
///
/// # Errors
///
/// Returns `RelayError::Io` if the file cannot be created or written and
/// `RelayError::Serialization` if a series cannot be encoded.
pub async fn write_snapshot(
    dir: &Path,
    metric_type: &str,
    window: &Window,
    series: &[Series],
) -> Result<PathBuf> {
    let path = snapshot_path(dir, metric_type, window);
    let mut file = tokio::fs::File::create(&path).await?;

    for item in series {
        let mut line = serde_json::to_vec(item)?;
        line.push(b'\n');
        file.write_all(&line).await?;
    }
    file.flush().await?;

    debug!(path = %path.display(), series = series.len(), "wrote snapshot");
    Ok(path)
}

/// Checks that `dir` exists and is a directory.
///
/// # Errors
///
/// Returns `RelayError::Configuration` otherwise.
pub fn validate_output_dir(dir: &Path) -> Result<()> {
    match std::fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(RelayError::configuration(format!(
            "output path {} is not a directory",
            dir.display()
        ))),
        Err(e) => Err(RelayError::configuration(format!(
            "output path {} is not accessible: {e}",
            dir.display()
        ))),
    }
}
