//! Data model and planning for the stackrelay Cloud Monitoring exporter.
//!
//! `stackrelay-core` holds everything the exporter needs that does not talk
//! to the network or to an exposition library:
//!
//! - **Plans**: parse `metricType|cron` entries into a deduplicated list of
//!   [`MetricSpec`]s
//! - **Schedules**: a five-field cron parser ([`Schedule`])
//! - **Windows**: derive `[start, end)` polling windows from a schedule or a
//!   fixed interval
//! - **Model**: series, descriptors, value kinds and label schemas mirroring
//!   the Cloud Monitoring v3 JSON shapes
//! - **Backend seam**: the [`MonitoringBackend`] trait and an in-memory
//!   implementation
//!
//! # Example
//!
//! ```rust
//! use stackrelay_core::{normalize, window_for_schedule, DEFAULT_SCHEDULE};
//! use chrono::{TimeZone, Utc};
//!
//! let plan = normalize(["a.b.com/x/y", "a.b.com/x/y|*/5 * * * *"]).unwrap();
//! assert_eq!(plan.len(), 1);
//! assert_eq!(plan[0].schedule_expr(), DEFAULT_SCHEDULE);
//!
//! let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 10, 0).unwrap();
//! let window = window_for_schedule(plan[0].schedule_expr(), now).unwrap();
//! assert_eq!(window.start(), Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backend;
pub mod error;
pub mod plan;
pub mod schedule;
pub mod types;
pub mod window;

// Re-export main types at crate root
pub use backend::{InMemoryBackend, MonitoringBackend};
pub use error::{RelayError, Result};
pub use plan::{DEFAULT_SCHEDULE, ENTRY_SEPARATOR, MetricSpec, normalize, parse_entry};
pub use schedule::Schedule;
pub use types::{
    CollectorKey, Distribution, HistogramData, LabelDescriptor, MetricDescriptor, MetricRef,
    MonitoredResource, Point, Reading, ResourceDescriptor, ResourceLabelSchema, Series, Shape,
    TimeInterval, TypedValue, ValueKind, Window, sanitize,
};
pub use window::{window_for, window_for_interval, window_for_schedule};
