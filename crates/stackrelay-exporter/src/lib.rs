//! Cloud Monitoring exporter.
//!
//! Two ways to republish Cloud Monitoring time series:
//!
//! - **JSON**: one task per plan entry fires on the entry's cron schedule
//!   and writes the window's series to a newline-delimited JSON file
//!   ([`dispatcher`], [`snapshot`])
//! - **Prometheus**: a one-time registration pass creates a gauge or
//!   histogram family per metric and resource type ([`registry`]), a
//!   background loop refreshes them ([`poll`]) and an axum server exposes
//!   them ([`server`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod poll;
pub mod registry;
pub mod server;
pub mod snapshot;

pub use catalog::{Classification, DescriptorCatalog, ResourceInfo};
pub use config::{ExporterConfig, OutputMode};
pub use dispatcher::SnapshotDispatcher;
pub use error::{ExporterError, ExporterResult};
pub use poll::{PollLoop, PollTarget, TickReport};
pub use registry::{Collector, CollectorRegistry, DistributionFamily, Registration, register_plan};
pub use server::ScrapeServer;
pub use snapshot::{snapshot_path, validate_output_dir, write_snapshot};
