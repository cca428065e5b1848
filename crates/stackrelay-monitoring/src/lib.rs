//! Cloud Monitoring v3 client for stackrelay.
//!
//! Implements [`stackrelay_core::MonitoringBackend`] over the public REST
//! API: time series listing with pagination, metric descriptors and
//! monitored resource descriptors. Authentication uses either a fixed
//! bearer token or the GCE metadata server.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod client;
pub mod error;

pub use auth::{Credentials, METADATA_TOKEN_URL, TokenProvider};
pub use client::{ClientConfig, DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT, StackdriverClient};
pub use error::{ClientError, ClientResult};
