//! Descriptor lookups for the registration pass.

use std::collections::HashMap;

use stackrelay_core::{MonitoringBackend, ResourceLabelSchema, Result, ValueKind};
use tracing::debug;

/// What a metric descriptor says about a metric type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// The value kind of the metric's points.
    pub kind: ValueKind,
    /// Resource types the metric is reported under.
    pub resource_types: Vec<String>,
    /// Human readable description.
    pub description: String,
}

/// Label schema and description of a resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    /// Sorted label keys.
    pub schema: ResourceLabelSchema,
    /// Human readable description.
    pub description: String,
}

/// Descriptor cache in front of a backend.
///
/// Resource descriptors are fetched at most once per resource type, since
/// most metrics of a service share the same few resource types.
#[derive(Debug)]
pub struct DescriptorCatalog<'a, B> {
    backend: &'a B,
    resources: HashMap<String, ResourceInfo>,
}

impl<'a, B: MonitoringBackend> DescriptorCatalog<'a, B> {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            resources: HashMap::new(),
        }
    }

    /// Classifies a metric type from its descriptor.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::RemoteApi` if the descriptor cannot be fetched.
    pub async fn classify(&self, metric_type: &str) -> Result<Classification> {
        let descriptor = self.backend.fetch_metric_descriptor(metric_type).await?;
        Ok(Classification {
            kind: descriptor.value_type,
            resource_types: descriptor.monitored_resource_types,
            description: descriptor.description,
        })
    }

    /// Returns the schema and description of a resource type.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::RemoteApi` if the descriptor cannot be fetched.
    pub async fn resource(&mut self, resource_type: &str) -> Result<ResourceInfo> {
        if let Some(info) = self.resources.get(resource_type) {
            return Ok(info.clone());
        }
        let descriptor = self.backend.fetch_resource_descriptor(resource_type).await?;
        let info = ResourceInfo {
            schema: descriptor.label_schema(),
            description: descriptor.description,
        };
        debug!(resource_type, labels = info.schema.len(), "cached resource descriptor");
        self.resources.insert(resource_type.to_string(), info.clone());
        Ok(info)
    }

    /// Returns the sorted label keys of a resource type.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::RemoteApi` if the descriptor cannot be fetched.
    pub async fn label_schema(&mut self, resource_type: &str) -> Result<ResourceLabelSchema> {
        Ok(self.resource(resource_type).await?.schema)
    }
}
