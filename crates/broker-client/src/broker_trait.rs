//! BrokerClientTrait for mocking
//!
//! This trait abstracts the broker API to enable mocking in unit tests.
//! The concrete KubeBrokerClient implements this trait, and tests can use
//! the in-memory MockBrokerClient instead of a live broker cluster.

use crate::error::BrokerError;
use crds::ServiceImport;
use k8s_openapi::api::discovery::v1::EndpointSlice;

/// Operations against the broker cluster
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait BrokerClientTrait: Send + Sync {
    // Aggregated service imports

    async fn get_service_import(&self, namespace: &str, name: &str) -> Result<ServiceImport, BrokerError>;

    /// Fails with `Conflict` when an import with the same key already exists.
    async fn create_service_import(&self, import: &ServiceImport) -> Result<ServiceImport, BrokerError>;

    /// Conditional replace; fails with `Conflict` when the stored
    /// resourceVersion moved on since the import was read.
    async fn update_service_import(&self, import: &ServiceImport) -> Result<ServiceImport, BrokerError>;

    async fn delete_service_import(&self, namespace: &str, name: &str) -> Result<(), BrokerError>;

    async fn list_service_imports(&self) -> Result<Vec<ServiceImport>, BrokerError>;

    // Exported endpoint slices

    /// Creates or overwrites an exported EndpointSlice. Slice content has a
    /// single writer (the exporting cluster), so no conditional check is needed.
    async fn upsert_endpoint_slice(&self, slice: &EndpointSlice) -> Result<EndpointSlice, BrokerError>;

    async fn delete_endpoint_slice(&self, namespace: &str, name: &str) -> Result<(), BrokerError>;

    async fn list_endpoint_slices(&self) -> Result<Vec<EndpointSlice>, BrokerError>;
}
