//! Well-known labels on exported discovery artifacts.
//!
//! Ownership of an EndpointSlice is decided by the management label, never
//! by naming conventions.

/// Standard Kubernetes label naming the controller that owns an EndpointSlice.
pub const LABEL_MANAGED_BY: &str = "endpointslice.kubernetes.io/managed-by";

/// Value set on every EndpointSlice managed by the Meshlink agent.
pub const VALUE_MANAGED_BY: &str = "meshlink-agent";

/// Cluster an exported EndpointSlice originates from.
pub const LABEL_SOURCE_CLUSTER: &str = "multicluster.meshlink.io/source-cluster";

/// Namespace an exported EndpointSlice originates from.
pub const LABEL_SOURCE_NAMESPACE: &str = "multicluster.meshlink.io/source-namespace";

/// Name of the exported Service an EndpointSlice belongs to.
pub const LABEL_SERVICE_NAME: &str = "multicluster.meshlink.io/service-name";
