//! Broker client errors

use thiserror::Error;

/// Errors that can occur when interacting with the broker cluster API
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Underlying Kubernetes API error
    #[error("broker API error: {0}")]
    Api(#[source] kube::Error),

    /// Resource not found on the broker
    #[error("not found: {0}")]
    NotFound(String),

    /// Conditional write lost against a concurrent writer
    #[error("conflict: {0}")]
    Conflict(String),

    /// Broker unreachable or temporarily failing
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// Invalid request (e.g., missing required metadata)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
