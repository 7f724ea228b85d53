//! Agent-specific error types.
//!
//! This module defines error types specific to the export agent that are
//! not covered by upstream library errors.

use broker_client::BrokerError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the export agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Broker API error
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("resource watch failed: {0}")]
    Watch(String),
}
