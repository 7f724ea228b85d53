//! ServiceExport CRD
//!
//! Declares that the Service with the same namespace and name should be
//! made available to the other clusters of the cluster set.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "multicluster.meshlink.io",
    version = "v1alpha1",
    kind = "ServiceExport",
    namespaced,
    status = "ServiceExportStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceExportSpec {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceExportStatus {
    /// Observed export conditions, one entry per condition type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ExportCondition>,
}

/// A single status condition on a ServiceExport.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportCondition {
    /// Condition axis this entry reports on
    #[serde(rename = "type")]
    pub condition_type: ExportConditionType,

    /// Current state of the condition
    pub status: ConditionStatus,

    /// When the condition last changed state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Machine-readable reason for the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable detail for the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Condition axes tracked on a ServiceExport
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ExportConditionType {
    /// The referenced Service is eligible for export
    Valid,

    /// The aggregated import reflects this cluster's contribution
    Synced,
}

/// Kubernetes-style tri-state condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// The condition holds
    True,

    /// The condition does not hold
    False,

    /// The state of the condition cannot be determined
    #[default]
    Unknown,
}
