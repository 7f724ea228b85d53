//! ServiceImport CRD
//!
//! Cluster-agnostic aggregation of every cluster currently exporting a
//! given (namespace, name). Owned by the aggregation manager; each cluster
//! only ever merges or withdraws its own contribution record.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "multicluster.meshlink.io",
    version = "v1alpha1",
    kind = "ServiceImport",
    namespaced,
    status = "ServiceImportStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceImportSpec {
    /// How the imported service is addressed
    #[serde(rename = "type")]
    pub import_type: ImportType,

    /// Union of the exported ports across contributing clusters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ImportPort>,

    /// Cluster-set virtual IPs, assigned on the importing side
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,
}

/// Addressing mode of a ServiceImport
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ImportType {
    /// One virtual address per cluster (the exported cluster IP)
    ClusterSetIP,

    /// Per-backend addresses, no virtual IP
    Headless,
}

/// A single exported port definition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportPort {
    /// Port name, unique within the service when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// IP protocol, defaults to TCP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Port number
    pub port: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceImportStatus {
    /// Clusters currently contributing to this import
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<ClusterStatus>,
}

/// One cluster's contribution record
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Identifier of the contributing cluster
    pub cluster: String,
}
