//! Sync pipelines between the local cluster and the broker.
//!
//! Two independent one-way pipelines:
//! - Local to broker: EndpointSlices carrying this agent's management label
//!   are pushed to the broker under their source namespace. Ownership is an
//!   explicit label predicate; a foreign slice is silently ignored no
//!   matter how it is named.
//! - Broker to local: aggregated ServiceImports and other clusters'
//!   EndpointSlices are materialized locally as read-only copies, and local
//!   copies whose broker counterpart disappeared are pruned.

use crate::error::AgentError;
use broker_client::{BrokerClientTrait, BrokerError};
use crds::labels::{LABEL_MANAGED_BY, LABEL_SOURCE_CLUSTER, VALUE_MANAGED_BY};
use crds::ServiceImport;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ownership predicate: does this agent manage the slice?
#[must_use]
pub fn is_managed(slice: &EndpointSlice) -> bool {
    slice
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_MANAGED_BY))
        .is_some_and(|value| value == VALUE_MANAGED_BY)
}

/// Cluster a managed slice was exported from, if labeled.
#[must_use]
pub fn source_cluster(slice: &EndpointSlice) -> Option<&str> {
    slice
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_SOURCE_CLUSTER))
        .map(String::as_str)
}

/// Pushes a local EndpointSlice to the broker if this agent owns it and it
/// originated here. Returns false when the slice was filtered out.
pub async fn push_slice(
    broker: &dyn BrokerClientTrait,
    cluster_id: &str,
    slice: &EndpointSlice,
) -> Result<bool, BrokerError> {
    if !is_managed(slice) {
        debug!(
            "Ignoring EndpointSlice {:?}: not managed by this agent",
            slice.metadata.name
        );
        return Ok(false);
    }
    if source_cluster(slice) != Some(cluster_id) {
        // A materialized copy of another cluster's export; never echoed back
        return Ok(false);
    }

    broker.upsert_endpoint_slice(&broker_ready(slice)).await?;
    Ok(true)
}

/// Removes an exported slice from the broker; already gone counts as done.
pub async fn remove_slice(
    broker: &dyn BrokerClientTrait,
    namespace: &str,
    name: &str,
) -> Result<(), BrokerError> {
    match broker.delete_endpoint_slice(namespace, name).await {
        Ok(()) | Err(BrokerError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Strips cluster-local metadata before a slice leaves for the broker.
fn broker_ready(slice: &EndpointSlice) -> EndpointSlice {
    EndpointSlice {
        metadata: ObjectMeta {
            name: slice.metadata.name.clone(),
            namespace: slice.metadata.namespace.clone(),
            labels: slice.metadata.labels.clone(),
            ..Default::default()
        },
        address_type: slice.address_type.clone(),
        endpoints: slice.endpoints.clone(),
        ports: slice.ports.clone(),
    }
}

/// Bridges local cluster state and the broker.
pub struct Syncer {
    client: Client,
    broker: Arc<dyn BrokerClientTrait>,
    cluster_id: String,
}

impl Syncer {
    pub fn new(client: Client, broker: Arc<dyn BrokerClientTrait>, cluster_id: impl Into<String>) -> Self {
        Self {
            client,
            broker,
            cluster_id: cluster_id.into(),
        }
    }

    /// Local-to-broker push for one slice; see [`push_slice`].
    pub async fn push_local_slice(&self, slice: &EndpointSlice) -> Result<bool, BrokerError> {
        push_slice(self.broker.as_ref(), &self.cluster_id, slice).await
    }

    /// Removes this cluster's exported slice from the broker.
    pub async fn remove_broker_slice(&self, namespace: &str, name: &str) -> Result<(), BrokerError> {
        remove_slice(self.broker.as_ref(), namespace, name).await
    }

    /// Full pull from the broker: materializes every aggregated import and
    /// every other cluster's EndpointSlice locally, then prunes local
    /// copies whose broker counterpart is gone. Run periodically, this
    /// heals any events a watch may have dropped.
    pub async fn sync_from_broker(&self) -> Result<(), AgentError> {
        let imports = self.broker.list_service_imports().await.map_err(AgentError::Broker)?;
        let mut live_imports = HashSet::new();
        for import in &imports {
            if let (Some(namespace), Some(name)) = (&import.metadata.namespace, &import.metadata.name) {
                live_imports.insert((namespace.clone(), name.clone()));
            }
            if let Err(e) = self.apply_import(import).await {
                warn!("Failed to materialize ServiceImport locally: {}", e);
            }
        }

        let slices = self.broker.list_endpoint_slices().await.map_err(AgentError::Broker)?;
        let mut live_slices = HashSet::new();
        for slice in &slices {
            if !is_managed(slice) {
                continue;
            }
            if let (Some(namespace), Some(name)) = (&slice.metadata.namespace, &slice.metadata.name) {
                live_slices.insert((namespace.clone(), name.clone()));
            }
            if source_cluster(slice) == Some(self.cluster_id.as_str()) {
                // Our own export; the local original already exists
                continue;
            }
            if let Err(e) = self.apply_remote_slice(slice).await {
                warn!("Failed to materialize remote EndpointSlice locally: {}", e);
            }
        }

        self.prune_local_copies(&live_imports, &live_slices).await
    }

    /// Materializes one aggregated import as a local read-only copy.
    async fn apply_import(&self, import: &ServiceImport) -> Result<(), AgentError> {
        let namespace = import.metadata.namespace.as_deref().unwrap_or("default");
        let name = import
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| AgentError::InvalidConfig("ServiceImport missing name".to_string()))?;
        let api: Api<ServiceImport> = Api::namespaced(self.client.clone(), namespace);

        match api.get_opt(name).await? {
            Some(current) => {
                if current.spec != import.spec {
                    let patch = serde_json::json!({ "spec": import.spec });
                    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
                    debug!("Updated local ServiceImport {}/{}", namespace, name);
                }
                if current.status != import.status {
                    let patch = serde_json::json!({ "status": import.status });
                    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
                }
            }
            None => {
                let mut local = ServiceImport::new(name, import.spec.clone());
                local.metadata.namespace = Some(namespace.to_string());
                local.metadata.labels = Some(BTreeMap::from([(
                    LABEL_MANAGED_BY.to_string(),
                    VALUE_MANAGED_BY.to_string(),
                )]));
                api.create(&PostParams::default(), &local).await?;
                if import.status.is_some() {
                    let patch = serde_json::json!({ "status": import.status });
                    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
                }
                info!("Materialized ServiceImport {}/{} locally", namespace, name);
            }
        }
        Ok(())
    }

    /// Materializes another cluster's exported slice locally, carrying its
    /// source-cluster and source-namespace labels.
    async fn apply_remote_slice(&self, slice: &EndpointSlice) -> Result<(), AgentError> {
        let namespace = slice.metadata.namespace.as_deref().unwrap_or("default");
        let name = slice
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| AgentError::InvalidConfig("EndpointSlice missing name".to_string()))?;
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), namespace);
        let desired = broker_ready(slice);

        match api.get_opt(name).await? {
            Some(current) => {
                if current.endpoints == desired.endpoints
                    && current.ports == desired.ports
                    && current.address_type == desired.address_type
                    && current.metadata.labels == desired.metadata.labels
                {
                    return Ok(());
                }
                let mut replacement = desired;
                replacement.metadata.resource_version = current.metadata.resource_version;
                api.replace(name, &PostParams::default(), &replacement).await?;
                debug!("Updated materialized EndpointSlice {}/{}", namespace, name);
            }
            None => {
                api.create(&PostParams::default(), &desired).await?;
                info!("Materialized EndpointSlice {}/{} locally", namespace, name);
            }
        }
        Ok(())
    }

    /// Deletes local materialized copies that no longer exist on the broker.
    async fn prune_local_copies(
        &self,
        live_imports: &HashSet<(String, String)>,
        live_slices: &HashSet<(String, String)>,
    ) -> Result<(), AgentError> {
        let selector = format!("{LABEL_MANAGED_BY}={VALUE_MANAGED_BY}");
        let params = ListParams::default().labels(&selector);

        let slice_api: Api<EndpointSlice> = Api::all(self.client.clone());
        for slice in slice_api.list(&params).await?.items {
            let Some(cluster) = source_cluster(&slice) else {
                continue;
            };
            if cluster == self.cluster_id {
                // Our own exports are removed on unexport, not by the pull loop
                continue;
            }
            let (Some(namespace), Some(name)) = (slice.metadata.namespace.clone(), slice.metadata.name.clone())
            else {
                continue;
            };
            if !live_slices.contains(&(namespace.clone(), name.clone())) {
                info!("Pruning EndpointSlice {}/{}: withdrawn from the broker", namespace, name);
                let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), &namespace);
                if let Err(e) = api.delete(&name, &DeleteParams::default()).await {
                    warn!("Failed to prune EndpointSlice {}/{}: {}", namespace, name, e);
                }
            }
        }

        let import_api: Api<ServiceImport> = Api::all(self.client.clone());
        for import in import_api.list(&params).await?.items {
            let (Some(namespace), Some(name)) = (import.metadata.namespace.clone(), import.metadata.name.clone())
            else {
                continue;
            };
            if !live_imports.contains(&(namespace.clone(), name.clone())) {
                info!("Pruning ServiceImport {}/{}: withdrawn from the broker", namespace, name);
                let api: Api<ServiceImport> = Api::namespaced(self.client.clone(), &namespace);
                if let Err(e) = api.delete(&name, &DeleteParams::default()).await {
                    warn!("Failed to prune ServiceImport {}/{}: {}", namespace, name, e);
                }
            }
        }

        Ok(())
    }
}
