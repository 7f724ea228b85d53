//! Kubernetes-backed broker client
//!
//! Talks to the broker cluster through a dedicated `kube::Client`. Broker
//! storage is partitioned by the artifact's original namespace; every call
//! addresses the Api handle for that namespace.

use crate::broker_trait::BrokerClientTrait;
use crate::error::BrokerError;
use crds::ServiceImport;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

/// Broker client backed by a `kube::Client` for the broker cluster.
#[derive(Clone)]
pub struct KubeBrokerClient {
    client: Client,
}

impl KubeBrokerClient {
    /// Creates a client from an already-configured connection to the broker.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn imports(&self, namespace: &str) -> Api<ServiceImport> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn slices(&self, namespace: &str) -> Api<EndpointSlice> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Extracts the (namespace, name) key a broker-bound resource is stored under.
fn stored_key(metadata: &ObjectMeta) -> Result<(String, String), BrokerError> {
    match (&metadata.namespace, &metadata.name) {
        (Some(namespace), Some(name)) => Ok((namespace.clone(), name.clone())),
        _ => Err(BrokerError::InvalidRequest(
            "broker resources must carry namespace and name".to_string(),
        )),
    }
}

/// Maps Kubernetes API failures onto the broker error taxonomy.
fn classify(err: kube::Error, what: &str) -> BrokerError {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => BrokerError::NotFound(format!("{what}: {}", resp.message)),
        kube::Error::Api(resp) if resp.code == 409 => BrokerError::Conflict(format!("{what}: {}", resp.message)),
        _ => BrokerError::Api(err),
    }
}

#[async_trait::async_trait]
impl BrokerClientTrait for KubeBrokerClient {
    async fn get_service_import(&self, namespace: &str, name: &str) -> Result<ServiceImport, BrokerError> {
        self.imports(namespace)
            .get(name)
            .await
            .map_err(|e| classify(e, &format!("get ServiceImport {namespace}/{name}")))
    }

    async fn create_service_import(&self, import: &ServiceImport) -> Result<ServiceImport, BrokerError> {
        let (namespace, name) = stored_key(&import.metadata)?;
        let api = self.imports(&namespace);
        let created = api
            .create(&PostParams::default(), import)
            .await
            .map_err(|e| classify(e, &format!("create ServiceImport {namespace}/{name}")))?;
        debug!("Created ServiceImport {}/{} on the broker", namespace, name);

        // The contribution records live in the status subresource; the
        // conditional write above reserves the key, the status follows.
        if import.status.is_some() {
            let patch = serde_json::json!({ "status": import.status });
            return api
                .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|e| classify(e, &format!("write ServiceImport {namespace}/{name} status")));
        }
        Ok(created)
    }

    async fn update_service_import(&self, import: &ServiceImport) -> Result<ServiceImport, BrokerError> {
        let (namespace, name) = stored_key(&import.metadata)?;
        let api = self.imports(&namespace);
        api.replace(&name, &PostParams::default(), import)
            .await
            .map_err(|e| classify(e, &format!("update ServiceImport {namespace}/{name}")))?;

        let patch = serde_json::json!({ "status": import.status });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(e, &format!("write ServiceImport {namespace}/{name} status")))
    }

    async fn delete_service_import(&self, namespace: &str, name: &str) -> Result<(), BrokerError> {
        self.imports(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| classify(e, &format!("delete ServiceImport {namespace}/{name}")))
    }

    async fn list_service_imports(&self) -> Result<Vec<ServiceImport>, BrokerError> {
        let api: Api<ServiceImport> = Api::all(self.client.clone());
        Ok(api
            .list(&ListParams::default())
            .await
            .map_err(|e| classify(e, "list ServiceImports"))?
            .items)
    }

    async fn upsert_endpoint_slice(&self, slice: &EndpointSlice) -> Result<EndpointSlice, BrokerError> {
        let (namespace, name) = stored_key(&slice.metadata)?;
        let api = self.slices(&namespace);
        match api
            .get_opt(&name)
            .await
            .map_err(|e| classify(e, &format!("get EndpointSlice {namespace}/{name}")))?
        {
            Some(current) => {
                let mut replacement = slice.clone();
                replacement.metadata.resource_version = current.metadata.resource_version;
                api.replace(&name, &PostParams::default(), &replacement)
                    .await
                    .map_err(|e| classify(e, &format!("update EndpointSlice {namespace}/{name}")))
            }
            None => api
                .create(&PostParams::default(), slice)
                .await
                .map_err(|e| classify(e, &format!("create EndpointSlice {namespace}/{name}"))),
        }
    }

    async fn delete_endpoint_slice(&self, namespace: &str, name: &str) -> Result<(), BrokerError> {
        self.slices(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| classify(e, &format!("delete EndpointSlice {namespace}/{name}")))
    }

    async fn list_endpoint_slices(&self) -> Result<Vec<EndpointSlice>, BrokerError> {
        let api: Api<EndpointSlice> = Api::all(self.client.clone());
        Ok(api
            .list(&ListParams::default())
            .await
            .map_err(|e| classify(e, "list EndpointSlices"))?
            .items)
    }
}
