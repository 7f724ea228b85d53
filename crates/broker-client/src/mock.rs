//! Mock broker client for unit testing
//!
//! In-memory implementation of `BrokerClientTrait` that mimics the broker's
//! semantics without a live cluster: namespace-partitioned storage,
//! resourceVersion-checked conditional updates for ServiceImports, and
//! injectable transient failures and write conflicts for exercising the
//! retry paths.

use crate::broker_trait::BrokerClientTrait;
use crate::error::BrokerError;
use crds::ServiceImport;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock broker client for testing
#[derive(Clone, Default)]
pub struct MockBrokerClient {
    // In-memory storage, keyed by (namespace, name)
    imports: Arc<Mutex<HashMap<(String, String), ServiceImport>>>,
    slices: Arc<Mutex<HashMap<(String, String), EndpointSlice>>>,
    // Counter for generating resourceVersions
    next_version: Arc<Mutex<u64>>,
    // Failure injection budgets
    unavailable_calls: Arc<Mutex<u32>>,
    conflict_updates: Arc<Mutex<u32>>,
}

impl MockBrokerClient {
    /// Create a new empty mock broker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `calls` broker operations fail as unavailable
    pub fn inject_unavailable(&self, calls: u32) {
        *self.unavailable_calls.lock().unwrap() = calls;
    }

    /// Make the next `updates` ServiceImport updates fail with a conflict
    pub fn inject_conflicts(&self, updates: u32) {
        *self.conflict_updates.lock().unwrap() = updates;
    }

    /// Fetch a stored ServiceImport without going through the trait
    #[must_use]
    pub fn service_import(&self, namespace: &str, name: &str) -> Option<ServiceImport> {
        self.imports
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Fetch a stored EndpointSlice without going through the trait
    #[must_use]
    pub fn endpoint_slice(&self, namespace: &str, name: &str) -> Option<EndpointSlice> {
        self.slices
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of ServiceImports currently stored
    #[must_use]
    pub fn import_count(&self) -> usize {
        self.imports.lock().unwrap().len()
    }

    /// Number of EndpointSlices currently stored
    #[must_use]
    pub fn slice_count(&self) -> usize {
        self.slices.lock().unwrap().len()
    }

    fn bump_version(&self) -> String {
        let mut version = self.next_version.lock().unwrap();
        *version += 1;
        version.to_string()
    }

    fn take_unavailable(&self) -> Result<(), BrokerError> {
        let mut budget = self.unavailable_calls.lock().unwrap();
        if *budget > 0 {
            *budget -= 1;
            return Err(BrokerError::Unavailable("injected broker outage".to_string()));
        }
        Ok(())
    }

    fn take_conflict(&self) -> bool {
        let mut budget = self.conflict_updates.lock().unwrap();
        if *budget > 0 {
            *budget -= 1;
            return true;
        }
        false
    }
}

fn stored_key(metadata: &ObjectMeta) -> Result<(String, String), BrokerError> {
    match (&metadata.namespace, &metadata.name) {
        (Some(namespace), Some(name)) => Ok((namespace.clone(), name.clone())),
        _ => Err(BrokerError::InvalidRequest(
            "broker resources must carry namespace and name".to_string(),
        )),
    }
}

#[async_trait::async_trait]
impl BrokerClientTrait for MockBrokerClient {
    async fn get_service_import(&self, namespace: &str, name: &str) -> Result<ServiceImport, BrokerError> {
        self.take_unavailable()?;
        self.imports
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(format!("ServiceImport {namespace}/{name} not found")))
    }

    async fn create_service_import(&self, import: &ServiceImport) -> Result<ServiceImport, BrokerError> {
        self.take_unavailable()?;
        let key = stored_key(&import.metadata)?;
        let mut imports = self.imports.lock().unwrap();
        if imports.contains_key(&key) {
            return Err(BrokerError::Conflict(format!(
                "ServiceImport {}/{} already exists",
                key.0, key.1
            )));
        }
        let mut stored = import.clone();
        stored.metadata.resource_version = Some(self.bump_version());
        imports.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update_service_import(&self, import: &ServiceImport) -> Result<ServiceImport, BrokerError> {
        self.take_unavailable()?;
        let key = stored_key(&import.metadata)?;
        if self.take_conflict() {
            return Err(BrokerError::Conflict(format!(
                "injected conflict on ServiceImport {}/{}",
                key.0, key.1
            )));
        }
        let mut imports = self.imports.lock().unwrap();
        let current = imports
            .get(&key)
            .ok_or_else(|| BrokerError::NotFound(format!("ServiceImport {}/{} not found", key.0, key.1)))?;
        if current.metadata.resource_version != import.metadata.resource_version {
            return Err(BrokerError::Conflict(format!(
                "ServiceImport {}/{} was modified concurrently",
                key.0, key.1
            )));
        }
        let mut stored = import.clone();
        stored.metadata.resource_version = Some(self.bump_version());
        imports.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete_service_import(&self, namespace: &str, name: &str) -> Result<(), BrokerError> {
        self.take_unavailable()?;
        self.imports
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| BrokerError::NotFound(format!("ServiceImport {namespace}/{name} not found")))
    }

    async fn list_service_imports(&self) -> Result<Vec<ServiceImport>, BrokerError> {
        self.take_unavailable()?;
        Ok(self.imports.lock().unwrap().values().cloned().collect())
    }

    async fn upsert_endpoint_slice(&self, slice: &EndpointSlice) -> Result<EndpointSlice, BrokerError> {
        self.take_unavailable()?;
        let key = stored_key(&slice.metadata)?;
        let mut stored = slice.clone();
        stored.metadata.resource_version = Some(self.bump_version());
        self.slices.lock().unwrap().insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete_endpoint_slice(&self, namespace: &str, name: &str) -> Result<(), BrokerError> {
        self.take_unavailable()?;
        self.slices
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| BrokerError::NotFound(format!("EndpointSlice {namespace}/{name} not found")))
    }

    async fn list_endpoint_slices(&self) -> Result<Vec<EndpointSlice>, BrokerError> {
        self.take_unavailable()?;
        Ok(self.slices.lock().unwrap().values().cloned().collect())
    }
}
