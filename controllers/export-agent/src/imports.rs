//! Cross-cluster ServiceImport aggregation.
//!
//! The aggregated import for a (namespace, name) is shared by every
//! cluster's agent, so it is only ever mutated through read-modify-write
//! against the broker with a conflict retry. The merge itself is a union
//! keyed by cluster identifier, so contributions from independently
//! reconciling clusters commute and replay order never matters.

use broker_client::{BrokerClientTrait, BrokerError};
use crds::{ClusterStatus, ImportPort, ImportType, ServiceImport, ServiceImportSpec, ServiceImportStatus};
use std::sync::Arc;
use tracing::{debug, info};

/// Conflict retry budget for a single upsert/withdraw.
const UPDATE_ATTEMPTS: u32 = 5;

/// Maintains this cluster's contribution records on the broker.
pub struct ImportManager {
    broker: Arc<dyn BrokerClientTrait>,
    cluster_id: String,
}

impl ImportManager {
    pub fn new(broker: Arc<dyn BrokerClientTrait>, cluster_id: impl Into<String>) -> Self {
        Self {
            broker,
            cluster_id: cluster_id.into(),
        }
    }

    /// Adds or confirms this cluster's contribution for (namespace, name).
    ///
    /// Creates the aggregated import on the first contribution; otherwise
    /// merges into the existing one without disturbing other clusters'
    /// entries. Lost write races are resolved by re-reading and retrying.
    pub async fn upsert_contribution(
        &self,
        namespace: &str,
        name: &str,
        import_type: ImportType,
        ports: &[ImportPort],
    ) -> Result<ServiceImport, BrokerError> {
        for _ in 0..UPDATE_ATTEMPTS {
            match self.broker.get_service_import(namespace, name).await {
                Ok(mut existing) => {
                    if !merge_contribution(&mut existing, &self.cluster_id, import_type, ports) {
                        debug!(
                            "ServiceImport {}/{} already reflects cluster {}",
                            namespace, name, self.cluster_id
                        );
                        return Ok(existing);
                    }
                    match self.broker.update_service_import(&existing).await {
                        Ok(updated) => {
                            info!(
                                "Merged cluster {} into ServiceImport {}/{}",
                                self.cluster_id, namespace, name
                            );
                            return Ok(updated);
                        }
                        Err(BrokerError::Conflict(reason)) => {
                            debug!(
                                "ServiceImport {}/{} changed concurrently ({}), retrying",
                                namespace, name, reason
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(BrokerError::NotFound(_)) => {
                    let fresh = new_import(namespace, name, &self.cluster_id, import_type, ports);
                    match self.broker.create_service_import(&fresh).await {
                        Ok(created) => {
                            info!("Created ServiceImport {}/{} for cluster {}", namespace, name, self.cluster_id);
                            return Ok(created);
                        }
                        // Another cluster created it first; merge into theirs
                        Err(BrokerError::Conflict(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(BrokerError::Conflict(format!(
            "gave up updating ServiceImport {namespace}/{name} after {UPDATE_ATTEMPTS} attempts"
        )))
    }

    /// Removes this cluster's contribution for (namespace, name).
    ///
    /// Deletes the aggregated import once the contribution set is empty;
    /// otherwise leaves the remaining clusters' entries untouched. A
    /// missing import counts as already withdrawn.
    pub async fn withdraw_contribution(&self, namespace: &str, name: &str) -> Result<(), BrokerError> {
        for _ in 0..UPDATE_ATTEMPTS {
            let mut existing = match self.broker.get_service_import(namespace, name).await {
                Ok(import) => import,
                Err(BrokerError::NotFound(_)) => return Ok(()),
                Err(e) => return Err(e),
            };

            if !remove_contribution(&mut existing, &self.cluster_id) {
                return Ok(());
            }

            let empty = existing
                .status
                .as_ref()
                .is_none_or(|status| status.clusters.is_empty());

            if empty {
                match self.broker.delete_service_import(namespace, name).await {
                    Ok(()) | Err(BrokerError::NotFound(_)) => {
                        info!("Deleted ServiceImport {}/{}: no contributing clusters left", namespace, name);
                        return Ok(());
                    }
                    Err(BrokerError::Conflict(_)) => {}
                    Err(e) => return Err(e),
                }
            } else {
                match self.broker.update_service_import(&existing).await {
                    Ok(_) => {
                        info!(
                            "Withdrew cluster {} from ServiceImport {}/{}",
                            self.cluster_id, namespace, name
                        );
                        return Ok(());
                    }
                    Err(BrokerError::Conflict(reason)) => {
                        debug!(
                            "ServiceImport {}/{} changed concurrently ({}), retrying",
                            namespace, name, reason
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Err(BrokerError::Conflict(format!(
            "gave up withdrawing from ServiceImport {namespace}/{name} after {UPDATE_ATTEMPTS} attempts"
        )))
    }
}

/// Builds the first revision of an aggregated import.
fn new_import(
    namespace: &str,
    name: &str,
    cluster_id: &str,
    import_type: ImportType,
    ports: &[ImportPort],
) -> ServiceImport {
    let mut import = ServiceImport::new(
        name,
        ServiceImportSpec {
            import_type,
            ports: ports.to_vec(),
            ips: Vec::new(),
        },
    );
    import.metadata.namespace = Some(namespace.to_string());
    import.status = Some(ServiceImportStatus {
        clusters: vec![ClusterStatus {
            cluster: cluster_id.to_string(),
        }],
    });
    import
}

/// Merges one cluster's contribution into an existing import.
///
/// Union over cluster entries and port definitions; commutative and
/// associative, so concurrent merges from different clusters converge
/// regardless of replay order. Returns true when anything changed.
pub(crate) fn merge_contribution(
    import: &mut ServiceImport,
    cluster_id: &str,
    import_type: ImportType,
    ports: &[ImportPort],
) -> bool {
    let mut changed = false;

    if import.spec.import_type != import_type {
        import.spec.import_type = import_type;
        changed = true;
    }

    for port in ports {
        if !import.spec.ports.contains(port) {
            import.spec.ports.push(port.clone());
            changed = true;
        }
    }

    let status = import.status.get_or_insert_with(ServiceImportStatus::default);
    if !status.clusters.iter().any(|c| c.cluster == cluster_id) {
        status.clusters.push(ClusterStatus {
            cluster: cluster_id.to_string(),
        });
        status.clusters.sort_by(|a, b| a.cluster.cmp(&b.cluster));
        changed = true;
    }

    changed
}

/// Drops one cluster's contribution record. Returns true when it was present.
pub(crate) fn remove_contribution(import: &mut ServiceImport, cluster_id: &str) -> bool {
    let Some(status) = import.status.as_mut() else {
        return false;
    };
    let before = status.clusters.len();
    status.clusters.retain(|c| c.cluster != cluster_id);
    status.clusters.len() != before
}
