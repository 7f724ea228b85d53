//! ServiceExport reconciler
//!
//! Converges one (namespace, name) on every event from any of the three
//! watched streams: re-validate, recompute the contribution, recompute the
//! exported slice, then write the conditions, in that order, so the status
//! always reflects the most recent attempt.

use super::{conditions_status_patch, retry_broker, Reconciler};
use crate::error::AgentError;
use crate::validate::{self, ExportMode};
use crate::{aggregator, conditions};
use crds::{ConditionStatus, ExportCondition, ExportConditionType, ImportType, ServiceExport};
use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use tracing::{debug, info};

impl Reconciler {
    pub async fn reconcile_service_export(&self, export: &ServiceExport) -> Result<(), AgentError> {
        let name = export
            .metadata
            .name
            .as_ref()
            .ok_or_else(|| AgentError::InvalidConfig("ServiceExport missing name".to_string()))?;
        let namespace = export.metadata.namespace.as_deref().unwrap_or("default");
        let resource_key = format!("{}/{}", namespace, name);

        info!("Reconciling ServiceExport {}/{}", namespace, name);

        let mut conds: Vec<ExportCondition> = export
            .status
            .as_ref()
            .map(|status| status.conditions.clone())
            .unwrap_or_default();
        let mut changed = false;

        let service_api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let Some(service) = service_api.get_opt(name).await? else {
            // No backing Service: withdraw whatever this cluster contributed.
            self.unexport(namespace, name).await?;

            let prior_synced = conditions::find(&conds, ExportConditionType::Synced);
            let was_synced = prior_synced.is_some_and(|c| c.status == ConditionStatus::True);
            // Keep NoServiceImport sticky across resyncs after a withdrawal
            let already_withdrawn = prior_synced.is_some_and(|c| {
                c.reason.as_deref() == Some(conditions::REASON_NO_SERVICE_IMPORT)
            });
            let (reason, message) = if was_synced || already_withdrawn {
                (
                    conditions::REASON_NO_SERVICE_IMPORT,
                    format!("Service {namespace}/{name} was deleted; the export has been withdrawn"),
                )
            } else {
                (
                    conditions::REASON_SERVICE_UNAVAILABLE,
                    format!("Service {namespace}/{name} does not exist yet"),
                )
            };
            changed |= conditions::upsert(
                &mut conds,
                conditions::synced(ConditionStatus::False, Some(reason), Some(&message)),
            );
            if changed {
                self.patch_conditions(namespace, name, &conds).await?;
            }
            return Ok(());
        };

        let mode = match validate::export_mode(&service) {
            Ok(mode) => mode,
            Err(rejection) => {
                // Permanent for this Service revision; re-evaluated only on
                // the next observed Service change.
                let previously_synced =
                    conditions::find(&conds, ExportConditionType::Synced).is_some();
                self.unexport(namespace, name).await?;

                changed |= conditions::upsert(
                    &mut conds,
                    conditions::valid(
                        ConditionStatus::False,
                        Some(rejection.reason()),
                        Some(&rejection.message()),
                    ),
                );
                if previously_synced {
                    changed |= conditions::upsert(
                        &mut conds,
                        conditions::synced(
                            ConditionStatus::False,
                            Some(conditions::REASON_NO_SERVICE_IMPORT),
                            Some("The service is no longer exported"),
                        ),
                    );
                }
                if changed {
                    self.patch_conditions(namespace, name, &conds).await?;
                }
                return Ok(());
            }
        };

        changed |= conditions::upsert(
            &mut conds,
            conditions::valid(ConditionStatus::True, None, Some("Service is eligible for export")),
        );

        let endpoints_api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        let endpoints = endpoints_api.get_opt(name).await?;

        let import_type = match mode {
            ExportMode::ClusterSetIp => ImportType::ClusterSetIP,
            ExportMode::Headless => ImportType::Headless,
        };
        let ports = aggregator::import_ports(&service);

        let mut failure = None;
        match retry_broker(
            || self.imports.upsert_contribution(namespace, name, import_type, &ports),
            "upsert ServiceImport contribution",
        )
        .await
        {
            Ok(_) => {
                let slice = aggregator::exported_slice(&service, endpoints.as_ref(), mode, &self.cluster_id);
                self.apply_local_slice(&slice).await?;
                if let Err(e) = retry_broker(
                    || self.syncer.push_local_slice(&slice),
                    "push EndpointSlice to broker",
                )
                .await
                {
                    failure = Some(e);
                }
            }
            Err(e) => failure = Some(e),
        }

        match failure {
            None => {
                changed |= conditions::upsert(
                    &mut conds,
                    conditions::synced(
                        ConditionStatus::True,
                        None,
                        Some("Service was successfully exported to the broker"),
                    ),
                );
                if changed {
                    self.patch_conditions(namespace, name, &conds).await?;
                }
                self.reset_error(&resource_key);
                Ok(())
            }
            Some(e) => {
                // The retry budget is spent; surface the failure instead of
                // leaving the status claiming an export that never landed.
                changed |= conditions::upsert(
                    &mut conds,
                    conditions::synced(
                        ConditionStatus::False,
                        Some(conditions::REASON_EXPORT_FAILED),
                        Some(&format!("Failed to sync to the broker: {e}")),
                    ),
                );
                if changed {
                    self.patch_conditions(namespace, name, &conds).await?;
                }
                self.increment_error(&resource_key);
                Err(AgentError::Broker(e))
            }
        }
    }

    /// Finalizer path: a deleted ServiceExport always completes the
    /// withdrawal, even when deletion lands mid-reconciliation.
    pub async fn cleanup_service_export(&self, export: &ServiceExport) -> Result<(), AgentError> {
        let name = export
            .metadata
            .name
            .as_ref()
            .ok_or_else(|| AgentError::InvalidConfig("ServiceExport missing name".to_string()))?;
        let namespace = export.metadata.namespace.as_deref().unwrap_or("default");

        info!("Unexporting ServiceExport {}/{}", namespace, name);
        self.unexport(namespace, name).await
    }

    /// Withdraws this cluster's contribution and removes the exported
    /// endpoint artifacts, on the broker and locally.
    async fn unexport(&self, namespace: &str, name: &str) -> Result<(), AgentError> {
        retry_broker(
            || self.imports.withdraw_contribution(namespace, name),
            "withdraw ServiceImport contribution",
        )
        .await
        .map_err(AgentError::Broker)?;

        let slice_name = aggregator::slice_name(name, &self.cluster_id);
        retry_broker(
            || self.syncer.remove_broker_slice(namespace, &slice_name),
            "remove broker EndpointSlice",
        )
        .await
        .map_err(AgentError::Broker)?;

        self.delete_local_slice(namespace, &slice_name).await
    }

    /// Creates or updates the locally published EndpointSlice. Skips the
    /// write when nothing changed so status-only churn does not ripple.
    async fn apply_local_slice(&self, slice: &EndpointSlice) -> Result<(), AgentError> {
        let namespace = slice.metadata.namespace.as_deref().unwrap_or("default");
        let name = slice
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| AgentError::InvalidConfig("EndpointSlice missing name".to_string()))?;
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), namespace);

        match api.get_opt(name).await? {
            Some(current) => {
                if current.endpoints == slice.endpoints
                    && current.ports == slice.ports
                    && current.metadata.labels == slice.metadata.labels
                {
                    debug!("EndpointSlice {}/{} already up to date", namespace, name);
                    return Ok(());
                }
                let mut replacement = slice.clone();
                replacement.metadata.resource_version = current.metadata.resource_version;
                api.replace(name, &PostParams::default(), &replacement).await?;
                debug!("Updated EndpointSlice {}/{}", namespace, name);
            }
            None => {
                api.create(&PostParams::default(), slice).await?;
                info!("Created EndpointSlice {}/{}", namespace, name);
            }
        }
        Ok(())
    }

    async fn delete_local_slice(&self, namespace: &str, name: &str) -> Result<(), AgentError> {
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!("Deleted EndpointSlice {}/{}", namespace, name);
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(AgentError::Kube(e)),
        }
    }

    async fn patch_conditions(
        &self,
        namespace: &str,
        name: &str,
        conds: &[ExportCondition],
    ) -> Result<(), AgentError> {
        let api: Api<ServiceExport> = Api::namespaced(self.client.clone(), namespace);
        let patch = conditions_status_patch(conds);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!("Updated ServiceExport {}/{} status conditions", namespace, name);
        Ok(())
    }
}
