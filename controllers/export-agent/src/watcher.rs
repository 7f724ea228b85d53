//! Kubernetes resource watchers.
//!
//! One kube_runtime Controller drives ServiceExport reconciliation; Service
//! and Endpoints events are mapped onto the ServiceExport with the same
//! namespace and name, so all three event streams for a key funnel into a
//! single serialized reconcile while unrelated keys proceed in parallel.
//! A second Controller keeps locally published EndpointSlices pushed to
//! the broker.

use crate::error::AgentError;
use crate::reconciler::Reconciler;
use crate::syncer::Syncer;
use crds::ServiceExport;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig, Controller};
use kube_runtime::finalizer::{finalizer, Error as FinalizerError, Event as FinalizerEvent};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::watcher;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Periodic resync for exports; heals events the watch may have dropped.
const RESYNC: Duration = Duration::from_secs(120);

/// Guarantees the unexport path runs before a ServiceExport is removed.
const EXPORT_FINALIZER: &str = "multicluster.meshlink.io/unexport";

/// Starts watching ServiceExport, Service and Endpoints resources.
pub async fn watch_service_exports(
    reconciler: Arc<Reconciler>,
    client: Client,
    namespace: Option<String>,
) -> Result<(), AgentError> {
    info!("Starting ServiceExport watcher");

    let (exports, services, endpoints) = match namespace.as_deref() {
        Some(ns) => (
            Api::<ServiceExport>::namespaced(client.clone(), ns),
            Api::<Service>::namespaced(client.clone(), ns),
            Api::<Endpoints>::namespaced(client.clone(), ns),
        ),
        None => (
            Api::<ServiceExport>::all(client.clone()),
            Api::<Service>::all(client.clone()),
            Api::<Endpoints>::all(client),
        ),
    };

    // Debounce batches the endpoint churn bursts; concurrency bounds the
    // worker pool while per-key ordering stays guaranteed.
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(4);

    let error_policy = |export: Arc<ServiceExport>,
                        err: &FinalizerError<AgentError>,
                        ctx: Arc<Reconciler>| {
        let key = format!("{}/{}", export.namespace().unwrap_or_default(), export.name_any());
        let (delay, errors) = ctx.backoff_for_resource(&key);
        error!(
            "Reconciliation error for ServiceExport {} ({} consecutive errors): {}",
            key, errors, err
        );
        Action::requeue(delay)
    };

    let reconcile = |export: Arc<ServiceExport>, ctx: Arc<Reconciler>| async move {
        let namespace = export.namespace().unwrap_or_else(|| "default".to_string());
        debug!("Reconciling ServiceExport {}/{}", namespace, export.name_any());

        let api: Api<ServiceExport> = Api::namespaced(ctx.client(), &namespace);
        let task_ctx = ctx.clone();
        finalizer(&api, EXPORT_FINALIZER, export, move |event| async move {
            match event {
                FinalizerEvent::Apply(export) => {
                    task_ctx.reconcile_service_export(&export).await?;
                    Ok(Action::requeue(RESYNC))
                }
                FinalizerEvent::Cleanup(export) => {
                    task_ctx.cleanup_service_export(&export).await?;
                    Ok(Action::await_change())
                }
            }
        })
        .await
    };

    Controller::new(exports, watcher::Config::default())
        .with_config(controller_config)
        .watches(services, watcher::Config::default(), |service: Service| {
            let name = service.metadata.name?;
            let namespace = service.metadata.namespace?;
            Some(ObjectRef::new(&name).within(&namespace))
        })
        .watches(endpoints, watcher::Config::default(), |endpoints: Endpoints| {
            let name = endpoints.metadata.name?;
            let namespace = endpoints.metadata.namespace?;
            Some(ObjectRef::new(&name).within(&namespace))
        })
        .run(reconcile, error_policy, reconciler)
        .for_each(|result| async move {
            if let Err(e) = result {
                error!("Controller error for ServiceExport: {}", e);
            }
        })
        .await;

    Ok(())
}

/// Starts watching local EndpointSlices for the local-to-broker pipeline.
///
/// The ownership filter inside the syncer decides what actually leaves the
/// cluster; this watcher only keeps the pipeline primed.
pub async fn watch_endpoint_slices(
    syncer: Arc<Syncer>,
    client: Client,
    namespace: Option<String>,
) -> Result<(), AgentError> {
    info!("Starting EndpointSlice watcher");

    let slices = match namespace.as_deref() {
        Some(ns) => Api::<EndpointSlice>::namespaced(client, ns),
        None => Api::<EndpointSlice>::all(client),
    };

    let error_policy = |_slice: Arc<EndpointSlice>, err: &AgentError, _ctx: Arc<Syncer>| {
        error!("Failed to sync EndpointSlice to the broker: {}", err);
        Action::requeue(Duration::from_secs(30))
    };

    let reconcile = |slice: Arc<EndpointSlice>, ctx: Arc<Syncer>| async move {
        match ctx.push_local_slice(&slice).await {
            Ok(true) => debug!("Pushed EndpointSlice {:?} to the broker", slice.metadata.name),
            Ok(false) => debug!("Ignoring EndpointSlice {:?}", slice.metadata.name),
            Err(e) => return Err(AgentError::Broker(e)),
        }
        Ok(Action::await_change())
    };

    Controller::new(slices, watcher::Config::default())
        .with_config(ControllerConfig::default().debounce(Duration::from_secs(2)).concurrency(3))
        .run(reconcile, error_policy, syncer)
        .for_each(|result| async move {
            if let Err(e) = result {
                error!("Controller error for EndpointSlice: {}", e);
            }
        })
        .await;

    Ok(())
}
