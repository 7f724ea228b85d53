//! Main controller implementation.
//!
//! Wires the local kube client, the broker client, the reconciler and the
//! watchers together, and supervises the long-running tasks.

use crate::error::AgentError;
use crate::reconciler::Reconciler;
use crate::syncer::Syncer;
use crate::watcher;
use broker_client::{BrokerClientTrait, KubeBrokerClient};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main controller for the export agent.
pub struct Controller {
    export_watcher: JoinHandle<Result<(), AgentError>>,
    slice_watcher: JoinHandle<Result<(), AgentError>>,
    broker_resync: JoinHandle<Result<(), AgentError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(
        cluster_id: String,
        namespace: Option<String>,
        broker_kubeconfig: Option<String>,
        resync_interval: Duration,
    ) -> Result<Self, AgentError> {
        info!("Initializing export agent for cluster {}", cluster_id);

        // Create Kubernetes clients for the local cluster and the broker
        let client = Client::try_default().await?;
        let broker_kube = match broker_kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
                    AgentError::InvalidConfig(format!("failed to read broker kubeconfig {path}: {e}"))
                })?;
                let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| {
                        AgentError::InvalidConfig(format!("invalid broker kubeconfig {path}: {e}"))
                    })?;
                Client::try_from(config)?
            }
            None => client.clone(),
        };
        let broker: Arc<dyn BrokerClientTrait> = Arc::new(KubeBrokerClient::new(broker_kube));

        let reconciler = Arc::new(Reconciler::new(client.clone(), broker.clone(), cluster_id.clone()));
        let syncer = Arc::new(Syncer::new(client.clone(), broker, cluster_id));

        // Seed local state from the broker before the watchers start
        if let Err(e) = syncer.sync_from_broker().await {
            warn!("Initial broker sync failed (will continue): {}", e);
        } else {
            info!("Initial broker sync completed");
        }

        // Start all watchers in background tasks
        let export_watcher = {
            let reconciler = reconciler.clone();
            let client = client.clone();
            let namespace = namespace.clone();
            tokio::spawn(async move {
                watcher::watch_service_exports(reconciler, client, namespace).await
            })
        };

        let slice_watcher = {
            let syncer = syncer.clone();
            tokio::spawn(async move {
                watcher::watch_endpoint_slices(syncer, client, namespace).await
            })
        };

        let broker_resync: JoinHandle<Result<(), AgentError>> = tokio::spawn(async move {
            let mut interval = tokio::time::interval(resync_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = syncer.sync_from_broker().await {
                    warn!("Broker resync failed: {}", e);
                }
            }
        });

        Ok(Self {
            export_watcher,
            slice_watcher,
            broker_resync,
        })
    }

    /// Runs the agent until shutdown.
    pub async fn run(mut self) -> Result<(), AgentError> {
        info!("Export agent running");

        // Wait for any watcher to exit (they should run forever)
        tokio::select! {
            result = &mut self.export_watcher => {
                result.map_err(|e| AgentError::Watch(format!("ServiceExport watcher panicked: {}", e)))?
                    .map_err(|e| AgentError::Watch(format!("ServiceExport watcher error: {}", e)))?;
            }
            result = &mut self.slice_watcher => {
                result.map_err(|e| AgentError::Watch(format!("EndpointSlice watcher panicked: {}", e)))?
                    .map_err(|e| AgentError::Watch(format!("EndpointSlice watcher error: {}", e)))?;
            }
            result = &mut self.broker_resync => {
                result.map_err(|e| AgentError::Watch(format!("Broker resync task panicked: {}", e)))?
                    .map_err(|e| AgentError::Watch(format!("Broker resync error: {}", e)))?;
            }
        }

        Ok(())
    }
}
