//! Meshlink Export Agent
//!
//! Per-cluster controller that watches ServiceExport declarations together
//! with the backing Service and Endpoints state, merges this cluster's
//! contribution into the aggregated ServiceImports on the broker, and
//! materializes the other clusters' exports locally.
//!
//! One agent runs in every member cluster; the broker is the only point of
//! rendezvous between them.

mod aggregator;
mod backoff;
mod conditions;
mod controller;
mod error;
mod imports;
#[cfg(test)]
mod imports_test;
mod reconciler;
mod syncer;
#[cfg(test)]
mod test_utils;
mod validate;
mod watcher;

use crate::error::AgentError;
use controller::Controller;
use std::env;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    tracing_subscriber::fmt::init();

    info!("Starting Meshlink export agent");

    // Load configuration from environment variables
    let cluster_id = env::var("CLUSTER_ID").map_err(|_| {
        AgentError::InvalidConfig("CLUSTER_ID environment variable is required".to_string())
    })?;
    let namespace = env::var("WATCH_NAMESPACE").ok();
    let broker_kubeconfig = env::var("BROKER_KUBECONFIG").ok();
    let resync_seconds = env::var("BROKER_RESYNC_SECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(30);

    info!("Configuration:");
    info!("  Cluster ID: {}", cluster_id);
    info!("  Namespace: {}", namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Broker: {}", broker_kubeconfig.as_deref().unwrap_or("local cluster"));
    info!("  Broker resync interval: {}s", resync_seconds);

    // Initialize and run the agent
    let controller = Controller::new(
        cluster_id,
        namespace,
        broker_kubeconfig,
        Duration::from_secs(resync_seconds),
    )
    .await?;
    controller.run().await?;

    Ok(())
}
