//! Reconciliation logic for service exports.
//!
//! The reconciler owns the decision making on each watch event; event
//! delivery, requeueing and per-key serialization come from the
//! kube_runtime Controller driving it.

pub mod service_export;

use crate::backoff::FibonacciBackoff;
use crate::imports::ImportManager;
use crate::syncer::Syncer;
use broker_client::{BrokerClientTrait, BrokerError};
use crds::ExportCondition;
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, warn};

/// In-item retry budget for broker operations. Failures are surfaced on
/// the Synced condition only once this budget is spent, so a single
/// transient broker hiccup never flaps the status.
pub(crate) const BROKER_ATTEMPTS: u32 = 3;

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            // 5s min, 60s max between requeues of a failing export
            backoff: FibonacciBackoff::new(5, 60),
            error_count: 0,
        }
    }
}

/// Reconciles ServiceExport resources against local and broker state.
pub struct Reconciler {
    pub(crate) client: Client,
    pub(crate) imports: ImportManager,
    pub(crate) syncer: Syncer,
    pub(crate) cluster_id: String,
    /// Error tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(client: Client, broker: Arc<dyn BrokerClientTrait>, cluster_id: String) -> Self {
        Self {
            imports: ImportManager::new(broker.clone(), cluster_id.clone()),
            syncer: Syncer::new(client.clone(), broker, cluster_id.clone()),
            client,
            cluster_id,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A handle to the local cluster API.
    pub(crate) fn client(&self) -> Client {
        self.client.clone()
    }

    /// Next requeue delay and consecutive error count for a resource.
    pub(crate) fn backoff_for_resource(&self, resource_key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states.entry(resource_key.to_string()).or_insert_with(BackoffState::new);
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff states: {}, using default backoff", e);
                (Duration::from_secs(30), 0)
            }
        }
    }

    /// Increment the error count for a resource
    pub(crate) fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(BackoffState::new)
                .error_count += 1;
        }
    }

    /// Reset the error count for a resource (on successful reconciliation)
    pub(crate) fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.error_count = 0;
                state.backoff.reset();
            }
        }
    }
}

/// Helper to create a status patch carrying the full condition set.
pub(crate) fn conditions_status_patch(conditions: &[ExportCondition]) -> serde_json::Value {
    serde_json::json!({
        "status": {
            "conditions": conditions,
        }
    })
}

/// Runs a broker operation under the bounded Fibonacci retry budget.
///
/// Only transport-level failures are retried; `NotFound` and `Conflict`
/// are handed straight back, the aggregation manager resolves conflicts
/// itself by re-reading.
pub(crate) async fn retry_broker<T, F, Fut>(mut op: F, what: &str) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, BrokerError>>,
{
    let mut backoff = FibonacciBackoff::new(1, 8);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e @ (BrokerError::Unavailable(_) | BrokerError::Api(_))) => {
                if attempt >= BROKER_ATTEMPTS {
                    error!("{} failed after {} attempts: {}", what, attempt, e);
                    return Err(e);
                }
                warn!("{} failed (attempt {}/{}): {}, backing off", what, attempt, BROKER_ATTEMPTS, e);
                tokio::time::sleep(backoff.next_backoff()).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retry_broker_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);

        let result = retry_broker(
            || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(BrokerError::Unavailable("flaky".to_string()))
                    } else {
                        Ok(attempt)
                    }
                }
            },
            "test op",
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_broker_gives_up_after_budget() {
        let calls = AtomicU32::new(0);

        let result: Result<(), BrokerError> = retry_broker(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BrokerError::Unavailable("down".to_string())) }
            },
            "test op",
        )
        .await;

        assert!(matches!(result, Err(BrokerError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), BROKER_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_retry_broker_passes_conflicts_through() {
        let calls = AtomicU32::new(0);

        let result: Result<(), BrokerError> = retry_broker(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BrokerError::Conflict("raced".to_string())) }
            },
            "test op",
        )
        .await;

        assert!(matches!(result, Err(BrokerError::Conflict(_))));
        // No retries: conflicts are resolved by re-reading, not by waiting
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_conditions_status_patch_shape() {
        let patch = conditions_status_patch(&[]);
        assert!(patch["status"]["conditions"].is_array());
    }
}
