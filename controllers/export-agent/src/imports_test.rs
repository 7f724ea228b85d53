//! Unit tests for the ServiceImport aggregation manager

#[cfg(test)]
mod tests {
    use crate::imports::ImportManager;
    use broker_client::{BrokerError, MockBrokerClient};
    use crds::{ImportPort, ImportType};
    use std::sync::Arc;

    fn http_port() -> Vec<ImportPort> {
        vec![ImportPort {
            name: Some("http".to_string()),
            protocol: Some("TCP".to_string()),
            port: 80,
        }]
    }

    fn manager(broker: &MockBrokerClient, cluster_id: &str) -> ImportManager {
        ImportManager::new(Arc::new(broker.clone()), cluster_id)
    }

    #[tokio::test]
    async fn test_first_contribution_creates_the_import() {
        let broker = MockBrokerClient::new();

        manager(&broker, "cluster1")
            .upsert_contribution("default", "svc", ImportType::ClusterSetIP, &http_port())
            .await
            .unwrap();

        let stored = broker.service_import("default", "svc").unwrap();
        assert_eq!(stored.spec.import_type, ImportType::ClusterSetIP);
        assert_eq!(stored.spec.ports, http_port());
        let clusters: Vec<&str> = stored
            .status
            .as_ref()
            .unwrap()
            .clusters
            .iter()
            .map(|c| c.cluster.as_str())
            .collect();
        assert_eq!(clusters, vec!["cluster1"]);
    }

    #[tokio::test]
    async fn test_second_cluster_merges_without_clobbering() {
        let broker = MockBrokerClient::new();

        manager(&broker, "cluster1")
            .upsert_contribution("default", "svc", ImportType::ClusterSetIP, &http_port())
            .await
            .unwrap();
        manager(&broker, "cluster2")
            .upsert_contribution("default", "svc", ImportType::ClusterSetIP, &http_port())
            .await
            .unwrap();

        let stored = broker.service_import("default", "svc").unwrap();
        let clusters: Vec<&str> = stored
            .status
            .as_ref()
            .unwrap()
            .clusters
            .iter()
            .map(|c| c.cluster.as_str())
            .collect();
        assert_eq!(clusters, vec!["cluster1", "cluster2"]);
        // Port union does not duplicate identical definitions
        assert_eq!(stored.spec.ports.len(), 1);
        assert_eq!(broker.import_count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_contribution_is_a_noop() {
        let broker = MockBrokerClient::new();
        let mgr = manager(&broker, "cluster1");

        mgr.upsert_contribution("default", "svc", ImportType::ClusterSetIP, &http_port())
            .await
            .unwrap();
        let version_before = broker
            .service_import("default", "svc")
            .unwrap()
            .metadata
            .resource_version;

        mgr.upsert_contribution("default", "svc", ImportType::ClusterSetIP, &http_port())
            .await
            .unwrap();

        // No write happened: the stored revision is untouched
        let version_after = broker
            .service_import("default", "svc")
            .unwrap()
            .metadata
            .resource_version;
        assert_eq!(version_before, version_after);
    }

    #[tokio::test]
    async fn test_withdrawing_the_sole_contributor_deletes_the_import() {
        let broker = MockBrokerClient::new();
        let mgr = manager(&broker, "cluster1");

        mgr.upsert_contribution("default", "svc", ImportType::ClusterSetIP, &http_port())
            .await
            .unwrap();
        mgr.withdraw_contribution("default", "svc").await.unwrap();

        assert!(broker.service_import("default", "svc").is_none());
        assert_eq!(broker.import_count(), 0);
    }

    #[tokio::test]
    async fn test_withdrawing_one_of_two_keeps_the_other() {
        let broker = MockBrokerClient::new();

        manager(&broker, "cluster1")
            .upsert_contribution("default", "svc", ImportType::ClusterSetIP, &http_port())
            .await
            .unwrap();
        manager(&broker, "cluster2")
            .upsert_contribution("default", "svc", ImportType::ClusterSetIP, &http_port())
            .await
            .unwrap();

        manager(&broker, "cluster1")
            .withdraw_contribution("default", "svc")
            .await
            .unwrap();

        let stored = broker.service_import("default", "svc").unwrap();
        let clusters: Vec<&str> = stored
            .status
            .as_ref()
            .unwrap()
            .clusters
            .iter()
            .map(|c| c.cluster.as_str())
            .collect();
        assert_eq!(clusters, vec!["cluster2"]);
    }

    #[tokio::test]
    async fn test_withdrawing_a_missing_import_is_a_noop() {
        let broker = MockBrokerClient::new();

        manager(&broker, "cluster1")
            .withdraw_contribution("default", "svc")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_same_name_in_different_namespaces_stays_isolated() {
        let broker = MockBrokerClient::new();
        let mgr = manager(&broker, "cluster1");

        mgr.upsert_contribution("ns-a", "svc", ImportType::ClusterSetIP, &http_port())
            .await
            .unwrap();
        mgr.upsert_contribution("ns-b", "svc", ImportType::ClusterSetIP, &http_port())
            .await
            .unwrap();

        assert_eq!(broker.import_count(), 2);

        // Withdrawing one namespace's export leaves the other untouched
        mgr.withdraw_contribution("ns-a", "svc").await.unwrap();
        assert!(broker.service_import("ns-a", "svc").is_none());
        assert!(broker.service_import("ns-b", "svc").is_some());
    }

    #[tokio::test]
    async fn test_conflicts_are_resolved_by_rereading() {
        let broker = MockBrokerClient::new();
        let mgr = manager(&broker, "cluster2");

        manager(&broker, "cluster1")
            .upsert_contribution("default", "svc", ImportType::ClusterSetIP, &http_port())
            .await
            .unwrap();

        // The next two conditional writes lose the race
        broker.inject_conflicts(2);
        mgr.upsert_contribution("default", "svc", ImportType::ClusterSetIP, &http_port())
            .await
            .unwrap();

        let stored = broker.service_import("default", "svc").unwrap();
        assert_eq!(stored.status.as_ref().unwrap().clusters.len(), 2);
    }

    #[tokio::test]
    async fn test_broker_outage_surfaces_as_unavailable() {
        let broker = MockBrokerClient::new();
        broker.inject_unavailable(10);

        let result = manager(&broker, "cluster1")
            .upsert_contribution("default", "svc", ImportType::ClusterSetIP, &http_port())
            .await;

        assert!(matches!(result, Err(BrokerError::Unavailable(_))));
    }
}
