//! Test utilities for unit testing the export pipeline
//!
//! Helpers for creating Services, Endpoints and exported slices without a
//! live cluster.

use crds::labels::{
    LABEL_MANAGED_BY, LABEL_SERVICE_NAME, LABEL_SOURCE_CLUSTER, LABEL_SOURCE_NAMESPACE,
};
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort as CoreEndpointPort, EndpointSubset, Endpoints, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::api::discovery::v1::{Endpoint, EndpointConditions, EndpointSlice};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Helper to create a test ClusterIP Service
pub fn test_service(name: &str, namespace: &str, cluster_ip: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            cluster_ip: Some(cluster_ip.to_string()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: 80,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Helper to create a test headless Service
pub fn test_headless_service(name: &str, namespace: &str) -> Service {
    let mut service = test_service(name, namespace, "None");
    if let Some(spec) = service.spec.as_mut() {
        spec.cluster_ip = Some("None".to_string());
    }
    service
}

/// Helper to create test Endpoints with ready and not-ready addresses
pub fn test_endpoints(name: &str, namespace: &str, ready: &[&str], not_ready: &[&str]) -> Endpoints {
    let to_addresses = |ips: &[&str]| -> Option<Vec<EndpointAddress>> {
        if ips.is_empty() {
            None
        } else {
            Some(
                ips.iter()
                    .map(|ip| EndpointAddress {
                        ip: (*ip).to_string(),
                        ..Default::default()
                    })
                    .collect(),
            )
        }
    };

    Endpoints {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        subsets: Some(vec![EndpointSubset {
            addresses: to_addresses(ready),
            not_ready_addresses: to_addresses(not_ready),
            ports: Some(vec![CoreEndpointPort {
                name: Some("http".to_string()),
                port: 80,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
        }]),
    }
}

/// Helper to create an EndpointSlice with an arbitrary management label
pub fn test_slice(name: &str, namespace: &str, cluster: &str, managed_by: &str) -> EndpointSlice {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_MANAGED_BY.to_string(), managed_by.to_string());
    labels.insert(LABEL_SOURCE_CLUSTER.to_string(), cluster.to_string());
    labels.insert(LABEL_SOURCE_NAMESPACE.to_string(), namespace.to_string());
    labels.insert(LABEL_SERVICE_NAME.to_string(), name.to_string());

    EndpointSlice {
        metadata: ObjectMeta {
            name: Some(format!("{name}-{cluster}")),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            resource_version: Some("42".to_string()),
            ..Default::default()
        },
        address_type: "IPv4".to_string(),
        endpoints: vec![Endpoint {
            addresses: vec!["10.0.0.5".to_string()],
            conditions: Some(EndpointConditions {
                ready: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }],
        ports: None,
    }
}
