//! Endpoint aggregation.
//!
//! Converts a Service's backend Endpoints into the EndpointSlice this
//! cluster publishes for the rest of the cluster set. A service with zero
//! ready backends still yields a slice whose readiness is false, so
//! consumers can tell "exists but unhealthy" from "gone".

use crate::validate::ExportMode;
use crds::labels::{
    LABEL_MANAGED_BY, LABEL_SERVICE_NAME, LABEL_SOURCE_CLUSTER, LABEL_SOURCE_NAMESPACE,
    VALUE_MANAGED_BY,
};
use crds::ImportPort;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::api::discovery::v1::{Endpoint, EndpointConditions, EndpointPort, EndpointSlice};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Deterministic name for the slice a cluster exports for a service.
///
/// Qualifying the service name with the cluster identifier keeps slices
/// from different clusters for the same (namespace, name) distinct on the
/// broker without random suffixes, so retries and replays are idempotent.
#[must_use]
pub fn slice_name(service_name: &str, cluster_id: &str) -> String {
    format!("{service_name}-{cluster_id}")
}

/// Whether any backend address is currently ready.
#[must_use]
pub fn any_ready(endpoints: Option<&Endpoints>) -> bool {
    endpoints
        .and_then(|e| e.subsets.as_ref())
        .is_some_and(|subsets| {
            subsets
                .iter()
                .any(|subset| subset.addresses.as_ref().is_some_and(|a| !a.is_empty()))
        })
}

/// Builds the EndpointSlice this cluster exports for a service.
///
/// ClusterSetIp mode publishes the cluster-assigned virtual IP as a single
/// endpoint whose readiness reflects whether any backend is ready.
/// Headless mode mirrors every backend address with its own readiness 1:1.
pub fn exported_slice(
    service: &Service,
    endpoints: Option<&Endpoints>,
    mode: ExportMode,
    cluster_id: &str,
) -> EndpointSlice {
    let name = service.metadata.name.clone().unwrap_or_default();
    let namespace = service
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());

    let mut slice_labels = BTreeMap::new();
    slice_labels.insert(LABEL_MANAGED_BY.to_string(), VALUE_MANAGED_BY.to_string());
    slice_labels.insert(LABEL_SOURCE_CLUSTER.to_string(), cluster_id.to_string());
    slice_labels.insert(LABEL_SOURCE_NAMESPACE.to_string(), namespace.clone());
    slice_labels.insert(LABEL_SERVICE_NAME.to_string(), name.clone());

    let (exported, ports) = match mode {
        ExportMode::ClusterSetIp => {
            let cluster_ip = service
                .spec
                .as_ref()
                .and_then(|spec| spec.cluster_ip.clone())
                .unwrap_or_default();
            let addresses = if cluster_ip.is_empty() {
                Vec::new()
            } else {
                vec![cluster_ip]
            };
            let endpoint = Endpoint {
                addresses,
                conditions: Some(EndpointConditions {
                    ready: Some(any_ready(endpoints)),
                    ..Default::default()
                }),
                ..Default::default()
            };
            (vec![endpoint], service_ports(service))
        }
        ExportMode::Headless => backend_endpoints(endpoints),
    };

    EndpointSlice {
        metadata: ObjectMeta {
            name: Some(slice_name(&name, cluster_id)),
            namespace: Some(namespace),
            labels: Some(slice_labels),
            ..Default::default()
        },
        address_type: address_type(service),
        endpoints: exported,
        ports: Some(ports),
    }
}

/// Port definitions contributed to the aggregated ServiceImport.
#[must_use]
pub fn import_ports(service: &Service) -> Vec<ImportPort> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| ImportPort {
                    name: p.name.clone(),
                    protocol: p.protocol.clone(),
                    port: p.port,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn service_ports(service: &Service) -> Vec<EndpointPort> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| EndpointPort {
                    name: p.name.clone(),
                    port: Some(p.port),
                    protocol: p.protocol.clone().or_else(|| Some("TCP".to_string())),
                    ..Default::default()
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Mirrors backend addresses and their readiness 1:1.
fn backend_endpoints(endpoints: Option<&Endpoints>) -> (Vec<Endpoint>, Vec<EndpointPort>) {
    let mut exported = Vec::new();
    let mut ports = Vec::new();

    if let Some(subsets) = endpoints.and_then(|e| e.subsets.as_ref()) {
        for subset in subsets {
            if let Some(addresses) = &subset.addresses {
                for address in addresses {
                    exported.push(backend_endpoint(&address.ip, true));
                }
            }
            if let Some(addresses) = &subset.not_ready_addresses {
                for address in addresses {
                    exported.push(backend_endpoint(&address.ip, false));
                }
            }
            if ports.is_empty() {
                if let Some(subset_ports) = &subset.ports {
                    ports = subset_ports
                        .iter()
                        .map(|p| EndpointPort {
                            name: p.name.clone(),
                            port: Some(p.port),
                            protocol: p.protocol.clone().or_else(|| Some("TCP".to_string())),
                            ..Default::default()
                        })
                        .collect();
                }
            }
        }
    }

    (exported, ports)
}

fn backend_endpoint(ip: &str, ready: bool) -> Endpoint {
    Endpoint {
        addresses: vec![ip.to_string()],
        conditions: Some(EndpointConditions {
            ready: Some(ready),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn address_type(service: &Service) -> String {
    let cluster_ip = service
        .spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.as_deref())
        .unwrap_or_default();
    if cluster_ip.contains(':') {
        return "IPv6".to_string();
    }
    let first_family = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ip_families.as_ref())
        .and_then(|families| families.first());
    if first_family.map(String::as_str) == Some("IPv6") {
        "IPv6".to_string()
    } else {
        "IPv4".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::labels;

    #[test]
    fn test_cluster_ip_export_publishes_the_virtual_ip() {
        let service = test_service("svc", "default", "10.0.0.5");
        let endpoints = test_endpoints("svc", "default", &["192.168.1.10"], &[]);

        let slice = exported_slice(&service, Some(&endpoints), ExportMode::ClusterSetIp, "cluster1");

        assert_eq!(slice.metadata.name.as_deref(), Some("svc-cluster1"));
        assert_eq!(slice.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(slice.address_type, "IPv4");
        assert_eq!(slice.endpoints.len(), 1);
        assert_eq!(slice.endpoints[0].addresses, vec!["10.0.0.5".to_string()]);
        assert_eq!(
            slice.endpoints[0].conditions.as_ref().unwrap().ready,
            Some(true)
        );
    }

    #[test]
    fn test_zero_ready_backends_still_yields_a_slice() {
        let service = test_service("svc", "default", "10.0.0.5");
        // All backends removed from the ready set
        let endpoints = test_endpoints("svc", "default", &[], &["192.168.1.10"]);

        let slice = exported_slice(&service, Some(&endpoints), ExportMode::ClusterSetIp, "cluster1");

        // The artifact exists; only its readiness flips
        assert_eq!(slice.endpoints.len(), 1);
        assert_eq!(slice.endpoints[0].addresses, vec!["10.0.0.5".to_string()]);
        assert_eq!(
            slice.endpoints[0].conditions.as_ref().unwrap().ready,
            Some(false)
        );
    }

    #[test]
    fn test_missing_endpoints_reports_not_ready() {
        let service = test_service("svc", "default", "10.253.9.2");

        let slice = exported_slice(&service, None, ExportMode::ClusterSetIp, "cluster1");

        assert_eq!(slice.endpoints[0].addresses, vec!["10.253.9.2".to_string()]);
        assert_eq!(
            slice.endpoints[0].conditions.as_ref().unwrap().ready,
            Some(false)
        );
    }

    #[test]
    fn test_headless_export_mirrors_backend_readiness() {
        let service = test_headless_service("svc", "default");
        let endpoints = test_endpoints(
            "svc",
            "default",
            &["192.168.1.10", "192.168.1.11"],
            &["192.168.1.12"],
        );

        let slice = exported_slice(&service, Some(&endpoints), ExportMode::Headless, "cluster1");

        assert_eq!(slice.endpoints.len(), 3);
        let ready_flags: Vec<bool> = slice
            .endpoints
            .iter()
            .map(|e| e.conditions.as_ref().unwrap().ready.unwrap())
            .collect();
        assert_eq!(ready_flags, vec![true, true, false]);
    }

    #[test]
    fn test_slice_carries_ownership_and_source_labels() {
        let service = test_service("svc", "ns-a", "10.0.0.5");

        let slice = exported_slice(&service, None, ExportMode::ClusterSetIp, "cluster1");

        let slice_labels = slice.metadata.labels.as_ref().unwrap();
        assert_eq!(
            slice_labels.get(labels::LABEL_MANAGED_BY).map(String::as_str),
            Some(labels::VALUE_MANAGED_BY)
        );
        assert_eq!(
            slice_labels.get(labels::LABEL_SOURCE_CLUSTER).map(String::as_str),
            Some("cluster1")
        );
        assert_eq!(
            slice_labels.get(labels::LABEL_SOURCE_NAMESPACE).map(String::as_str),
            Some("ns-a")
        );
        assert_eq!(
            slice_labels.get(labels::LABEL_SERVICE_NAME).map(String::as_str),
            Some("svc")
        );
    }

    #[test]
    fn test_ipv6_cluster_ip_sets_address_type() {
        let service = test_service("svc", "default", "fd00::10");

        let slice = exported_slice(&service, None, ExportMode::ClusterSetIp, "cluster1");

        assert_eq!(slice.address_type, "IPv6");
    }

    #[test]
    fn test_import_ports_map_service_ports() {
        let service = test_service("svc", "default", "10.0.0.5");

        let ports = import_ports(&service);

        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 80);
        assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));
    }
}
