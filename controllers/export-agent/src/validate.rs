//! Export eligibility rules.
//!
//! Re-evaluated on every observed Service change. A rejection is permanent
//! for the current Service revision; nothing retries it until the Service
//! itself changes again.

use k8s_openapi::api::core::v1::Service;

/// How an exported Service is represented across the cluster set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Single virtual address per cluster (the service's cluster IP).
    ClusterSetIp,
    /// Per-backend addresses, readiness mirrored 1:1.
    Headless,
}

/// Why a Service cannot be exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Declared service type is not exportable
    UnsupportedType(String),
}

impl Rejection {
    /// Machine-readable reason recorded on the Valid condition
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnsupportedType(_) => "UnsupportedServiceType",
        }
    }

    /// Human-readable message recorded on the Valid condition
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::UnsupportedType(declared) => {
                format!("Service of type {declared} cannot be exported")
            }
        }
    }
}

/// Decides whether a Service is exportable and in which mode.
///
/// Only ClusterIP services qualify; a ClusterIP service without an assigned
/// virtual IP ("None") is exported headless. NodePort, LoadBalancer and
/// ExternalName services are rejected.
pub fn export_mode(service: &Service) -> Result<ExportMode, Rejection> {
    let declared = service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        .unwrap_or("ClusterIP");

    if declared != "ClusterIP" {
        return Err(Rejection::UnsupportedType(declared.to_string()));
    }

    let headless = service
        .spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.as_deref())
        == Some("None");

    if headless {
        Ok(ExportMode::Headless)
    } else {
        Ok(ExportMode::ClusterSetIp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_cluster_ip_service_is_exportable() {
        let service = test_service("svc", "default", "10.96.0.10");
        assert_eq!(export_mode(&service), Ok(ExportMode::ClusterSetIp));
    }

    #[test]
    fn test_untyped_service_defaults_to_cluster_ip() {
        let mut service = test_service("svc", "default", "10.96.0.10");
        service.spec.as_mut().unwrap().type_ = None;
        assert_eq!(export_mode(&service), Ok(ExportMode::ClusterSetIp));
    }

    #[test]
    fn test_headless_service_is_exportable() {
        let service = test_headless_service("svc", "default");
        assert_eq!(export_mode(&service), Ok(ExportMode::Headless));
    }

    #[test]
    fn test_node_port_service_is_rejected() {
        let mut service = test_service("svc", "default", "10.96.0.10");
        service.spec.as_mut().unwrap().type_ = Some("NodePort".to_string());

        let rejection = export_mode(&service).unwrap_err();
        assert_eq!(rejection.reason(), "UnsupportedServiceType");
        assert!(rejection.message().contains("NodePort"));
    }

    #[test]
    fn test_load_balancer_and_external_name_are_rejected() {
        for declared in ["LoadBalancer", "ExternalName"] {
            let mut service = test_service("svc", "default", "10.96.0.10");
            service.spec.as_mut().unwrap().type_ = Some(declared.to_string());
            assert!(export_mode(&service).is_err(), "{declared} should be rejected");
        }
    }

    #[test]
    fn test_validation_is_idempotent() {
        let mut service = test_service("svc", "default", "10.96.0.10");
        service.spec.as_mut().unwrap().type_ = Some("NodePort".to_string());

        // Re-validating the same revision yields the same rejection every time
        let first = export_mode(&service);
        let second = export_mode(&service);
        assert_eq!(first, second);

        // Flipping the type back makes the service exportable again
        service.spec.as_mut().unwrap().type_ = Some("ClusterIP".to_string());
        assert_eq!(export_mode(&service), Ok(ExportMode::ClusterSetIp));
    }
}
