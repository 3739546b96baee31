//! Service generation for RabbitMQ clusters.
//!
//! Creates two services:
//! - **Ingress Service**: client access (AMQP, management, metrics); type and
//!   annotations overridable from the spec
//! - **Headless Service**: per-pod DNS for peer discovery and inter-node traffic

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::RabbitmqCluster;
use crate::resources::common::{child_metadata, child_metadata_with, selector_labels};
use crate::resources::naming;
use crate::resources::statefulset::{AMQP_PORT, EPMD_PORT, MANAGEMENT_PORT, PROMETHEUS_PORT};

/// Erlang distribution port (epmd + 20000)
pub const CLUSTER_RPC_PORT: i32 = 25672;

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Generate the client-facing ingress Service.
///
/// Type defaults to ClusterIP. `spec.service.annotations` are layered over
/// the propagated parent annotations on this service only.
pub fn generate_ingress_service(resource: &RabbitmqCluster) -> Service {
    Service {
        metadata: child_metadata_with(resource, naming::INGRESS, resource.service_annotations()),
        spec: Some(ServiceSpec {
            type_: Some(resource.service_type().to_string()),
            selector: Some(selector_labels(resource)),
            ports: Some(vec![
                service_port("amqp", AMQP_PORT),
                service_port("management", MANAGEMENT_PORT),
                service_port("prometheus", PROMETHEUS_PORT),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the headless Service.
///
/// Always `clusterIP: None`, whatever the spec says. Not-ready addresses are
/// published so booting nodes can find each other.
pub fn generate_headless_service(resource: &RabbitmqCluster) -> Service {
    Service {
        metadata: child_metadata(resource, naming::HEADLESS),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(selector_labels(resource)),
            ports: Some(vec![
                service_port("epmd", EPMD_PORT),
                service_port("cluster-rpc", CLUSTER_RPC_PORT),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::crd::{ClientServiceSpec, RabbitmqClusterSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn test_resource(spec: RabbitmqClusterSpec) -> RabbitmqCluster {
        RabbitmqCluster {
            metadata: ObjectMeta {
                name: Some("rabbitmq-one".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("test-uid".to_string()),
                annotations: Some(BTreeMap::from([(
                    "my-annotation".to_string(),
                    "my-value".to_string(),
                )])),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    #[test]
    fn test_ingress_defaults_to_cluster_ip() {
        let svc = generate_ingress_service(&test_resource(RabbitmqClusterSpec::default()));
        assert_eq!(svc.metadata.name.as_deref(), Some("rabbitmq-one-ingress"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert!(spec.cluster_ip.is_none());
        let names: Vec<_> = spec
            .ports
            .unwrap()
            .into_iter()
            .map(|p| p.name.unwrap())
            .collect();
        assert_eq!(names, vec!["amqp", "management", "prometheus"]);
    }

    #[test]
    fn test_ingress_overrides() {
        let svc = generate_ingress_service(&test_resource(RabbitmqClusterSpec {
            service: Some(ClientServiceSpec {
                type_: Some("LoadBalancer".to_string()),
                annotations: BTreeMap::from([(
                    "service.beta.kubernetes.io/aws-load-balancer-internal".to_string(),
                    "0.0.0.0/0".to_string(),
                )]),
            }),
            ..Default::default()
        }));
        assert_eq!(svc.spec.unwrap().type_.as_deref(), Some("LoadBalancer"));
        let annotations = svc.metadata.annotations.unwrap();
        assert_eq!(annotations["my-annotation"], "my-value");
        assert_eq!(
            annotations["service.beta.kubernetes.io/aws-load-balancer-internal"],
            "0.0.0.0/0"
        );
    }

    #[test]
    fn test_headless_ignores_service_type() {
        let svc = generate_headless_service(&test_resource(RabbitmqClusterSpec {
            service: Some(ClientServiceSpec {
                type_: Some("NodePort".to_string()),
                annotations: BTreeMap::from([("only".to_string(), "ingress".to_string())]),
            }),
            ..Default::default()
        }));
        assert_eq!(svc.metadata.name.as_deref(), Some("rabbitmq-one-headless"));
        let annotations = svc.metadata.annotations.clone().unwrap();
        assert!(!annotations.contains_key("only"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert!(spec.type_.is_none());
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
    }
}
