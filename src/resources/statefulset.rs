//! StatefulSet generation for RabbitMQ clusters.
//!
//! Creates a StatefulSet with:
//! - Stable network identity via the headless service
//! - One persistent volume claim template for the message store
//! - Broker configuration mounted from the server-conf ConfigMap
//! - Credentials and Erlang cookie injected from the generated Secrets

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, LocalObjectReference,
    ObjectFieldSelector, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretKeySelector, TCPSocketAction, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::crd::RabbitmqCluster;
use crate::resources::common::{child_metadata, selector_labels, standard_labels};
use crate::resources::naming;
use crate::resources::secrets::{ADMIN_PASSWORD_KEY, ADMIN_USERNAME_KEY, ERLANG_COOKIE_KEY};

/// Name of the broker container.
pub const CONTAINER_NAME: &str = "rabbitmq";
/// Name of the single volume claim template.
pub const PERSISTENCE_VOLUME: &str = "persistence";

/// Erlang port mapper daemon
pub const EPMD_PORT: i32 = 4369;
/// AMQP 0-9-1 client port
pub const AMQP_PORT: i32 = 5672;
/// Management UI and HTTP API
pub const MANAGEMENT_PORT: i32 = 15672;
/// Prometheus metrics plugin
pub const PROMETHEUS_PORT: i32 = 15692;

const CONFIG_VOLUME: &str = "server-conf";
const CONFIG_MOUNT_PATH: &str = "/etc/rabbitmq";
const DATA_MOUNT_PATH: &str = "/var/lib/rabbitmq/mnesia";
/// Time given to the broker to sync queues before the pod is killed.
const TERMINATION_GRACE_PERIOD: i64 = 150;

/// Generate the StatefulSet for a RabbitmqCluster.
pub fn generate_statefulset(resource: &RabbitmqCluster) -> StatefulSet {
    let name = resource.name_any();

    StatefulSet {
        metadata: child_metadata(resource, naming::SERVER),
        spec: Some(StatefulSetSpec {
            replicas: Some(resource.spec.replicas),
            service_name: Some(naming::child_name(&name, naming::HEADLESS)),
            selector: LabelSelector {
                match_labels: Some(selector_labels(resource)),
                ..Default::default()
            },
            // Nodes join the cluster through peer discovery, no ordering needed
            pod_management_policy: Some("Parallel".to_string()),
            template: generate_pod_template(resource),
            volume_claim_templates: Some(vec![generate_pvc_template(resource)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_pod_template(resource: &RabbitmqCluster) -> PodTemplateSpec {
    let name = resource.name_any();

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(standard_labels(resource)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: Some(naming::child_name(&name, naming::SERVER)),
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD),
            image_pull_secrets: convert_pull_secret(resource.image_pull_secret()),
            // Absent rather than empty so "no affinity" and "removed affinity" look the same
            affinity: resource.spec.affinity.clone(),
            containers: vec![generate_rabbitmq_container(resource)],
            volumes: Some(vec![Volume {
                name: CONFIG_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: naming::child_name(&name, naming::SERVER_CONF),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Convert the optional pull secret to the pod's pull-secret list.
fn convert_pull_secret(pull_secret: Option<&str>) -> Option<Vec<LocalObjectReference>> {
    pull_secret.map(|name| {
        vec![LocalObjectReference {
            name: name.to_string(),
        }]
    })
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        container_port: port,
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn generate_rabbitmq_container(resource: &RabbitmqCluster) -> Container {
    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(resource.image().to_string()),
        ports: Some(vec![
            container_port("epmd", EPMD_PORT),
            container_port("amqp", AMQP_PORT),
            container_port("management", MANAGEMENT_PORT),
            container_port("prometheus", PROMETHEUS_PORT),
        ]),
        env: Some(generate_env_vars(resource)),
        resources: Some(generate_resource_requirements(resource)),
        volume_mounts: Some(vec![
            VolumeMount {
                name: PERSISTENCE_VOLUME.to_string(),
                mount_path: DATA_MOUNT_PATH.to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: CONFIG_MOUNT_PATH.to_string(),
                ..Default::default()
            },
        ]),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::String("amqp".to_string()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(10),
            period_seconds: Some(10),
            timeout_seconds: Some(5),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Resource requirements copied verbatim, or unset so platform defaults apply.
fn generate_resource_requirements(resource: &RabbitmqCluster) -> ResourceRequirements {
    resource.spec.resources.clone().unwrap_or_default()
}

fn env_value(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn env_field(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn env_secret(name: &str, secret: String, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret,
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Environment for node naming, peer discovery and credentials.
fn generate_env_vars(resource: &RabbitmqCluster) -> Vec<EnvVar> {
    let name = resource.name_any();
    let admin_secret = naming::child_name(&name, naming::ADMIN);
    let cookie_secret = naming::child_name(&name, naming::ERLANG_COOKIE);

    vec![
        env_field("MY_POD_NAME", "metadata.name"),
        env_field("MY_POD_NAMESPACE", "metadata.namespace"),
        env_value(
            "K8S_SERVICE_NAME",
            naming::child_name(&name, naming::HEADLESS),
        ),
        env_value("RABBITMQ_USE_LONGNAME", "true"),
        env_value(
            "RABBITMQ_NODENAME",
            "rabbit@$(MY_POD_NAME).$(K8S_SERVICE_NAME).$(MY_POD_NAMESPACE)",
        ),
        env_value("K8S_HOSTNAME_SUFFIX", ".$(K8S_SERVICE_NAME).$(MY_POD_NAMESPACE)"),
        env_secret("RABBITMQ_DEFAULT_USER", admin_secret.clone(), ADMIN_USERNAME_KEY),
        env_secret("RABBITMQ_DEFAULT_PASS", admin_secret, ADMIN_PASSWORD_KEY),
        env_secret("RABBITMQ_ERLANG_COOKIE", cookie_secret, ERLANG_COOKIE_KEY),
    ]
}

/// The single PVC template. Immutable once the StatefulSet exists.
fn generate_pvc_template(resource: &RabbitmqCluster) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(PERSISTENCE_VOLUME.to_string()),
            labels: Some(selector_labels(resource)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: resource.storage_class_name(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), resource.storage())])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
