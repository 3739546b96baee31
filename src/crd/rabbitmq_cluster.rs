//! RabbitmqCluster Custom Resource Definition.
//!
//! Describes a clustered RabbitMQ deployment: replica count, image, pull
//! credentials, resources, persistence, network exposure and placement.
//! Every optional field may be absent; the resource generators fall back to
//! the platform default for each one.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Image used when `spec.image` is not set.
pub const DEFAULT_IMAGE: &str = "rabbitmq:3.8.1";
/// Persistent volume claim size used when `spec.persistence.storage` is not set.
pub const DEFAULT_STORAGE: &str = "10Gi";
/// Service type used for the ingress service when `spec.service.type` is not set.
pub const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";
/// Service types accepted for the ingress service.
pub const SUPPORTED_SERVICE_TYPES: [&str; 3] = ["ClusterIP", "NodePort", "LoadBalancer"];

/// RabbitmqCluster is a custom resource for deploying RabbitMQ clusters.
///
/// Example:
/// ```yaml
/// apiVersion: rabbitmq.com/v1beta1
/// kind: RabbitmqCluster
/// metadata:
///   name: rabbitmq-one
/// spec:
///   replicas: 1
///   imagePullSecret: rabbit-two-secret
///   persistence:
///     storageClassName: my-storage-class
///     storage: 100Gi
///   service:
///     type: NodePort
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "RabbitmqCluster",
    plural = "rabbitmqclusters",
    shortname = "rmq",
    status = "RabbitmqClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.clusterStatus"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RabbitmqClusterSpec {
    /// Number of RabbitMQ nodes (minimum 1, default 1).
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Container image reference (default: `rabbitmq:3.8.1`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Name of a Secret used to pull the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,

    /// CPU and memory requests and limits for the RabbitMQ container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Storage settings for the per-node persistent volume claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<PersistenceSpec>,

    /// Pod scheduling constraints, copied verbatim onto the pod template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    /// Overrides for the client-facing ingress service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ClientServiceSpec>,
}

impl Default for RabbitmqClusterSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            image: None,
            image_pull_secret: None,
            resources: None,
            persistence: None,
            affinity: None,
            service: None,
        }
    }
}

fn default_replicas() -> i32 {
    1
}

/// Persistent storage configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceSpec {
    /// StorageClass for the volume claim. Absent means the cluster default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Requested volume size (default: 10Gi).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<Quantity>,
}

/// Ingress service overrides.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientServiceSpec {
    /// Service type: ClusterIP, NodePort or LoadBalancer.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Extra annotations for the ingress service only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Empty strings in optional fields mean "not set".
fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

impl RabbitmqCluster {
    /// Name of a child object: `<cluster name>-<suffix>`.
    pub fn child_resource_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.name_any(), suffix)
    }

    /// Image reference, falling back to [`DEFAULT_IMAGE`].
    pub fn image(&self) -> &str {
        non_blank(self.spec.image.as_deref()).unwrap_or(DEFAULT_IMAGE)
    }

    /// Pull secret name, if one is set.
    pub fn image_pull_secret(&self) -> Option<&str> {
        non_blank(self.spec.image_pull_secret.as_deref())
    }

    /// Ingress service type, falling back to [`DEFAULT_SERVICE_TYPE`].
    pub fn service_type(&self) -> &str {
        non_blank(self.spec.service.as_ref().and_then(|s| s.type_.as_deref()))
            .unwrap_or(DEFAULT_SERVICE_TYPE)
    }

    /// Extra annotations requested for the ingress service.
    pub fn service_annotations(&self) -> BTreeMap<String, String> {
        self.spec
            .service
            .as_ref()
            .map(|s| s.annotations.clone())
            .unwrap_or_default()
    }

    /// Requested storage size, falling back to [`DEFAULT_STORAGE`].
    pub fn storage(&self) -> Quantity {
        self.spec
            .persistence
            .as_ref()
            .and_then(|p| p.storage.clone())
            .unwrap_or_else(|| Quantity(DEFAULT_STORAGE.to_string()))
    }

    /// StorageClass override, if any.
    pub fn storage_class_name(&self) -> Option<String> {
        self.spec
            .persistence
            .as_ref()
            .and_then(|p| p.storage_class_name.clone())
    }

    /// Current lifecycle string, `Empty` when no status was written yet.
    pub fn cluster_status(&self) -> ClusterStatus {
        self.status
            .as_ref()
            .map(|s| s.cluster_status)
            .unwrap_or_default()
    }
}

/// Status of a RabbitmqCluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RabbitmqClusterStatus {
    /// Coarse lifecycle string: "", "creating", "created" or "error".
    #[serde(default)]
    pub cluster_status: ClusterStatus,

    /// Conditions describing the last completed reconcile pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Lifecycle of a RabbitmqCluster as reported in `status.clusterStatus`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ClusterStatus {
    /// No reconcile pass has completed yet.
    #[default]
    #[serde(rename = "")]
    Empty,
    /// Required children are being materialized.
    #[serde(rename = "creating")]
    Creating,
    /// The workload and both services exist.
    #[serde(rename = "created")]
    Created,
    /// The spec is invalid or a child could not be written.
    #[serde(rename = "error")]
    Error,
}

impl ClusterStatus {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Empty => "",
            ClusterStatus::Creating => "creating",
            ClusterStatus::Created => "created",
            ClusterStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status condition.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    /// Create a "Progressing" condition.
    pub fn progressing(
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new("Progressing", progressing, reason, message, generation)
    }

    /// Create a "Degraded" condition.
    pub fn degraded(degraded: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Degraded", degraded, reason, message, generation)
    }

    /// Equal in everything but the transition timestamp.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
    }
}
