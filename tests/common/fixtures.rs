//! Test fixtures and builder patterns for RabbitmqCluster.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rabbitmq_operator::crd::{
    ClientServiceSpec, PersistenceSpec, RabbitmqCluster, RabbitmqClusterSpec,
};

/// Builder for creating RabbitmqCluster test fixtures.
///
/// # Example
/// ```ignore
/// let cluster = RabbitmqClusterBuilder::new("rabbitmq-one")
///     .namespace("rabbits")
///     .replicas(3)
///     .image_pull_secret("rabbit-two-secret")
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct RabbitmqClusterBuilder {
    name: String,
    namespace: Option<String>,
    spec: RabbitmqClusterSpec,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    generation: Option<i64>,
    uid: Option<String>,
}

impl RabbitmqClusterBuilder {
    /// Create a new builder with the given cluster name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            spec: RabbitmqClusterSpec::default(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            generation: None,
            uid: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn replicas(mut self, replicas: i32) -> Self {
        self.spec.replicas = replicas;
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.spec.image = Some(image.into());
        self
    }

    pub fn image_pull_secret(mut self, secret: impl Into<String>) -> Self {
        self.spec.image_pull_secret = Some(secret.into());
        self
    }

    pub fn resources(mut self, resources: ResourceRequirements) -> Self {
        self.spec.resources = Some(resources);
        self
    }

    pub fn affinity(mut self, affinity: Affinity) -> Self {
        self.spec.affinity = Some(affinity);
        self
    }

    /// Set the persistent storage size and class.
    pub fn persistence(mut self, storage: &str, storage_class: Option<&str>) -> Self {
        self.spec.persistence = Some(PersistenceSpec {
            storage_class_name: storage_class.map(str::to_string),
            storage: Some(Quantity(storage.to_string())),
        });
        self
    }

    /// Set the ingress service type.
    pub fn service_type(mut self, type_: impl Into<String>) -> Self {
        self.spec
            .service
            .get_or_insert_with(ClientServiceSpec::default)
            .type_ = Some(type_.into());
        self
    }

    /// Add an annotation to the ingress service only.
    pub fn service_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec
            .service
            .get_or_insert_with(ClientServiceSpec::default)
            .annotations
            .insert(key.into(), value.into());
        self
    }

    /// Add a label to the cluster.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation to the cluster.
    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Set the generation (for testing status updates).
    pub fn generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Set the UID (for testing owner references).
    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Build the RabbitmqCluster.
    pub fn build(self) -> RabbitmqCluster {
        RabbitmqCluster {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: self.namespace,
                labels: if self.labels.is_empty() {
                    None
                } else {
                    Some(self.labels)
                },
                annotations: if self.annotations.is_empty() {
                    None
                } else {
                    Some(self.annotations)
                },
                generation: self.generation,
                uid: self.uid,
                ..Default::default()
            },
            spec: self.spec,
            status: None,
        }
    }
}

impl Default for RabbitmqClusterBuilder {
    fn default() -> Self {
        Self::new("rabbitmq-one")
    }
}

/// Create a RabbitmqCluster with common test defaults, ready for the
/// desired-state builder.
pub fn test_cluster(name: &str, namespace: &str) -> RabbitmqCluster {
    RabbitmqClusterBuilder::new(name)
        .namespace(namespace)
        .replicas(1)
        .generation(1)
        .uid(format!("test-uid-{}", name))
        .build()
}

/// Requests and limits as a ResourceRequirements.
pub fn resource_requirements(
    request_cpu: &str,
    request_memory: &str,
    limit_cpu: &str,
    limit_memory: &str,
) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(request_cpu.to_string())),
            ("memory".to_string(), Quantity(request_memory.to_string())),
        ])),
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(limit_cpu.to_string())),
            ("memory".to_string(), Quantity(limit_memory.to_string())),
        ])),
        ..Default::default()
    }
}

/// A required node affinity on one label value.
pub fn node_affinity(key: &str, value: &str) -> Affinity {
    use k8s_openapi::api::core::v1::{
        NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    };

    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: key.to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![value.to_string()]),
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
