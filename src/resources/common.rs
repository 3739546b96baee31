//! Common resource generation utilities.
//!
//! Provides the labels, annotations, owner reference and metadata shared by
//! every child object of a RabbitmqCluster.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};

use crate::crd::RabbitmqCluster;
use crate::resources::naming;

/// Value of the managed-by label and default field manager.
pub const OPERATOR_NAME: &str = "rabbitmq-operator";

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Written by `kubectl apply` on the parent; describes the parent only.
const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Comma-separated label keys the operator set on a child. Keys listed here
/// and no longer desired are removed; unlisted keys belong to someone else.
pub const MANAGED_LABELS_ANNOTATION: &str = "rabbitmq.com/managed-labels";

/// Same as [`MANAGED_LABELS_ANNOTATION`] for annotation keys.
pub const MANAGED_ANNOTATIONS_ANNOTATION: &str = "rabbitmq.com/managed-annotations";

fn is_tracking_annotation(key: &str) -> bool {
    key == MANAGED_LABELS_ANNOTATION || key == MANAGED_ANNOTATIONS_ANNOTATION
}

/// Encode `keys` for a tracking annotation.
fn join_keys<'a>(keys: impl Iterator<Item = &'a String>) -> String {
    keys.map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Keys recorded in the tracking annotation `tracking` of `meta`.
pub fn tracked_keys(meta: &ObjectMeta, tracking: &str) -> BTreeSet<String> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(tracking))
        .map(|keys| {
            keys.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Labels the operator owns. They win over propagated parent labels.
pub fn operator_labels(resource: &RabbitmqCluster) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), resource.name_any()),
        (COMPONENT_LABEL.to_string(), "rabbitmq".to_string()),
        (PART_OF_LABEL.to_string(), "rabbitmq".to_string()),
        (MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string()),
    ])
}

/// Standard labels applied to all managed resources: the parent's labels
/// with the operator labels layered on top.
pub fn standard_labels(resource: &RabbitmqCluster) -> BTreeMap<String, String> {
    let mut labels = resource.labels().clone();
    labels.extend(operator_labels(resource));
    labels
}

/// Labels selecting the cluster's pods. Immutable once the StatefulSet exists.
pub fn selector_labels(resource: &RabbitmqCluster) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), resource.name_any()),
        (COMPONENT_LABEL.to_string(), "rabbitmq".to_string()),
    ])
}

/// Label selector matching every child of the named cluster.
pub fn children_selector(cluster_name: &str) -> String {
    format!("{NAME_LABEL}={cluster_name},{MANAGED_BY_LABEL}={OPERATOR_NAME}")
}

/// Parent annotations propagated onto children.
pub fn standard_annotations(resource: &RabbitmqCluster) -> BTreeMap<String, String> {
    resource
        .annotations()
        .iter()
        .filter(|(key, _)| key.as_str() != LAST_APPLIED_ANNOTATION && !is_tracking_annotation(key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Create owner reference for a RabbitmqCluster
pub fn owner_reference(resource: &RabbitmqCluster) -> OwnerReference {
    OwnerReference {
        api_version: RabbitmqCluster::api_version(&()).to_string(),
        kind: RabbitmqCluster::kind(&()).to_string(),
        name: resource.name_any(),
        uid: resource.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Whether `owner` points at a RabbitmqCluster named `cluster_name`.
pub fn is_cluster_owner(owner: &OwnerReference, cluster_name: &str) -> bool {
    owner.kind == RabbitmqCluster::kind(&()) && owner.name == cluster_name
}

/// Metadata for the child named `<cluster>-<suffix>`.
pub fn child_metadata(resource: &RabbitmqCluster, suffix: &str) -> ObjectMeta {
    child_metadata_with(resource, suffix, BTreeMap::new())
}

/// Like [`child_metadata`] with extra annotations layered over the
/// propagated ones.
pub fn child_metadata_with(
    resource: &RabbitmqCluster,
    suffix: &str,
    extra_annotations: BTreeMap<String, String>,
) -> ObjectMeta {
    let labels = standard_labels(resource);
    let mut annotations = standard_annotations(resource);
    annotations.extend(extra_annotations);
    let managed_annotations = join_keys(annotations.keys());
    annotations.insert(MANAGED_LABELS_ANNOTATION.to_string(), join_keys(labels.keys()));
    annotations.insert(MANAGED_ANNOTATIONS_ANNOTATION.to_string(), managed_annotations);

    ObjectMeta {
        name: Some(naming::child_name(&resource.name_any(), suffix)),
        namespace: resource.namespace(),
        labels: Some(labels),
        annotations: Some(annotations),
        owner_references: Some(vec![owner_reference(resource)]),
        ..Default::default()
    }
}
