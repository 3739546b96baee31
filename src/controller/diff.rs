//! Restricted field-mask merging of desired children onto live objects.
//!
//! The engine never replaces a live child with the builder output. It copies
//! only the fields it manages onto the live object and writes it back when
//! something actually moved. Fields set by other actors (extra annotations,
//! defaulted fields, generated secret payloads, node ports) survive.
//!
//! | Kind | Managed fields |
//! |------|----------------|
//! | all | labels and annotations (operator-set keys pruned), controller owner reference |
//! | StatefulSet | replicas, pod labels, service account, pull secrets, affinity, container image and resources |
//! | Service | type, selector, ports (node ports kept), publishNotReadyAddresses |
//! | ConfigMap | data |
//! | Role | rules |
//! | RoleBinding | subjects |
//! | Secret, ServiceAccount | metadata only |

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, LocalObjectReference, PodSpec, ResourceRequirements, Secret, Service,
    ServiceAccount, ServicePort,
};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::DEFAULT_SERVICE_TYPE;
use crate::resources::common::{
    MANAGED_ANNOTATIONS_ANNOTATION, MANAGED_LABELS_ANNOTATION, tracked_keys,
};
use crate::resources::quantity::same_quantities;
use crate::resources::statefulset::CONTAINER_NAME;
use crate::store::StoredObject;

/// A child kind the engine converges.
pub trait ManagedResource: StoredObject {
    /// Copy the operator-managed fields of `desired` onto `self`.
    ///
    /// Returns `true` when `self` changed and must be written back.
    fn merge_managed(&mut self, desired: &Self) -> bool;
}

/// Assign `desired` to `live` if they differ.
fn set_if_changed<T: PartialEq + Clone>(live: &mut T, desired: &T) -> bool {
    if live == desired {
        false
    } else {
        *live = desired.clone();
        true
    }
}

/// Add or overwrite every entry of `desired`; keys only on `live` stay.
fn merge_map(
    live: &mut Option<BTreeMap<String, String>>,
    desired: &Option<BTreeMap<String, String>>,
) -> bool {
    let Some(desired) = desired else {
        return false;
    };
    let missing: Vec<_> = desired
        .iter()
        .filter(|(k, v)| live.as_ref().and_then(|m| m.get(*k)) != Some(*v))
        .collect();
    if missing.is_empty() {
        return false;
    }
    let live = live.get_or_insert_with(BTreeMap::new);
    for (k, v) in missing {
        live.insert(k.clone(), v.clone());
    }
    true
}

fn same_owner(a: &OwnerReference, b: &OwnerReference) -> bool {
    a.kind == b.kind && a.name == b.name
}

/// Make sure every owner reference in `desired` is present and exact on
/// `live`. Other owner references are left alone.
fn repair_owner_references(
    live: &mut Option<Vec<OwnerReference>>,
    desired: &Option<Vec<OwnerReference>>,
) -> bool {
    let Some(desired) = desired else {
        return false;
    };
    let mut changed = false;
    for owner in desired {
        let refs = live.get_or_insert_with(Vec::new);
        match refs.iter().position(|r| same_owner(r, owner)) {
            Some(idx) if refs.get(idx) == Some(owner) => {}
            Some(idx) => {
                if let Some(slot) = refs.get_mut(idx) {
                    *slot = owner.clone();
                    changed = true;
                }
            }
            None => {
                refs.push(owner.clone());
                changed = true;
            }
        }
    }
    changed
}

/// Remove the `tracked` keys `desired` no longer has. Untracked keys were
/// set by someone else and stay.
fn prune_map(
    live: &mut Option<BTreeMap<String, String>>,
    tracked: &BTreeSet<String>,
    desired: &Option<BTreeMap<String, String>>,
) -> bool {
    let Some(map) = live.as_mut() else {
        return false;
    };
    let before = map.len();
    map.retain(|k, _| {
        !tracked.contains(k) || desired.as_ref().is_some_and(|d| d.contains_key(k))
    });
    map.len() != before
}

/// Labels, annotations and owner references.
///
/// Keys the operator set on an earlier pass and no longer desires are
/// pruned, going by the tracking annotations on `live`.
pub fn merge_metadata(live: &mut ObjectMeta, desired: &ObjectMeta) -> bool {
    let tracked_labels = tracked_keys(live, MANAGED_LABELS_ANNOTATION);
    let tracked_annotations = tracked_keys(live, MANAGED_ANNOTATIONS_ANNOTATION);

    let mut changed = prune_map(&mut live.labels, &tracked_labels, &desired.labels);
    changed |= prune_map(&mut live.annotations, &tracked_annotations, &desired.annotations);
    changed |= merge_map(&mut live.labels, &desired.labels);
    changed |= merge_map(&mut live.annotations, &desired.annotations);
    changed |= repair_owner_references(&mut live.owner_references, &desired.owner_references);
    changed
}

/// An empty pull-secret list and an absent one mean the same thing.
fn normalized_pull_secrets(
    secrets: &Option<Vec<LocalObjectReference>>,
) -> Option<Vec<LocalObjectReference>> {
    secrets.clone().filter(|s| !s.is_empty())
}

/// Requirements compared by value, so `500m` matches `0.5`. An empty
/// requirement and an absent one mean the same thing.
fn same_resources(
    live: &Option<ResourceRequirements>,
    desired: &Option<ResourceRequirements>,
) -> bool {
    let empty = ResourceRequirements::default();
    let live = live.as_ref().unwrap_or(&empty);
    let desired = desired.as_ref().unwrap_or(&empty);
    let claims = |r: &ResourceRequirements| r.claims.clone().filter(|c| !c.is_empty());
    same_quantities(live.limits.as_ref(), desired.limits.as_ref())
        && same_quantities(live.requests.as_ref(), desired.requests.as_ref())
        && claims(live) == claims(desired)
}

fn merge_container(live: &mut Container, desired: &Container) -> bool {
    let mut changed = set_if_changed(&mut live.image, &desired.image);
    if !same_resources(&live.resources, &desired.resources) {
        live.resources = desired.resources.clone();
        changed = true;
    }
    changed
}

fn merge_pod_spec(live: &mut PodSpec, desired: &PodSpec) -> bool {
    let mut changed = set_if_changed(&mut live.service_account_name, &desired.service_account_name);
    if normalized_pull_secrets(&live.image_pull_secrets)
        != normalized_pull_secrets(&desired.image_pull_secrets)
    {
        live.image_pull_secrets = desired.image_pull_secrets.clone();
        changed = true;
    }
    // Exact, so that removing affinity from the spec removes it here too
    changed |= set_if_changed(&mut live.affinity, &desired.affinity);

    if let Some(desired_c) = desired.containers.iter().find(|c| c.name == CONTAINER_NAME) {
        if let Some(live_c) = live.containers.iter_mut().find(|c| c.name == CONTAINER_NAME) {
            changed |= merge_container(live_c, desired_c);
        } else {
            live.containers = desired.containers.clone();
            changed = true;
        }
    }
    changed
}

impl ManagedResource for StatefulSet {
    fn merge_managed(&mut self, desired: &Self) -> bool {
        // Pod labels are the object labels, tracked by the same annotation
        let tracked_labels = tracked_keys(&self.metadata, MANAGED_LABELS_ANNOTATION);
        let mut changed = merge_metadata(&mut self.metadata, &desired.metadata);

        let Some(desired_spec) = desired.spec.as_ref() else {
            return changed;
        };
        let Some(live_spec) = self.spec.as_mut() else {
            self.spec = desired.spec.clone();
            return true;
        };

        changed |= set_if_changed(&mut live_spec.replicas, &desired_spec.replicas);

        // Selector and volume claim templates are immutable and not compared.
        let desired_template = &desired_spec.template;
        let live_template = &mut live_spec.template;
        if let Some(desired_meta) = desired_template.metadata.as_ref() {
            let live_meta = live_template.metadata.get_or_insert_with(ObjectMeta::default);
            changed |= prune_map(&mut live_meta.labels, &tracked_labels, &desired_meta.labels);
            changed |= merge_map(&mut live_meta.labels, &desired_meta.labels);
        }
        if let Some(desired_pod) = desired_template.spec.as_ref() {
            if let Some(live_pod) = live_template.spec.as_mut() {
                changed |= merge_pod_spec(live_pod, desired_pod);
            } else {
                live_template.spec = Some(desired_pod.clone());
                changed = true;
            }
        }
        changed
    }
}

/// Port identity for comparison: node ports are allocated by the platform.
fn port_key(port: &ServicePort) -> (Option<&str>, i32, Option<&str>, String) {
    let target = port.target_port.as_ref().map(|t| match t {
        IntOrString::Int(i) => i.to_string(),
        IntOrString::String(s) => s.clone(),
    });
    (
        port.name.as_deref(),
        port.port,
        port.protocol.as_deref(),
        target.unwrap_or_default(),
    )
}

fn ports_match(live: &[ServicePort], desired: &[ServicePort]) -> bool {
    live.len() == desired.len()
        && live
            .iter()
            .zip(desired)
            .all(|(l, d)| port_key(l) == port_key(d))
}

impl ManagedResource for Service {
    fn merge_managed(&mut self, desired: &Self) -> bool {
        let mut changed = merge_metadata(&mut self.metadata, &desired.metadata);

        let Some(desired_spec) = desired.spec.as_ref() else {
            return changed;
        };
        let Some(live_spec) = self.spec.as_mut() else {
            self.spec = desired.spec.clone();
            return true;
        };

        let mut clear_node_ports = false;
        if let Some(desired_type) = desired_spec.type_.as_ref() {
            if live_spec.type_.as_ref() != Some(desired_type) {
                live_spec.type_ = Some(desired_type.clone());
                clear_node_ports = desired_type == DEFAULT_SERVICE_TYPE;
                changed = true;
            }
        }

        if desired_spec.selector.is_some() {
            changed |= set_if_changed(&mut live_spec.selector, &desired_spec.selector);
        }

        if let Some(desired_ports) = desired_spec.ports.as_ref() {
            let live_ports = live_spec.ports.clone().unwrap_or_default();
            if !ports_match(&live_ports, desired_ports) {
                let merged = desired_ports
                    .iter()
                    .map(|port| {
                        let node_port = live_ports
                            .iter()
                            .find(|l| l.name == port.name)
                            .and_then(|l| l.node_port);
                        ServicePort {
                            node_port,
                            ..port.clone()
                        }
                    })
                    .collect();
                live_spec.ports = Some(merged);
                changed = true;
            }
        }

        // A ClusterIP service may not carry node ports.
        if clear_node_ports {
            for port in live_spec.ports.iter_mut().flatten() {
                port.node_port = None;
            }
        }

        if desired_spec.publish_not_ready_addresses.is_some() {
            changed |= set_if_changed(
                &mut live_spec.publish_not_ready_addresses,
                &desired_spec.publish_not_ready_addresses,
            );
        }
        changed
    }
}

impl ManagedResource for ConfigMap {
    fn merge_managed(&mut self, desired: &Self) -> bool {
        let changed = merge_metadata(&mut self.metadata, &desired.metadata);
        set_if_changed(&mut self.data, &desired.data) || changed
    }
}

impl ManagedResource for Secret {
    /// Payload is generated once at creation and never compared.
    fn merge_managed(&mut self, desired: &Self) -> bool {
        merge_metadata(&mut self.metadata, &desired.metadata)
    }
}

impl ManagedResource for ServiceAccount {
    fn merge_managed(&mut self, desired: &Self) -> bool {
        merge_metadata(&mut self.metadata, &desired.metadata)
    }
}

impl ManagedResource for Role {
    fn merge_managed(&mut self, desired: &Self) -> bool {
        let changed = merge_metadata(&mut self.metadata, &desired.metadata);
        set_if_changed(&mut self.rules, &desired.rules) || changed
    }
}

impl ManagedResource for RoleBinding {
    /// `roleRef` is immutable.
    fn merge_managed(&mut self, desired: &Self) -> bool {
        let changed = merge_metadata(&mut self.metadata, &desired.metadata);
        set_if_changed(&mut self.subjects, &desired.subjects) || changed
    }
}
