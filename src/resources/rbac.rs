//! Identity and RBAC objects for the broker pods.
//!
//! Peer discovery reads the headless service endpoints and the broker emits
//! events, so the pods run as a dedicated ServiceAccount bound to a Role
//! allowing exactly that. The permission set is fixed.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use kube::ResourceExt;

use crate::crd::RabbitmqCluster;
use crate::resources::common::child_metadata;
use crate::resources::naming;

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Generate the ServiceAccount the broker pods run as.
pub fn generate_service_account(resource: &RabbitmqCluster) -> ServiceAccount {
    ServiceAccount {
        metadata: child_metadata(resource, naming::SERVER),
        ..Default::default()
    }
}

fn core_rule(resource: &str, verb: &str) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![String::new()]),
        resources: Some(vec![resource.to_string()]),
        verbs: vec![verb.to_string()],
        ..Default::default()
    }
}

/// Rules of the endpoint-discovery Role.
pub fn endpoint_discovery_rules() -> Vec<PolicyRule> {
    vec![core_rule("endpoints", "get"), core_rule("events", "create")]
}

/// Generate the endpoint-discovery Role.
pub fn generate_role(resource: &RabbitmqCluster) -> Role {
    Role {
        metadata: child_metadata(resource, naming::ENDPOINT_DISCOVERY),
        rules: Some(endpoint_discovery_rules()),
    }
}

/// Generate the RoleBinding granting the Role to the ServiceAccount.
pub fn generate_role_binding(resource: &RabbitmqCluster) -> RoleBinding {
    let cluster = resource.name_any();
    RoleBinding {
        metadata: child_metadata(resource, naming::SERVER),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "Role".to_string(),
            name: naming::child_name(&cluster, naming::ENDPOINT_DISCOVERY),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: naming::child_name(&cluster, naming::SERVER),
            namespace: resource.namespace(),
            ..Default::default()
        }]),
    }
}
