//! Desired-state builder.
//!
//! [`DesiredState::build`] turns a RabbitmqCluster into the complete set of
//! child objects it should own. It performs no I/O and is deterministic:
//! the same input always yields identical descriptors, which is what lets the
//! engine treat an unchanged spec as a no-op. Either every descriptor is
//! produced or a validation error is returned.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};

use crate::controller::error::{Error, Result};
use crate::crd::{RabbitmqCluster, SUPPORTED_SERVICE_TYPES};
use crate::resources::{config_map, rbac, secrets, services, statefulset};

/// Minimum number of replicas
pub const MIN_REPLICAS: i32 = 1;

/// Every child object of one RabbitmqCluster.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredState {
    pub service_account: ServiceAccount,
    pub role: Role,
    pub role_binding: RoleBinding,
    pub config_map: ConfigMap,
    pub admin_secret: Secret,
    pub erlang_cookie_secret: Secret,
    pub headless_service: Service,
    pub ingress_service: Service,
    pub stateful_set: StatefulSet,
}

impl DesiredState {
    /// Validate `resource` and generate all of its children.
    pub fn build(resource: &RabbitmqCluster) -> Result<Self> {
        validate(resource)?;

        Ok(Self {
            service_account: rbac::generate_service_account(resource),
            role: rbac::generate_role(resource),
            role_binding: rbac::generate_role_binding(resource),
            config_map: config_map::generate_config_map(resource),
            admin_secret: secrets::generate_admin_secret(resource),
            erlang_cookie_secret: secrets::generate_erlang_cookie_secret(resource),
            headless_service: services::generate_headless_service(resource),
            ingress_service: services::generate_ingress_service(resource),
            stateful_set: statefulset::generate_statefulset(resource),
        })
    }
}

/// Validate the resource before anything is generated from it.
pub fn validate(resource: &RabbitmqCluster) -> Result<()> {
    validate_identity(resource)?;
    validate_replicas(resource)?;
    validate_service_type(resource)?;
    Ok(())
}

/// Children need the parent's name, namespace and uid for naming and the
/// owner reference.
fn validate_identity(resource: &RabbitmqCluster) -> Result<()> {
    let meta = &resource.metadata;
    if meta.name.as_deref().is_none_or(str::is_empty) {
        return Err(Error::MissingField("metadata.name".to_string()));
    }
    if meta.namespace.as_deref().is_none_or(str::is_empty) {
        return Err(Error::MissingField("metadata.namespace".to_string()));
    }
    if meta.uid.as_deref().is_none_or(str::is_empty) {
        return Err(Error::MissingField("metadata.uid".to_string()));
    }
    Ok(())
}

fn validate_replicas(resource: &RabbitmqCluster) -> Result<()> {
    let replicas = resource.spec.replicas;
    if replicas < MIN_REPLICAS {
        return Err(Error::Validation(format!(
            "replica count {replicas} is below minimum {MIN_REPLICAS}"
        )));
    }
    Ok(())
}

fn validate_service_type(resource: &RabbitmqCluster) -> Result<()> {
    let service_type = resource.service_type();
    if !SUPPORTED_SERVICE_TYPES.contains(&service_type) {
        return Err(Error::Validation(format!(
            "service type {service_type:?} is not one of {}",
            SUPPORTED_SERVICE_TYPES.join(", ")
        )));
    }
    Ok(())
}
