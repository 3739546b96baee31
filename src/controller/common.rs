//! Shared controller helpers.
//!
//! Finalizer handling for RabbitmqCluster objects.

use kube::ResourceExt;

use crate::controller::context::Context;
use crate::controller::error::Error;
use crate::crd::RabbitmqCluster;
use crate::store::ObjectStore;

/// Finalizer holding a RabbitmqCluster until its ingress service is removed.
pub const FINALIZER: &str = "deletion.finalizers.rabbitmqclusters.rabbitmq.com";

pub fn has_finalizer(resource: &RabbitmqCluster, finalizer: &str) -> bool {
    resource.finalizers().iter().any(|f| f == finalizer)
}

/// Add a finalizer to a cluster. Returns whether a write was made.
pub async fn add_finalizer<S: ObjectStore>(
    ctx: &Context<S>,
    resource: &RabbitmqCluster,
    finalizer: &str,
) -> Result<bool, Error> {
    // Only add if not already present
    if has_finalizer(resource, finalizer) {
        return Ok(false);
    }
    let mut finalizers = resource.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    ctx.with_timeout(
        format!("add finalizer to {}", resource.name_any()),
        ctx.store.set_finalizers(resource, finalizers),
    )
    .await?;
    Ok(true)
}

/// Remove a specific finalizer from a cluster.
pub async fn remove_finalizer<S: ObjectStore>(
    ctx: &Context<S>,
    resource: &RabbitmqCluster,
    finalizer: &str,
) -> Result<(), Error> {
    // Only write if the finalizer exists
    if !has_finalizer(resource, finalizer) {
        return Ok(());
    }
    let finalizers = resource
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != finalizer)
        .cloned()
        .collect();
    match ctx
        .with_timeout(
            format!("remove finalizer from {}", resource.name_any()),
            ctx.store.set_finalizers(resource, finalizers),
        )
        .await
    {
        // Resource already deleted, nothing to do
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
