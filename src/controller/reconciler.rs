//! Reconciliation loop for RabbitmqCluster.
//!
//! One pass, for one cluster key:
//! 1. fetch the cluster; absent means it was deleted and the pass stops
//!    (after collecting orphans when the store does not cascade)
//! 2. handle deletion through the finalizer, or make sure it is present
//! 3. build the desired children; an invalid spec ends in `error` status
//! 4. create missing children, merge managed fields into existing ones
//! 5. project the outcome through the status state machine and write the
//!    status only when it changed
//!
//! Child failures do not stop the pass. They are aggregated and the
//! aggregate decides the status and the retry schedule.
//!
//! [`reconcile_cluster`] and [`error_policy`] are the entry points the
//! controller runtime drives; [`reconcile`] is the pass itself, keyed by
//! name so it can also run against a cluster that is gone.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::controller::common::{FINALIZER, add_finalizer, has_finalizer, remove_finalizer};
use crate::controller::context::Context;
use crate::controller::diff::ManagedResource;
use crate::controller::error::{Error, ErrorKind, Result};
use crate::controller::state_machine::TransitionContext;
use crate::controller::status::{Failure, project_status};
use crate::crd::{ClusterStatus, RabbitmqCluster, RabbitmqClusterStatus};
use crate::resources::common::{children_selector, is_cluster_owner};
use crate::resources::naming;
use crate::resources::secrets::{SecretKind, generate_payload};
use crate::resources::DesiredState;
use crate::store::{ObjectKey, ObjectStore, StoredObject};

/// What happened to one child during a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOutcome {
    Unchanged,
    Created,
    Updated,
}

/// Report for one child
#[derive(Debug)]
struct ChildReport {
    outcome: Result<ChildOutcome>,
    /// `Some(true)` if the child exists after the pass, `None` if unknown
    exists: Option<bool>,
    /// A successful fetch found the child missing
    observed_absent: bool,
}

/// Reconcile the RabbitmqCluster identified by `key`.
pub async fn reconcile<S: ObjectStore>(key: &ObjectKey, ctx: &Context<S>) -> Result<Action> {
    let started = Instant::now();
    debug!(namespace = %key.namespace, name = %key.name, "Reconciling RabbitmqCluster");

    let fetched = ctx
        .with_timeout(
            format!("get RabbitmqCluster {key}"),
            ctx.store
                .get::<RabbitmqCluster>(&key.namespace, &key.name),
        )
        .await?;

    let Some(cluster) = fetched else {
        debug!(namespace = %key.namespace, name = %key.name, "RabbitmqCluster not found, nothing to do");
        if !ctx.store.cascades_deletion() {
            collect_children(key, ctx).await?;
        }
        return Ok(Action::await_change());
    };

    if cluster.metadata.deletion_timestamp.is_some() {
        return handle_deletion(key, &cluster, ctx).await;
    }

    if add_finalizer(ctx, &cluster, FINALIZER).await? {
        info!(namespace = %key.namespace, name = %key.name, "Added finalizer");
    }

    let result = converge(key, &cluster, ctx).await;
    ctx.record_pass(&cluster, started, result.is_err());
    result
}

/// Tracks the status last written during this pass.
struct StatusWriter {
    current: Option<RabbitmqClusterStatus>,
}

impl StatusWriter {
    fn new(cluster: &RabbitmqCluster) -> Self {
        Self {
            current: cluster.status.clone(),
        }
    }

    fn cluster_status(&self) -> ClusterStatus {
        self.current
            .as_ref()
            .map(|s| s.cluster_status)
            .unwrap_or_default()
    }

    /// Write the projected status if it differs from the current one.
    async fn write<S: ObjectStore>(
        &mut self,
        cluster: &RabbitmqCluster,
        ctx: &Context<S>,
        cluster_status: ClusterStatus,
        failure: Option<&Failure>,
    ) -> Result<bool> {
        let status = project_status(
            self.current.as_ref(),
            cluster_status,
            failure,
            cluster.metadata.generation,
        );
        if self.current.as_ref() == Some(&status) {
            return Ok(false);
        }
        ctx.with_timeout(
            format!("update status of {}", cluster.name_any()),
            ctx.store.update_status(cluster, &status),
        )
        .await?;
        debug!(
            name = %cluster.name_any(),
            status = %cluster_status,
            "Status updated"
        );
        self.current = Some(status);
        Ok(true)
    }
}

async fn converge<S: ObjectStore>(
    key: &ObjectKey,
    cluster: &RabbitmqCluster,
    ctx: &Context<S>,
) -> Result<Action> {
    let sm = &ctx.state_machine;
    let mut status = StatusWriter::new(cluster);

    let desired = match DesiredState::build(cluster) {
        Ok(desired) => desired,
        Err(e) => {
            error!(namespace = %key.namespace, name = %key.name, error = %e, "Validation failed");
            let transition = TransitionContext::new(false).with_error(e.kind());
            let next = sm.next_status(status.cluster_status(), &transition);
            let failure = Failure::new(e.reason(), e.to_string());
            if status.write(cluster, ctx, next, Some(&failure)).await? {
                ctx.publish_warning_event(cluster, "ValidationFailed", "Validating", Some(e.to_string()))
                    .await;
            }
            return Err(e);
        }
    };

    let DesiredState {
        service_account,
        role,
        role_binding,
        config_map,
        admin_secret,
        erlang_cookie_secret,
        headless_service,
        ingress_service,
        stateful_set,
    } = desired;

    let optional = vec![
        ensure_child(ctx, service_account, |_| {}).await,
        ensure_child(ctx, role, |_| {}).await,
        ensure_child(ctx, role_binding, |_| {}).await,
        ensure_child(ctx, config_map, |_| {}).await,
        ensure_child(ctx, admin_secret, with_payload(SecretKind::Admin)).await,
        ensure_child(ctx, erlang_cookie_secret, with_payload(SecretKind::ErlangCookie)).await,
    ];
    let required = vec![
        ensure_child(ctx, headless_service, |_| {}).await,
        ensure_child(ctx, ingress_service, |_| {}).await,
        ensure_child(ctx, stateful_set, |_| {}).await,
    ];

    let required_present = required.iter().all(|r| r.exists == Some(true));
    let required_absent_observed = required.iter().any(|r| r.observed_absent);

    let mut errors = Vec::new();
    let mut written = 0usize;
    for report in optional.into_iter().chain(required) {
        match report.outcome {
            Ok(ChildOutcome::Unchanged) => {}
            Ok(_) => written += 1,
            Err(e) => errors.push(e),
        }
    }
    let error = match errors.len() {
        0 => None,
        1 => errors.pop(),
        _ => Some(Error::Aggregate(errors)),
    };

    let mut transition =
        TransitionContext::new(required_present).with_absent_observed(required_absent_observed);
    if let Some(e) = &error {
        transition = transition.with_error(e.kind());
    }
    let previous = status.cluster_status();
    let next = sm.next_status(previous, &transition);
    let failure = error
        .as_ref()
        .filter(|e| e.kind() != ErrorKind::Transient)
        .map(|e| Failure::new(e.reason(), e.to_string()));
    let status_result = status.write(cluster, ctx, next, failure.as_ref()).await;

    if next != previous {
        info!(
            namespace = %key.namespace,
            name = %key.name,
            from = %previous,
            to = %next,
            children_written = written,
            "Cluster status changed"
        );
        match next {
            ClusterStatus::Creating => {
                ctx.publish_normal_event(
                    cluster,
                    "Creating",
                    "CreateResources",
                    Some("Waiting for required child objects".to_string()),
                )
                .await;
            }
            ClusterStatus::Created => {
                ctx.publish_normal_event(
                    cluster,
                    "Created",
                    "Reconciling",
                    Some("All child objects exist".to_string()),
                )
                .await;
            }
            ClusterStatus::Error => {
                let note = failure.as_ref().map(|f| f.message.clone());
                ctx.publish_warning_event(cluster, "Failed", "Reconciling", note)
                    .await;
            }
            _ => {}
        }
    }

    match (error, status_result) {
        (Some(e), _) => Err(e),
        (None, Err(e)) => Err(e),
        (None, Ok(_)) => {
            debug!(namespace = %key.namespace, name = %key.name, children_written = written, "Pass complete");
            Ok(Action::requeue(ctx.config.resync_period))
        }
    }
}

/// Fill a generated Secret's payload at creation.
fn with_payload(kind: SecretKind) -> impl FnOnce(&mut Secret) + Send {
    move |secret| secret.data = Some(generate_payload(kind))
}

/// Converge one child: create it when missing, otherwise merge the managed
/// fields and write back only if something changed.
async fn ensure_child<S, K, F>(ctx: &Context<S>, desired: K, on_create: F) -> ChildReport
where
    S: ObjectStore,
    K: ManagedResource,
    F: FnOnce(&mut K) + Send,
{
    let kind = K::kind(&()).to_string();
    let name = desired.name_any();
    let namespace = desired.namespace().unwrap_or_default();
    let child = format!("{kind} {name}");

    let live = match ctx
        .with_timeout(format!("get {child}"), ctx.store.get::<K>(&namespace, &name))
        .await
    {
        Ok(live) => live,
        Err(e) => {
            warn!(kind = %kind, name = %name, error = %e, "Failed to read child");
            return ChildReport {
                outcome: Err(Error::for_child(child, e)),
                exists: None,
                observed_absent: false,
            };
        }
    };

    match live {
        None => {
            let mut obj = desired;
            on_create(&mut obj);
            let result = ctx
                .with_timeout(format!("create {child}"), ctx.store.create(&obj))
                .await;
            match result {
                Ok(_) => {
                    info!(kind = %kind, namespace = %namespace, name = %name, "Created child");
                    ChildReport {
                        outcome: Ok(ChildOutcome::Created),
                        exists: Some(true),
                        observed_absent: true,
                    }
                }
                Err(e) => {
                    warn!(kind = %kind, name = %name, error = %e, "Failed to create child");
                    ChildReport {
                        outcome: Err(Error::for_child(child, e)),
                        exists: Some(false),
                        observed_absent: true,
                    }
                }
            }
        }
        Some(mut live) => {
            if !live.merge_managed(&desired) {
                return ChildReport {
                    outcome: Ok(ChildOutcome::Unchanged),
                    exists: Some(true),
                    observed_absent: false,
                };
            }
            let result = ctx
                .with_timeout(format!("update {child}"), ctx.store.update(&live))
                .await;
            match result {
                Ok(_) => {
                    info!(kind = %kind, namespace = %namespace, name = %name, "Updated child");
                    ChildReport {
                        outcome: Ok(ChildOutcome::Updated),
                        exists: Some(true),
                        observed_absent: false,
                    }
                }
                Err(e) => {
                    warn!(kind = %kind, name = %name, error = %e, "Failed to update child");
                    ChildReport {
                        outcome: Err(Error::for_child(child, e)),
                        exists: Some(true),
                        observed_absent: false,
                    }
                }
            }
        }
    }
}

/// Run the finalizer: delete the ingress service (and every other child
/// when the store does not cascade), then release the cluster.
async fn handle_deletion<S: ObjectStore>(
    key: &ObjectKey,
    cluster: &RabbitmqCluster,
    ctx: &Context<S>,
) -> Result<Action> {
    if !has_finalizer(cluster, FINALIZER) {
        return Ok(Action::await_change());
    }
    info!(namespace = %key.namespace, name = %key.name, "Handling deletion");

    let ingress = naming::child_name(&key.name, naming::INGRESS);
    ctx.with_timeout(
        format!("delete Service {ingress}"),
        ctx.store.delete::<Service>(&key.namespace, &ingress),
    )
    .await?;

    if !ctx.store.cascades_deletion() {
        collect_children(key, ctx).await?;
    }

    remove_finalizer(ctx, cluster, FINALIZER).await?;
    info!(namespace = %key.namespace, name = %key.name, "Finalizer removed");
    Ok(Action::await_change())
}

/// Delete every child of `key` for stores that do not cascade.
///
/// Children are listed by the managed-by selector and only deleted when
/// their owner reference points at the cluster.
async fn collect_children<S: ObjectStore>(key: &ObjectKey, ctx: &Context<S>) -> Result<usize> {
    let results = [
        delete_owned::<S, StatefulSet>(key, ctx).await,
        delete_owned::<S, Service>(key, ctx).await,
        delete_owned::<S, ConfigMap>(key, ctx).await,
        delete_owned::<S, Secret>(key, ctx).await,
        delete_owned::<S, RoleBinding>(key, ctx).await,
        delete_owned::<S, Role>(key, ctx).await,
        delete_owned::<S, ServiceAccount>(key, ctx).await,
    ];

    let mut deleted = 0;
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(n) => deleted += n,
            Err(e) => errors.push(e),
        }
    }
    if deleted > 0 {
        info!(namespace = %key.namespace, name = %key.name, deleted, "Deleted children");
    }
    match errors.len() {
        0 => Ok(deleted),
        1 => Err(errors.remove(0)),
        _ => Err(Error::Aggregate(errors)),
    }
}

async fn delete_owned<S: ObjectStore, K: StoredObject>(
    key: &ObjectKey,
    ctx: &Context<S>,
) -> Result<usize> {
    let kind = K::kind(&());
    let selector = children_selector(&key.name);
    let objects = ctx
        .with_timeout(
            format!("list {kind} of {key}"),
            ctx.store.list::<K>(&key.namespace, &selector),
        )
        .await?;

    let mut deleted = 0;
    for obj in objects.iter().filter(|obj| {
        obj.owner_references()
            .iter()
            .any(|owner| is_cluster_owner(owner, &key.name))
    }) {
        let name = obj.name_any();
        ctx.with_timeout(
            format!("delete {kind} {name}"),
            ctx.store.delete::<K>(&key.namespace, &name),
        )
        .await?;
        debug!(kind = %kind, name = %name, "Deleted child");
        deleted += 1;
    }
    Ok(deleted)
}

/// Controller entry point: run one pass over `cluster` and keep the
/// failure count that [`error_policy`] schedules retries from.
///
/// When a transient failure uses up the retry budget, the failure is
/// written to status before the error is handed back.
pub async fn reconcile_cluster<S: ObjectStore>(
    cluster: Arc<RabbitmqCluster>,
    ctx: Arc<Context<S>>,
) -> Result<Action> {
    let key = ObjectKey::from_resource(cluster.as_ref())
        .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))?;

    let result = reconcile(&key, &ctx).await;
    match &result {
        Ok(_) => ctx.retries.forget(&key),
        Err(e) if e.kind() == ErrorKind::Transient => {
            let failures = ctx.retries.record(&key);
            if failures > ctx.config.retry_budget {
                warn!(
                    namespace = %key.namespace,
                    name = %key.name,
                    failures,
                    error = %e,
                    "Retry budget exhausted"
                );
                if let Err(report) = surface_exhausted_retries(&key, e, &ctx).await {
                    warn!(namespace = %key.namespace, name = %key.name, error = %report, "Failed to report exhausted retries");
                }
            }
        }
        Err(_) => ctx.retries.forget(&key),
    }
    result
}

/// Schedule the cluster after a failed pass.
///
/// Transient errors are retried with per-cluster backoff. Once the retry
/// budget is used up the count starts over and the next attempt waits for
/// the resync period. Validation and irrecoverable errors are already in
/// status and wait for the next change.
pub fn error_policy<S: ObjectStore>(
    cluster: Arc<RabbitmqCluster>,
    error: &Error,
    ctx: Arc<Context<S>>,
) -> Action {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    match error.kind() {
        ErrorKind::Transient => {
            let key = ObjectKey::new(namespace.clone(), name.clone());
            let failures = ctx.retries.failures(&key);
            if failures > ctx.config.retry_budget {
                ctx.retries.forget(&key);
                return Action::requeue(ctx.config.resync_period);
            }
            let delay = ctx.config.backoff.delay(failures.max(1));
            debug!(
                namespace = %namespace,
                name = %name,
                failures,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, requeued"
            );
            Action::requeue(delay)
        }
        ErrorKind::Validation | ErrorKind::Irrecoverable => {
            warn!(
                namespace = %namespace,
                name = %name,
                reason = error.reason(),
                error = %error,
                "Not retrying until the cluster changes"
            );
            Action::await_change()
        }
    }
}

async fn surface_exhausted_retries<S: ObjectStore>(
    key: &ObjectKey,
    error: &Error,
    ctx: &Context<S>,
) -> Result<()> {
    let Some(cluster) = ctx
        .with_timeout(
            format!("get RabbitmqCluster {key}"),
            ctx.store
                .get::<RabbitmqCluster>(&key.namespace, &key.name),
        )
        .await?
    else {
        return Ok(());
    };
    let mut status = StatusWriter::new(&cluster);
    let transition = TransitionContext::default().with_retries_exhausted();
    let next = ctx.state_machine.next_status(status.cluster_status(), &transition);
    let failure = Failure::new("RetryBudgetExhausted", error.to_string());
    if status.write(&cluster, ctx, next, Some(&failure)).await? {
        ctx.publish_warning_event(&cluster, "RetryBudgetExhausted", "Reconciling", Some(error.to_string()))
            .await;
    }
    Ok(())
}
