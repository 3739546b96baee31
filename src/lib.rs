//! rabbitmq-operator library crate
//!
//! This module exports the controller, CRD definitions, resource generators,
//! the object store abstraction and the operator runtime that wires them to
//! a Kubernetes cluster.

pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;
pub mod store;

pub use config::Config;
pub use health::HealthState;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::runtime::controller::{self as runtime_controller, Controller};
use kube::runtime::utils::Predicate;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use kube_leader_election::{LeaseLock, LeaseLockParams};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use controller::context::{Context, FIELD_MANAGER};
use controller::reconciler::{error_policy, reconcile_cluster};
use crd::RabbitmqCluster;
use store::KubeStore;

/// Interval between refreshes of the clusters-by-status gauge
const METRICS_INTERVAL: Duration = Duration::from_secs(15);

/// Lease lock this replica competes for, named by `config.lease_name` in
/// the pod's own namespace.
pub fn leader_lease(client: Client, config: &Config, ttl: Duration) -> LeaseLock {
    LeaseLock::new(
        client,
        &config.pod_namespace,
        LeaseLockParams {
            holder_id: config.pod_name.clone(),
            lease_name: config.lease_name.clone(),
            lease_ttl: ttl,
        },
    )
}

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all watches.
///
/// `any_semantic()` lets the initial list be served from the API server
/// cache.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Cluster watch feeding the controller, plus the reflector store behind it.
///
/// Status-only updates are dropped. Spec changes bump the generation;
/// label, annotation and finalizer edits do not, so they are let through
/// explicitly because children carry the propagated metadata.
fn cluster_stream(
    api: Api<RabbitmqCluster>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<RabbitmqCluster>,
    impl Stream<Item = Result<RabbitmqCluster, watcher::Error>>,
) {
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(
            predicates::generation
                .combine(predicates::labels)
                .combine(predicates::annotations)
                .combine(predicates::finalizers),
        );
    (reader, stream)
}

/// Run the operator until `shutdown` resolves.
///
/// Watches RabbitmqCluster objects and the metadata of every child kind,
/// and reconciles with at most `config.workers` passes in flight. The
/// controller keeps one pending entry per cluster and never runs two
/// passes for the same cluster at once. On shutdown no new pass starts and
/// in-flight passes get `grace` to finish.
pub async fn run_operator(
    client: Client,
    config: Config,
    health_state: Option<Arc<HealthState>>,
    shutdown: impl Future<Output = ()> + Send + 'static,
    grace: Duration,
) {
    let namespace = config.watch_namespace.clone();
    let scope_msg = namespace.as_deref().unwrap_or("cluster-wide");
    info!(
        scope = scope_msg,
        workers = config.workers,
        "Starting RabbitmqCluster controller"
    );

    let store = Arc::new(KubeStore::new(client.clone(), FIELD_MANAGER));
    let ctx = Arc::new(
        Context::new(store, config.clone(), health_state.clone()).with_events(client.clone()),
    );

    let ns = namespace.as_deref();
    let watcher_config = default_watcher_config();
    let (reader, clusters) = cluster_stream(scoped_api(client.clone(), ns), watcher_config.clone());

    let metrics_handle = health_state.clone().map(|health| {
        let reader = reader.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(METRICS_INTERVAL);
            loop {
                interval.tick().await;
                health
                    .metrics
                    .set_clusters_by_status(reader.state().iter().map(|c| c.cluster_status()));
            }
        })
    });

    if let Some(state) = &health_state {
        state.set_ready(true).await;
    }

    let concurrency = u16::try_from(config.workers).unwrap_or(u16::MAX);
    let (trigger_tx, trigger_rx) = tokio::sync::oneshot::channel::<()>();
    let (stopped_tx, stopped_rx) = tokio::sync::oneshot::channel::<()>();
    let signal_handle = tokio::spawn(async move {
        shutdown.await;
        info!("Stopping controller");
        let _ = trigger_tx.send(());
        let _ = stopped_tx.send(());
    });

    let controller = Controller::for_stream(clusters, reader)
        .with_config(runtime_controller::Config::default().concurrency(concurrency))
        .owns_stream(
            metadata_watcher(scoped_api::<StatefulSet>(client.clone(), ns), watcher_config.clone())
                .touched_objects(),
        )
        .owns_stream(
            metadata_watcher(scoped_api::<Service>(client.clone(), ns), watcher_config.clone())
                .touched_objects(),
        )
        .owns_stream(
            metadata_watcher(scoped_api::<ConfigMap>(client.clone(), ns), watcher_config.clone())
                .touched_objects(),
        )
        .owns_stream(
            metadata_watcher(scoped_api::<Secret>(client.clone(), ns), watcher_config.clone())
                .touched_objects(),
        )
        .owns_stream(
            metadata_watcher(scoped_api::<ServiceAccount>(client.clone(), ns), watcher_config.clone())
                .touched_objects(),
        )
        .owns_stream(
            metadata_watcher(scoped_api::<Role>(client.clone(), ns), watcher_config.clone())
                .touched_objects(),
        )
        .owns_stream(
            metadata_watcher(scoped_api::<RoleBinding>(client.clone(), ns), watcher_config)
                .touched_objects(),
        )
        .graceful_shutdown_on(async move {
            let _ = trigger_rx.await;
        })
        .run(reconcile_cluster::<KubeStore>, error_policy::<KubeStore>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!(namespace = ?obj.namespace, name = %obj.name, "Reconciled");
                }
                Err(e) => {
                    // Child events for a cluster that is already gone
                    let is_not_found = match &e {
                        runtime_controller::Error::ObjectNotFound(_) => true,
                        runtime_controller::Error::ReconcilerFailed(err, _) => err.is_not_found(),
                        _ => false,
                    };
                    if is_not_found {
                        debug!(error = ?e, "Object no longer exists");
                    } else {
                        warn!(error = %e, "Reconciliation failed");
                    }
                }
            }
        });

    // Once shutdown fires the controller stops scheduling and drains the
    // passes already running; those get `grace` before being dropped.
    let drained = async {
        if stopped_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(grace).await;
    };
    tokio::select! {
        _ = controller => {
            info!("Controller stopped");
        }
        _ = drained => {
            warn!(grace_secs = grace.as_secs(), "In-flight passes did not finish within grace period");
        }
    }

    if let Some(state) = &health_state {
        state.set_ready(false).await;
    }
    if let Some(handle) = metrics_handle {
        handle.abort();
    }
    signal_handle.abort();
}
