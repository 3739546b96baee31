//! Reconcile harness over the in-memory object store.
//!
//! Drives the engine pass by pass, without the controller runtime, so tests
//! can assert on the store between passes.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use rabbitmq_operator::controller::context::Context;
use rabbitmq_operator::controller::error::{Error, Result};
use rabbitmq_operator::controller::reconciler::{error_policy, reconcile, reconcile_cluster};
use rabbitmq_operator::crd::{ClusterStatus, RabbitmqCluster};
use rabbitmq_operator::health::ReconcileLabels;
use rabbitmq_operator::{Config, HealthState};
use rabbitmq_operator::store::{MemoryStore, ObjectKey, ObjectStore, StoredObject};

pub const NAMESPACE: &str = "rabbits";

/// Passes allowed before a test gives up on convergence.
const MAX_PASSES: usize = 5;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub ctx: Arc<Context<MemoryStore>>,
    pub health: Arc<HealthState>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let health = Arc::new(HealthState::new());
        let ctx = Arc::new(Context::new(store.clone(), config, Some(health.clone())));
        Self { store, ctx, health }
    }

    pub fn key(name: &str) -> ObjectKey {
        ObjectKey::new(NAMESPACE, name)
    }

    /// Store `cluster` in the test namespace; the store assigns its uid.
    pub async fn create_cluster(&self, mut cluster: RabbitmqCluster) -> RabbitmqCluster {
        cluster.metadata.namespace = Some(NAMESPACE.to_string());
        cluster.metadata.uid = None;
        self.store
            .create(&cluster)
            .await
            .expect("cluster should be created")
    }

    pub async fn cluster(&self, name: &str) -> RabbitmqCluster {
        self.try_cluster(name).await.expect("cluster should exist")
    }

    pub async fn try_cluster(&self, name: &str) -> Option<RabbitmqCluster> {
        self.store
            .get::<RabbitmqCluster>(NAMESPACE, name)
            .await
            .expect("get should succeed")
    }

    /// Apply `edit` to the stored cluster.
    pub async fn update_cluster(&self, name: &str, edit: impl FnOnce(&mut RabbitmqCluster)) {
        let mut cluster = self.cluster(name).await;
        edit(&mut cluster);
        self.store
            .update(&cluster)
            .await
            .expect("cluster update should succeed");
    }

    pub async fn status(&self, name: &str) -> ClusterStatus {
        self.cluster(name).await.cluster_status()
    }

    /// Run one pass.
    pub async fn reconcile(&self, name: &str) -> Result<Action> {
        reconcile(&Self::key(name), &self.ctx).await
    }

    /// Run one pass the way the controller runtime does: through
    /// `reconcile_cluster`, then `error_policy` on failure.
    pub async fn run_pass(&self, name: &str) -> std::result::Result<Action, (Error, Action)> {
        let cluster = Arc::new(self.cluster(name).await);
        match reconcile_cluster(cluster.clone(), self.ctx.clone()).await {
            Ok(action) => Ok(action),
            Err(e) => {
                let action = error_policy(cluster, &e, self.ctx.clone());
                Err((e, action))
            }
        }
    }

    /// Passes recorded in the metrics for `name`.
    pub fn passes(&self, name: &str) -> u64 {
        self.health
            .metrics
            .reconciliations_total
            .get_or_create(&ReconcileLabels {
                namespace: NAMESPACE.to_string(),
                name: name.to_string(),
            })
            .get()
    }

    /// Run passes until one succeeds.
    pub async fn converge(&self, name: &str) -> Action {
        let mut last_error = None;
        for _ in 0..MAX_PASSES {
            match self.reconcile(name).await {
                Ok(action) => return action,
                Err(e) => last_error = Some(e),
            }
        }
        panic!("{name} did not converge: {last_error:?}");
    }

    /// Fetch the child `<cluster>-<suffix>`.
    pub async fn child<K: StoredObject>(&self, cluster: &str, suffix: &str) -> K {
        let name = format!("{cluster}-{suffix}");
        self.store
            .get::<K>(NAMESPACE, &name)
            .await
            .expect("get should succeed")
            .unwrap_or_else(|| panic!("{} {name} should exist", K::kind(&())))
    }

    pub async fn child_exists<K: StoredObject>(&self, cluster: &str, suffix: &str) -> bool {
        let name = format!("{cluster}-{suffix}");
        self.store
            .get::<K>(NAMESPACE, &name)
            .await
            .expect("get should succeed")
            .is_some()
    }

    /// Delete the cluster through the store, as `kubectl delete` would.
    pub async fn delete_cluster(&self, name: &str) {
        self.store
            .delete::<RabbitmqCluster>(NAMESPACE, name)
            .await
            .expect("delete should succeed");
    }
}

pub fn test_config() -> Config {
    Config {
        store_timeout: Duration::from_secs(5),
        retry_budget: 3,
        ..Config::default()
    }
}

/// Names of every child of `cluster` paired with their kind.
pub fn all_children(cluster: &str) -> Vec<(&'static str, String)> {
    vec![
        ("ServiceAccount", format!("{cluster}-server")),
        ("Role", format!("{cluster}-endpoint-discovery")),
        ("RoleBinding", format!("{cluster}-server")),
        ("ConfigMap", format!("{cluster}-server-conf")),
        ("Secret", format!("{cluster}-admin")),
        ("Secret", format!("{cluster}-erlang-cookie")),
        ("Service", format!("{cluster}-headless")),
        ("Service", format!("{cluster}-ingress")),
        ("StatefulSet", format!("{cluster}-server")),
    ]
}

