//! Per-test namespaces, removed again on drop.
//!
//! Tests using TestNamespace must run on the multi-thread runtime
//! (`#[tokio::test(flavor = "multi_thread")]`); cleanup blocks in place.

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams, PropagationPolicy};
use kube::{Client, ResourceExt};
use rabbitmq_operator::crd::RabbitmqCluster;
use serde_json::json;
use uuid::Uuid;

pub struct TestNamespace {
    client: Client,
    name: String,
}

impl TestNamespace {
    /// Create `{prefix}-{8 hex chars}`.
    pub async fn create(client: Client, prefix: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!("{}-{}", prefix, &suffix[..8]);

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(
                    [(
                        "app.kubernetes.io/managed-by".to_string(),
                        "integration-test".to_string(),
                    )]
                    .into_iter()
                    .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };

        Api::<Namespace>::all(client.clone())
            .create(&PostParams::default(), &ns)
            .await
            .unwrap_or_else(|e| panic!("Failed to create test namespace {}: {}", name, e));

        tracing::info!(namespace = %name, "Created test namespace");
        Self { client, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.name)
    }

    /// Clusters whose operator already stopped keep their finalizer forever,
    /// which would wedge namespace deletion.
    async fn release_clusters(client: &Client, namespace: &str) {
        let api: Api<RabbitmqCluster> = Api::namespaced(client.clone(), namespace);
        let Ok(list) = api.list(&Default::default()).await else {
            return;
        };
        let patch: Patch<serde_json::Value> =
            Patch::Merge(json!({"metadata": {"finalizers": null}}));
        for cluster in list.items {
            if cluster.finalizers().is_empty() {
                continue;
            }
            let name = cluster.name_any();
            if let Err(e) = api.patch(&name, &PatchParams::default(), &patch).await {
                tracing::warn!("Failed to remove finalizer from RabbitmqCluster {}: {}", name, e);
            }
        }
    }
}

impl Drop for TestNamespace {
    fn drop(&mut self) {
        let name = self.name.clone();
        let client = self.client.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                Self::release_clusters(&client, &name).await;

                let dp = DeleteParams {
                    propagation_policy: Some(PropagationPolicy::Background),
                    ..Default::default()
                };
                match Api::<Namespace>::all(client).delete(&name, &dp).await {
                    Ok(_) => tracing::debug!("Drop: namespace {} deletion initiated", name),
                    Err(kube::Error::Api(e)) if e.code == 404 => {}
                    Err(e) => tracing::warn!("Drop: failed to delete namespace {}: {}", name, e),
                }
            });
        });
    }
}
