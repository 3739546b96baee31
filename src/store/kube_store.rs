//! [`ObjectStore`] backed by the Kubernetes API server.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use super::{ObjectStore, StoreError, StoredObject};
use crate::crd::{RabbitmqCluster, RabbitmqClusterStatus};

/// Kubernetes API implementation of [`ObjectStore`].
///
/// Dependents are removed by the cluster garbage collector through their
/// owner references, so [`ObjectStore::cascades_deletion`] is `true`.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            field_manager: field_manager.to_string(),
        }
    }

    fn api<K: StoredObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

fn namespace_of<K: StoredObject>(obj: &K) -> Result<String, StoreError> {
    obj.namespace()
        .ok_or_else(|| StoreError::Invalid(format!("{} has no namespace", obj.name_any())))
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoredObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn create<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError> {
        let namespace = namespace_of(obj)?;
        let created = self
            .api::<K>(&namespace)
            .create(&self.post_params(), obj)
            .await?;
        Ok(created)
    }

    async fn update<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError> {
        let namespace = namespace_of(obj)?;
        let name = obj.name_any();
        let replaced = self
            .api::<K>(&namespace)
            .replace(&name, &self.post_params(), obj)
            .await?;
        Ok(replaced)
    }

    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(namespace = %namespace, name = %name, "Object already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list<K: StoredObject>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>, StoreError> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.api::<K>(namespace).list(&params).await?.items)
    }

    async fn update_status(
        &self,
        cluster: &RabbitmqCluster,
        status: &RabbitmqClusterStatus,
    ) -> Result<(), StoreError> {
        let namespace = namespace_of(cluster)?;
        let patch = json!({ "status": status });
        self.api::<RabbitmqCluster>(&namespace)
            .patch_status(
                &cluster.name_any(),
                &self.patch_params(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    async fn set_finalizers(
        &self,
        cluster: &RabbitmqCluster,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError> {
        let namespace = namespace_of(cluster)?;
        // resourceVersion makes the merge patch fail on a concurrent finalizer edit
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": cluster.resource_version(),
            }
        });
        self.api::<RabbitmqCluster>(&namespace)
            .patch(
                &cluster.name_any(),
                &self.patch_params(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    fn cascades_deletion(&self) -> bool {
        true
    }
}
