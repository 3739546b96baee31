//! Bounded waits on live objects, built on `kube::runtime::wait`.

use std::fmt::Debug;
use std::time::Duration;

use kube::Resource;
use kube::api::Api;
use kube::runtime::wait::{self, await_condition};
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use rabbitmq_operator::crd::{ClusterStatus, RabbitmqCluster};

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("gave up after {0:?}")]
    Timeout(Duration),

    #[error("object is gone")]
    Deleted,

    #[error(transparent)]
    Watch(#[from] wait::Error),
}

/// Wait until `name` exists and satisfies `condition`.
pub async fn wait_for_condition<K>(
    api: &Api<K>,
    name: &str,
    condition: impl Fn(&K) -> bool,
    limit: Duration,
) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + Send + DeserializeOwned + 'static,
{
    let found = timeout(
        limit,
        await_condition(api.clone(), name, |obj: Option<&K>| obj.is_some_and(&condition)),
    )
    .await
    .map_err(|_| WaitError::Timeout(limit))??;
    found.ok_or(WaitError::Deleted)
}

pub async fn wait_for_resource<K>(api: &Api<K>, name: &str, limit: Duration) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + Send + DeserializeOwned + 'static,
{
    wait_for_condition(api, name, |_| true, limit).await
}

pub async fn wait_for_deletion<K>(api: &Api<K>, name: &str, limit: Duration) -> Result<(), WaitError>
where
    K: Resource + Clone + Debug + Send + DeserializeOwned + 'static,
{
    timeout(limit, await_condition(api.clone(), name, |obj: Option<&K>| obj.is_none()))
        .await
        .map_err(|_| WaitError::Timeout(limit))??;
    Ok(())
}

pub async fn wait_for_status(
    api: &Api<RabbitmqCluster>,
    name: &str,
    status: ClusterStatus,
    limit: Duration,
) -> Result<RabbitmqCluster, WaitError> {
    wait_for_condition(api, name, |c| c.cluster_status() == status, limit).await
}
