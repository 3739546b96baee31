//! Object store contract used by the reconcile engine.
//!
//! The engine only talks to the cluster through [`ObjectStore`]. Two
//! implementations ship with the crate:
//!
//! | Store | Backing | Cascading delete |
//! |-------|---------|------------------|
//! | [`KubeStore`] | Kubernetes API server via `kube::Api` | yes (garbage collector) |
//! | [`MemoryStore`] | In-process map of serialized objects | no |

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::{Fault, MemoryStore, StoreOp, WriteRecord};

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::crd::{RabbitmqCluster, RabbitmqClusterStatus};

/// Identity of a parent resource: (namespace, name).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced object, `None` when name or namespace is missing.
    pub fn from_resource<K: Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        Some(Self::new(meta.namespace.clone()?, meta.name.clone()?))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Any namespaced, statically typed object the store can hold.
pub trait StoredObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Errors returned by an [`ObjectStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("too many requests: {0}")]
    TooManyRequests(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Failures expected to clear on their own: optimistic concurrency
    /// conflicts, rate limiting, objects not yet visible and server outages.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_)
                | StoreError::AlreadyExists(_)
                | StoreError::Conflict(_)
                | StoreError::TooManyRequests(_)
                | StoreError::Unavailable(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(e) => {
                let message = e.message.clone();
                match e.code {
                    404 => StoreError::NotFound(message),
                    409 if e.reason == "AlreadyExists" => StoreError::AlreadyExists(message),
                    409 => StoreError::Conflict(message),
                    429 => StoreError::TooManyRequests(message),
                    403 => StoreError::Forbidden(message),
                    400 | 422 => StoreError::Invalid(message),
                    code if code >= 500 => StoreError::Unavailable(message),
                    code => StoreError::Other(format!("HTTP {code}: {message}")),
                }
            }
            kube::Error::SerdeError(e) => StoreError::Serialization(e),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Typed access to the cluster object store.
///
/// All objects are namespaced. Implementations must provide optimistic
/// concurrency on `update`: an object whose `resourceVersion` is stale is
/// rejected with [`StoreError::Conflict`].
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch an object, `None` when it does not exist.
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str)
    -> Result<Option<K>, StoreError>;

    /// Create an object. Fails with `AlreadyExists` if the name is taken.
    async fn create<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace an object. The `resourceVersion` on `obj` must be current.
    async fn update<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// List objects in a namespace matching an equality label selector
    /// (`key=value[,key=value...]`).
    async fn list<K: StoredObject>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>, StoreError>;

    /// Write the status subresource of a cluster.
    async fn update_status(
        &self,
        cluster: &RabbitmqCluster,
        status: &RabbitmqClusterStatus,
    ) -> Result<(), StoreError>;

    /// Replace the finalizer list of a cluster.
    async fn set_finalizers(
        &self,
        cluster: &RabbitmqCluster,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError>;

    /// Whether deleting an owner removes its dependents without help.
    fn cascades_deletion(&self) -> bool;
}
