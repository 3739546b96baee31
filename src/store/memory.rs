//! In-process [`ObjectStore`] used by the functional tests.
//!
//! Objects are kept serialized so that every read hands out a fresh copy,
//! the same way an API server does. The store mimics the parts of API server
//! behaviour the engine relies on:
//! - uid, resourceVersion, generation and creationTimestamp bookkeeping
//! - optimistic concurrency on update (stale resourceVersion => Conflict)
//! - status is untouched by `update` and only written through `update_status`
//! - finalizers hold back deletion until they are cleared
//!
//! It never cascades deletion to dependents.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::trace;

use super::{ObjectStore, StoreError, StoredObject};
use crate::crd::{RabbitmqCluster, RabbitmqClusterStatus};

/// Store operation, used for the write log and fault injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    Delete,
    List,
    UpdateStatus,
    SetFinalizers,
}

impl StoreOp {
    fn is_write(self) -> bool {
        !matches!(self, StoreOp::Get | StoreOp::List)
    }
}

/// One recorded write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    pub op: StoreOp,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// Failure returned by an injected fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    Conflict,
    TooManyRequests,
    Unavailable,
    Forbidden,
}

impl Fault {
    fn to_error(self, what: &str) -> StoreError {
        let message = format!("injected fault on {what}");
        match self {
            Fault::Conflict => StoreError::Conflict(message),
            Fault::TooManyRequests => StoreError::TooManyRequests(message),
            Fault::Unavailable => StoreError::Unavailable(message),
            Fault::Forbidden => StoreError::Forbidden(message),
        }
    }
}

#[derive(Debug)]
struct InjectedFault {
    op: StoreOp,
    kind: String,
    fault: Fault,
    remaining: usize,
}

type StoreKey = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<StoreKey, Value>,
    next_resource_version: u64,
    writes: Vec<WriteRecord>,
    faults: Vec<InjectedFault>,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }

    fn check_fault(&mut self, op: StoreOp, kind: &str, what: &str) -> Result<(), StoreError> {
        let Some(index) = self
            .faults
            .iter()
            .position(|f| f.op == op && f.kind == kind && f.remaining > 0)
        else {
            return Ok(());
        };
        let fault = match self.faults.get_mut(index) {
            Some(f) => {
                f.remaining -= 1;
                f.fault
            }
            None => return Ok(()),
        };
        self.faults.retain(|f| f.remaining > 0);
        Err(fault.to_error(what))
    }

    fn record(&mut self, op: StoreOp, key: &StoreKey) {
        if op.is_write() {
            self.writes.push(WriteRecord {
                op,
                kind: key.0.clone(),
                namespace: key.1.clone(),
                name: key.2.clone(),
            });
        }
    }
}

/// In-memory object store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn store_key<K: StoredObject>(namespace: &str, name: &str) -> StoreKey {
    (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
}

fn describe(key: &StoreKey) -> String {
    format!("{} {}/{}", key.0, key.1, key.2)
}

fn key_of<K: StoredObject>(obj: &K) -> Result<StoreKey, StoreError> {
    let namespace = obj
        .namespace()
        .ok_or_else(|| StoreError::Invalid(format!("{} has no namespace", obj.name_any())))?;
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| StoreError::Invalid("object has no name".to_string()))?;
    Ok(store_key::<K>(&namespace, &name))
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term),
        })
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `op` on objects of `kind`.
    pub async fn inject_fault(&self, op: StoreOp, kind: &str, fault: Fault, times: usize) {
        self.state.lock().await.faults.push(InjectedFault {
            op,
            kind: kind.to_string(),
            fault,
            remaining: times,
        });
    }

    /// Drop all pending injected faults.
    pub async fn clear_faults(&self) {
        self.state.lock().await.faults.clear();
    }

    /// All writes recorded so far.
    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().await.writes.clone()
    }

    /// Number of writes recorded so far.
    pub async fn write_count(&self) -> usize {
        self.state.lock().await.writes.len()
    }

    /// Forget the recorded writes.
    pub async fn clear_writes(&self) {
        self.state.lock().await.writes.clear();
    }

    /// Number of stored objects of `kind` in `namespace`.
    pub async fn count(&self, kind: &str, namespace: &str) -> usize {
        self.state
            .lock()
            .await
            .objects
            .keys()
            .filter(|(k, ns, _)| k == kind && ns == namespace)
            .count()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoredObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        let key = store_key::<K>(namespace, name);
        let mut state = self.state.lock().await;
        state.check_fault(StoreOp::Get, &key.0, &describe(&key))?;
        match state.objects.get(&key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn create<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError> {
        let key = key_of(obj)?;
        let mut state = self.state.lock().await;
        state.check_fault(StoreOp::Create, &key.0, &describe(&key))?;
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(describe(&key)));
        }

        let mut created = obj.clone();
        let resource_version = state.next_resource_version();
        let meta = created.meta_mut();
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.resource_version = Some(resource_version);
        meta.generation = Some(1);
        meta.creation_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        meta.deletion_timestamp = None;

        let value = serde_json::to_value(&created)?;
        let stored: K = serde_json::from_value(value.clone())?;
        trace!(object = %describe(&key), "memory store create");
        state.objects.insert(key.clone(), value);
        state.record(StoreOp::Create, &key);
        Ok(stored)
    }

    async fn update<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError> {
        let key = key_of(obj)?;
        let mut state = self.state.lock().await;
        state.check_fault(StoreOp::Update, &key.0, &describe(&key))?;
        let existing_value = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(describe(&key)))?;
        let existing: K = serde_json::from_value(existing_value.clone())?;

        if obj.resource_version() != existing.resource_version() {
            return Err(StoreError::Conflict(format!(
                "{}: resourceVersion {:?} is stale (current {:?})",
                describe(&key),
                obj.resource_version(),
                existing.resource_version()
            )));
        }

        let mut updated = obj.clone();
        let resource_version = state.next_resource_version();
        let spec_changed = serde_json::to_value(obj)?.get("spec") != existing_value.get("spec");
        let meta = updated.meta_mut();
        meta.uid = existing.meta().uid.clone();
        meta.creation_timestamp = existing.meta().creation_timestamp.clone();
        meta.deletion_timestamp = existing.meta().deletion_timestamp.clone();
        meta.resource_version = Some(resource_version);
        let generation = existing.meta().generation.unwrap_or(1);
        meta.generation = Some(if spec_changed { generation + 1 } else { generation });

        let mut value = serde_json::to_value(&updated)?;
        // status is a subresource: a plain update never changes it
        if let Some(map) = value.as_object_mut() {
            match existing_value.get("status") {
                Some(status) => {
                    map.insert("status".to_string(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        let stored: K = serde_json::from_value(value.clone())?;
        state.objects.insert(key.clone(), value);
        state.record(StoreOp::Update, &key);
        Ok(stored)
    }

    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = store_key::<K>(namespace, name);
        let mut state = self.state.lock().await;
        state.check_fault(StoreOp::Delete, &key.0, &describe(&key))?;
        let Some(value) = state.objects.get(&key).cloned() else {
            return Ok(());
        };
        let mut existing: K = serde_json::from_value(value)?;

        let has_finalizers = existing.finalizers().iter().any(|f| !f.is_empty());
        if has_finalizers {
            if existing.meta().deletion_timestamp.is_none() {
                let resource_version = state.next_resource_version();
                let meta = existing.meta_mut();
                meta.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
                meta.resource_version = Some(resource_version);
                let value = serde_json::to_value(&existing)?;
                state.objects.insert(key.clone(), value);
            }
        } else {
            state.objects.remove(&key);
        }
        state.record(StoreOp::Delete, &key);
        Ok(())
    }

    async fn list<K: StoredObject>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>, StoreError> {
        let kind = K::kind(&()).to_string();
        let mut state = self.state.lock().await;
        state.check_fault(StoreOp::List, &kind, &format!("{kind} list"))?;

        let mut items = Vec::new();
        for ((k, ns, _), value) in &state.objects {
            if *k != kind || ns != namespace {
                continue;
            }
            let obj: K = serde_json::from_value(value.clone())?;
            if matches_selector(obj.labels(), label_selector) {
                items.push(obj);
            }
        }
        Ok(items)
    }

    async fn update_status(
        &self,
        cluster: &RabbitmqCluster,
        status: &RabbitmqClusterStatus,
    ) -> Result<(), StoreError> {
        let key = key_of(cluster)?;
        let mut state = self.state.lock().await;
        state.check_fault(StoreOp::UpdateStatus, &key.0, &describe(&key))?;
        let value = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(describe(&key)))?;

        let mut existing: RabbitmqCluster = serde_json::from_value(value)?;
        existing.status = Some(status.clone());
        existing.meta_mut().resource_version = Some(state.next_resource_version());
        let value = serde_json::to_value(&existing)?;
        state.objects.insert(key.clone(), value);
        state.record(StoreOp::UpdateStatus, &key);
        Ok(())
    }

    async fn set_finalizers(
        &self,
        cluster: &RabbitmqCluster,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError> {
        let key = key_of(cluster)?;
        let mut state = self.state.lock().await;
        state.check_fault(StoreOp::SetFinalizers, &key.0, &describe(&key))?;
        let value = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(describe(&key)))?;

        let mut existing: RabbitmqCluster = serde_json::from_value(value)?;
        if cluster.resource_version().is_some()
            && cluster.resource_version() != existing.resource_version()
        {
            return Err(StoreError::Conflict(describe(&key)));
        }

        if finalizers.is_empty() && existing.meta().deletion_timestamp.is_some() {
            state.objects.remove(&key);
        } else {
            let resource_version = state.next_resource_version();
            let meta = existing.meta_mut();
            meta.finalizers = if finalizers.is_empty() {
                None
            } else {
                Some(finalizers)
            };
            meta.resource_version = Some(resource_version);
            let value = serde_json::to_value(&existing)?;
            state.objects.insert(key.clone(), value);
        }
        state.record(StoreOp::SetFinalizers, &key);
        Ok(())
    }

    fn cascades_deletion(&self) -> bool {
        false
    }
}
