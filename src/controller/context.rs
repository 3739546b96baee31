//! Shared context for the controller.
//!
//! The Context struct holds what every reconcile pass needs: the object
//! store, the configuration, the optional event recorder, the optional
//! health state used for metrics and the per-cluster failure counts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tokio::time::Instant;

use crate::config::Config;
use crate::controller::error::{Error, Result};
use crate::controller::retry::RetryTracker;
use crate::controller::state_machine::ClusterStateMachine;
use crate::crd::RabbitmqCluster;
use crate::health::HealthState;
use crate::resources::common::OPERATOR_NAME;
use crate::store::{ObjectStore, StoreError};

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = OPERATOR_NAME;

/// Shared context for the controller
pub struct Context<S: ObjectStore> {
    pub store: Arc<S>,
    pub config: Config,
    /// Publishes Kubernetes events; absent when running without a cluster
    recorder: Option<Recorder>,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    pub state_machine: ClusterStateMachine,
    /// Consecutive transient failures, for backoff and the retry budget
    pub retries: RetryTracker,
}

impl<S: ObjectStore> Context<S> {
    /// Context without event publishing.
    pub fn new(store: Arc<S>, config: Config, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            store,
            config,
            recorder: None,
            health_state,
            state_machine: ClusterStateMachine::new(),
            retries: RetryTracker::new(),
        }
    }

    /// Publish events through `client`, reporting as this pod.
    pub fn with_events(mut self, client: Client) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.into(),
            instance: Some(self.config.pod_name.clone()),
        };
        self.recorder = Some(Recorder::new(client, reporter));
        self
    }

    /// Run one store call under the configured timeout.
    pub async fn with_timeout<T, F>(&self, operation: impl Into<String>, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        let timeout = self.config.store_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Timeout {
                operation: operation.into(),
                timeout,
            }),
        }
    }

    /// Record a finished pass in the metrics, if enabled.
    pub fn record_pass(&self, cluster: &RabbitmqCluster, started: Instant, failed: bool) {
        let Some(health) = &self.health_state else {
            return;
        };
        let namespace = cluster.metadata.namespace.as_deref().unwrap_or_default();
        let name = cluster.metadata.name.as_deref().unwrap_or_default();
        let elapsed: Duration = started.elapsed();
        health
            .metrics
            .record_reconcile(namespace, name, elapsed.as_secs_f64());
        if failed {
            health.metrics.record_error(namespace, name);
        }
        health.touch_reconcile();
    }

    async fn publish(
        &self,
        resource: &RabbitmqCluster,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for a resource
    pub async fn publish_normal_event(
        &self,
        resource: &RabbitmqCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a resource
    pub async fn publish_warning_event(
        &self,
        resource: &RabbitmqCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }
}
