//! The kube controller runtime driving the engine over the memory store.
//!
//! Watch events are fed by hand through the trigger stream; the reflector
//! store is primed with the clusters the controller may look up.

use std::time::Duration;

use futures::StreamExt;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use kube::runtime::controller::Controller;
use kube::runtime::{reflector, watcher};
use rabbitmq_operator::controller::reconciler::{error_policy, reconcile_cluster};
use rabbitmq_operator::crd::{ClusterStatus, RabbitmqCluster};
use rabbitmq_operator::store::{Fault, MemoryStore, StoreOp};
use tokio::task::JoinHandle;

use crate::common::RabbitmqClusterBuilder;
use crate::harness::Harness;

const NAME: &str = "rabbitmq-one";

type Events = UnboundedSender<Result<RabbitmqCluster, watcher::Error>>;

/// Run a controller over `h`'s context until the handle is aborted.
fn start_controller(h: &Harness, clusters: &[RabbitmqCluster]) -> (Events, JoinHandle<()>) {
    let (reader, mut writer) = reflector::store::<RabbitmqCluster>();
    writer.apply_watcher_event(&watcher::Event::Init);
    for cluster in clusters {
        writer.apply_watcher_event(&watcher::Event::InitApply(cluster.clone()));
    }
    writer.apply_watcher_event(&watcher::Event::InitDone);

    let (events, trigger) = unbounded();
    let ctx = h.ctx.clone();
    let handle = tokio::spawn(async move {
        let _writer = writer;
        Controller::for_stream(trigger, reader)
            .run(
                reconcile_cluster::<MemoryStore>,
                error_policy::<MemoryStore>,
                ctx,
            )
            .for_each(|_| async {})
            .await;
    });
    (events, handle)
}

#[tokio::test(start_paused = true)]
async fn test_event_bursts_keep_one_resync_per_cluster() {
    let h = Harness::new();
    let cluster = h
        .create_cluster(RabbitmqClusterBuilder::new(NAME).build())
        .await;
    let (events, controller) = start_controller(&h, std::slice::from_ref(&cluster));
    let resync = h.ctx.config.resync_period;

    // Every watch event gets its own pass and reschedules the resync
    for _ in 0..6 {
        events.unbounded_send(Ok(cluster.clone())).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
    assert_eq!(h.status(NAME).await, ClusterStatus::Created);
    let settled = h.passes(NAME);
    assert_eq!(settled, 6);

    // ...but only one resync stays pending
    tokio::time::sleep(resync).await;
    assert_eq!(h.passes(NAME), settled + 1);
    tokio::time::sleep(resync).await;
    assert_eq!(h.passes(NAME), settled + 2);

    controller.abort();
}

#[tokio::test(start_paused = true)]
async fn test_passes_serialized_per_cluster() {
    let h = Harness::new();
    let mut clusters = Vec::new();
    for name in ["rabbit-a", "rabbit-b"] {
        clusters.push(
            h.create_cluster(RabbitmqClusterBuilder::new(name).build())
                .await,
        );
    }
    let (events, controller) = start_controller(&h, &clusters);

    // A burst of events per cluster
    for _ in 0..10 {
        for cluster in &clusters {
            events.unbounded_send(Ok(cluster.clone())).unwrap();
        }
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    for name in ["rabbit-a", "rabbit-b"] {
        assert_eq!(h.status(name).await, ClusterStatus::Created);
    }
    // Passes never race each other into AlreadyExists
    let creates = h
        .store
        .writes()
        .await
        .into_iter()
        .filter(|w| w.op == StoreOp::Create && w.kind == "StatefulSet")
        .count();
    assert_eq!(creates, 2);
    let metrics = h.health.metrics.encode();
    assert!(!metrics.contains("rabbitmq_operator_reconciliation_errors_total{"));

    controller.abort();
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retried_with_backoff() {
    let h = Harness::new();
    let cluster = h
        .create_cluster(RabbitmqClusterBuilder::new(NAME).build())
        .await;
    h.store
        .inject_fault(StoreOp::Create, "StatefulSet", Fault::Unavailable, 2)
        .await;
    let (events, controller) = start_controller(&h, std::slice::from_ref(&cluster));

    events.unbounded_send(Ok(cluster.clone())).unwrap();
    // Retries land after 500ms and a further 1s
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.status(NAME).await, ClusterStatus::Creating);
    assert_eq!(h.ctx.retries.failures(&Harness::key(NAME)), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.status(NAME).await, ClusterStatus::Created);
    assert_eq!(h.passes(NAME), 3);
    assert_eq!(h.ctx.retries.failures(&Harness::key(NAME)), 0);

    controller.abort();
}
