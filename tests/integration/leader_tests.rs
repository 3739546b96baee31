//! Leader lease against a live API server.

use std::time::Duration;

use rabbitmq_operator::{Config, leader_lease};

use crate::{TestNamespace, init_test};

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster"]
async fn test_only_one_replica_holds_the_lease() {
    let client = init_test().await;
    let ns = TestNamespace::create(client.clone(), "rabbit-lease").await;
    let replica = |pod: &str| Config {
        pod_name: pod.to_string(),
        pod_namespace: ns.name().to_string(),
        ..Config::default()
    };
    let ttl = Duration::from_secs(15);
    let first = leader_lease(client.clone(), &replica("rabbitmq-operator-a"), ttl);
    let second = leader_lease(client.clone(), &replica("rabbitmq-operator-b"), ttl);

    assert!(first.try_acquire_or_renew().await.unwrap().acquired_lease);
    assert!(!second.try_acquire_or_renew().await.unwrap().acquired_lease);
    // Renewal keeps it with the holder
    assert!(first.try_acquire_or_renew().await.unwrap().acquired_lease);
}
