//! Broker configuration ConfigMap.
//!
//! Holds `rabbitmq.conf` (peer discovery through the Kubernetes API) and
//! `enabled_plugins`. Mounted at `/etc/rabbitmq` in every pod.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::crd::RabbitmqCluster;
use crate::resources::common::child_metadata;
use crate::resources::naming;

pub const RABBITMQ_CONF_KEY: &str = "rabbitmq.conf";
pub const ENABLED_PLUGINS_KEY: &str = "enabled_plugins";

const ENABLED_PLUGINS: &str =
    "[rabbitmq_management,rabbitmq_peer_discovery_k8s,rabbitmq_prometheus].";

/// Render `rabbitmq.conf`.
fn rabbitmq_conf(resource: &RabbitmqCluster) -> String {
    let headless = naming::child_name(&resource.name_any(), naming::HEADLESS);
    let namespace = resource.namespace().unwrap_or_default();

    let lines = [
        "cluster_formation.peer_discovery_backend = rabbit_peer_discovery_k8s".to_string(),
        "cluster_formation.k8s.host = kubernetes.default.svc.cluster.local".to_string(),
        "cluster_formation.k8s.address_type = hostname".to_string(),
        format!("cluster_formation.k8s.service_name = {headless}"),
        format!("cluster_formation.k8s.hostname_suffix = .{headless}.{namespace}"),
        format!(
            "cluster_formation.target_cluster_size_hint = {}",
            resource.spec.replicas
        ),
        "cluster_formation.node_cleanup.interval = 30".to_string(),
        "cluster_formation.node_cleanup.only_log_warning = true".to_string(),
        "cluster_partition_handling = pause_minority".to_string(),
        "queue_master_locator = min-masters".to_string(),
    ];
    let mut conf = lines.join("\n");
    conf.push('\n');
    conf
}

/// Generate the server-conf ConfigMap.
pub fn generate_config_map(resource: &RabbitmqCluster) -> ConfigMap {
    ConfigMap {
        metadata: child_metadata(resource, naming::SERVER_CONF),
        data: Some(BTreeMap::from([
            (RABBITMQ_CONF_KEY.to_string(), rabbitmq_conf(resource)),
            (ENABLED_PLUGINS_KEY.to_string(), ENABLED_PLUGINS.to_string()),
        ])),
        ..Default::default()
    }
}
