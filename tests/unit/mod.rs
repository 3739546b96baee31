// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for rabbitmq-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

#[path = "../common/mod.rs"]
mod common;

mod crd_tests {
    use rabbitmq_operator::crd::{ClusterStatus, Condition, RabbitmqCluster};

    #[test]
    fn test_status_wire_values() {
        assert_eq!(ClusterStatus::Empty.to_string(), "");
        assert_eq!(ClusterStatus::Creating.to_string(), "creating");
        assert_eq!(ClusterStatus::Created.to_string(), "created");
        assert_eq!(ClusterStatus::Error.to_string(), "error");
        assert_eq!(
            serde_json::to_string(&ClusterStatus::Created).unwrap(),
            r#""created""#
        );
    }

    #[test]
    fn test_status_default() {
        assert_eq!(ClusterStatus::default(), ClusterStatus::Empty);
    }

    #[test]
    fn test_condition_ready() {
        let condition = Condition::ready(true, "ChildrenPresent", "All child objects exist", Some(1));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason, "ChildrenPresent");
        assert_eq!(condition.observed_generation, Some(1));
    }

    #[test]
    fn test_condition_degraded() {
        let condition = Condition::degraded(true, "InvalidSpec", "replicas must be at least 1", None);
        assert_eq!(condition.r#type, "Degraded");
        assert_eq!(condition.status, "True");
    }

    #[test]
    fn test_manifest_deserializes_with_defaults() {
        let cluster: RabbitmqCluster = serde_json::from_value(serde_json::json!({
            "apiVersion": "rabbitmq.com/v1beta1",
            "kind": "RabbitmqCluster",
            "metadata": { "name": "rabbitmq-one", "namespace": "default" },
            "spec": { "imagePullSecret": "rabbit-two-secret", "service": { "type": "NodePort" } }
        }))
        .unwrap();

        assert_eq!(cluster.spec.replicas, 1);
        assert_eq!(cluster.image(), "rabbitmq:3.8.1");
        assert_eq!(cluster.service_type(), "NodePort");
        assert_eq!(cluster.storage().0, "10Gi");
        assert_eq!(cluster.storage_class_name(), None);
        assert_eq!(cluster.cluster_status(), ClusterStatus::Empty);
    }
}

mod builder_tests {
    use k8s_openapi::api::core::v1::Secret;
    use kube::ResourceExt;
    use rabbitmq_operator::controller::error::ErrorKind;
    use rabbitmq_operator::resources::DesiredState;
    use rabbitmq_operator::resources::secrets::{SecretKind, generate_payload};

    use crate::common::{RabbitmqClusterBuilder, node_affinity, test_cluster};

    #[test]
    fn test_child_names() {
        let desired = DesiredState::build(&test_cluster("rabbitmq-one", "default")).unwrap();

        assert_eq!(desired.stateful_set.name_any(), "rabbitmq-one-server");
        assert_eq!(desired.service_account.name_any(), "rabbitmq-one-server");
        assert_eq!(desired.role_binding.name_any(), "rabbitmq-one-server");
        assert_eq!(desired.config_map.name_any(), "rabbitmq-one-server-conf");
        assert_eq!(desired.admin_secret.name_any(), "rabbitmq-one-admin");
        assert_eq!(
            desired.erlang_cookie_secret.name_any(),
            "rabbitmq-one-erlang-cookie"
        );
        assert_eq!(desired.ingress_service.name_any(), "rabbitmq-one-ingress");
        assert_eq!(desired.headless_service.name_any(), "rabbitmq-one-headless");
        assert_eq!(desired.role.name_any(), "rabbitmq-one-endpoint-discovery");
    }

    #[test]
    fn test_build_is_deterministic() {
        let cluster = RabbitmqClusterBuilder::new("rabbitmq-one")
            .namespace("default")
            .uid("uid-1")
            .image_pull_secret("pull")
            .affinity(node_affinity("zone", "a"))
            .build();

        let first = DesiredState::build(&cluster).unwrap();
        let second = DesiredState::build(&cluster).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first.stateful_set).unwrap(),
            serde_json::to_vec(&second.stateful_set).unwrap()
        );
    }

    #[test]
    fn test_descriptors_carry_no_secret_payload() {
        let desired = DesiredState::build(&test_cluster("rabbitmq-one", "default")).unwrap();
        let secrets: [&Secret; 2] = [&desired.admin_secret, &desired.erlang_cookie_secret];
        for secret in secrets {
            assert!(secret.data.is_none());
        }
    }

    #[test]
    fn test_payloads_differ_between_calls() {
        assert_ne!(
            generate_payload(SecretKind::Admin),
            generate_payload(SecretKind::Admin)
        );
    }

    #[test]
    fn test_rejections_are_validation_errors() {
        let cases = [
            RabbitmqClusterBuilder::new("bad").namespace("default").uid("u").replicas(0).build(),
            RabbitmqClusterBuilder::new("bad").namespace("default").uid("u").replicas(-3).build(),
            RabbitmqClusterBuilder::new("bad")
                .namespace("default")
                .uid("u")
                .service_type("ExternalName")
                .build(),
            RabbitmqClusterBuilder::new("bad").uid("u").build(),
        ];
        for cluster in cases {
            let err = DesiredState::build(&cluster).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{err}");
        }
    }

    #[test]
    fn test_empty_strings_fall_back_to_defaults() {
        let cluster = RabbitmqClusterBuilder::new("blank")
            .namespace("default")
            .uid("u")
            .image("")
            .image_pull_secret("")
            .service_type("")
            .build();

        let desired = DesiredState::build(&cluster).unwrap();

        let pod = desired.stateful_set.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), Some("rabbitmq:3.8.1"));
        assert_eq!(pod.image_pull_secrets, None);
        assert_eq!(
            desired.ingress_service.spec.unwrap().type_.as_deref(),
            Some("ClusterIP")
        );
    }
}

mod error_tests {
    use std::time::Duration;

    use rabbitmq_operator::controller::error::{Error, ErrorKind};
    use rabbitmq_operator::store::StoreError;

    #[test]
    fn test_error_is_retryable() {
        let conflict = Error::Store(StoreError::Conflict("stale".to_string()));
        assert!(conflict.is_retryable());

        let timeout = Error::Timeout {
            operation: "get StatefulSet".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert!(timeout.is_retryable());

        let validation = Error::Validation("invalid spec".to_string());
        assert!(!validation.is_retryable());

        let forbidden = Error::Store(StoreError::Forbidden("rbac".to_string()));
        assert_eq!(forbidden.kind(), ErrorKind::Irrecoverable);
    }

    #[test]
    fn test_kube_errors_mapped() {
        let api = |code: u16, reason: &str| {
            StoreError::from(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "boom".to_string(),
                reason: reason.to_string(),
                code,
            }))
        };
        assert!(matches!(api(404, "NotFound"), StoreError::NotFound(_)));
        assert!(matches!(api(409, "AlreadyExists"), StoreError::AlreadyExists(_)));
        assert!(matches!(api(409, "Conflict"), StoreError::Conflict(_)));
        assert!(matches!(api(429, "TooManyRequests"), StoreError::TooManyRequests(_)));
        assert!(matches!(api(403, "Forbidden"), StoreError::Forbidden(_)));
        assert!(matches!(api(422, "Invalid"), StoreError::Invalid(_)));
        assert!(matches!(api(503, "ServiceUnavailable"), StoreError::Unavailable(_)));
    }
}

mod status_tests {
    use rabbitmq_operator::controller::status::{
        ConditionBuilder, Failure, READY, is_condition_true, project_status,
    };
    use rabbitmq_operator::crd::{ClusterStatus, Condition};

    #[test]
    fn test_condition_builder() {
        let mut builder = ConditionBuilder::new();
        builder.ready(true, "ChildrenPresent", "All child objects exist", Some(1));
        builder.progressing(false, "Converged", "Done", Some(1));
        let conditions = builder.build();

        assert_eq!(conditions.len(), 2);
        assert!(is_condition_true(&conditions, "Ready"));
        assert!(!is_condition_true(&conditions, "Progressing"));
    }

    #[test]
    fn test_is_condition_true_missing() {
        let conditions: Vec<Condition> = vec![];
        assert!(!is_condition_true(&conditions, READY));
    }

    #[test]
    fn test_failure_only_reported_in_error() {
        let failure = Failure::new("InvalidSpec", "replicas must be at least 1");
        let created = project_status(None, ClusterStatus::Created, Some(&failure), Some(1));
        assert!(created.conditions.iter().all(|c| c.reason != "InvalidSpec"));

        let error = project_status(None, ClusterStatus::Error, Some(&failure), Some(1));
        assert!(error.conditions.iter().any(|c| c.reason == "InvalidSpec"));
    }

    #[test]
    fn test_reprojection_keeps_transition_times() {
        let first = project_status(None, ClusterStatus::Created, None, Some(2));
        let again = project_status(Some(&first), ClusterStatus::Created, None, Some(2));
        assert_eq!(first, again);
    }
}

mod config_tests {
    use std::time::Duration;

    use rabbitmq_operator::Config;
    use rabbitmq_operator::config::ConfigError;

    #[test]
    fn test_lookup_overrides() {
        let config = Config::from_lookup(|name| match name {
            "RESYNC_PERIOD_SECS" => Some("60".to_string()),
            "RETRY_BUDGET" => Some("2".to_string()),
            "POD_NAME" => Some("op-1".to_string()),
            "POD_NAMESPACE" => Some("ops".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.resync_period, Duration::from_secs(60));
        assert_eq!(config.retry_budget, 2);
        assert_eq!(config.pod_name, "op-1");
    }

    #[test]
    fn test_zero_resync_rejected() {
        let err = Config::from_lookup(|name| {
            (name == "RESYNC_PERIOD_SECS").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                name: "RESYNC_PERIOD_SECS",
                ..
            }
        ));
    }
}
