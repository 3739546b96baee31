//! Shared test cluster singleton.
//!
//! Connectivity is validated once; each test builds its own Client.

use kube::{Client, Config};
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::sync::OnceCell;

static SHARED_CLUSTER: OnceCell<Arc<SharedTestCluster>> = OnceCell::const_new();

pub struct SharedTestCluster {
    _marker: (),
}

impl SharedTestCluster {
    /// Get or create the shared test cluster.
    pub async fn get() -> Arc<SharedTestCluster> {
        SHARED_CLUSTER
            .get_or_init(|| async {
                let cluster = Self::connect().await.expect(
                    "Failed to connect to Kubernetes cluster. Is your kubeconfig configured?",
                );
                Arc::new(cluster)
            })
            .await
            .clone()
    }

    /// Create a new Kubernetes client.
    pub async fn new_client(&self) -> Client {
        let config = Config::infer().await.expect("Failed to infer kube config");
        Client::try_from(config).expect("Failed to create kube client")
    }

    async fn connect() -> Result<Self, kube::Error> {
        let config = Config::infer()
            .await
            .map_err(|e| kube::Error::Service(std::io::Error::other(e.to_string()).into()))?;
        let client = Client::try_from(config)?;

        let version = client.apiserver_version().await?;
        tracing::info!(
            "Connected to Kubernetes cluster: {} {}",
            version.platform,
            version.git_version
        );

        Ok(Self { _marker: () })
    }
}

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("rabbitmq_operator=debug")
            .try_init();
    });
}

/// Connect, set up tracing and hand back a fresh client.
pub async fn init_test() -> Client {
    init_tracing();
    SharedTestCluster::get().await.new_client().await
}
