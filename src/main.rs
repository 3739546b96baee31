//! rabbitmq-operator entry point.
//!
//! Sets up JSON logging, reads [`Config`] from the environment, serves
//! health checks and metrics, and runs the RabbitmqCluster controller once this
//! replica holds the leader lease.

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::LeaseLock;
use tokio::signal;
use tracing::{error, info, warn};

use rabbitmq_operator::Config;
use rabbitmq_operator::health::{HealthState, run_health_server};
use rabbitmq_operator::{leader_lease, run_operator};

const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time in-flight passes get to finish after SIGTERM
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rabbitmq_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    let config = Config::from_env()?;
    info!(
        scope = config.watch_namespace.as_deref().unwrap_or("cluster-wide"),
        workers = config.workers,
        resync_secs = config.resync_period.as_secs(),
        "Starting rabbitmq-operator"
    );

    let client = Client::try_default().await?;

    // Health checks answer while this replica is still a follower
    let health_state = Arc::new(HealthState::new());
    let health_handle = tokio::spawn({
        let health_state = health_state.clone();
        let port = config.health_port;
        async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!(error = %e, "Health server failed");
            }
        }
    });

    let lease_lock = leader_lease(client.clone(), &config, LEASE_TTL);
    acquire_leadership(&lease_lock, &config).await;
    let renewal_handle = tokio::spawn(hold_leadership(lease_lock));

    tokio::select! {
        _ = run_operator(client, config, Some(health_state), shutdown_signal(), SHUTDOWN_GRACE) => {
            info!("Controller stopped");
        }
        result = health_handle => {
            if let Err(e) = result {
                error!(error = %e, "Health server task panicked");
            }
        }
        Err(e) = renewal_handle => {
            error!(error = %e, "Lease renewal task panicked");
        }
    }

    Ok(())
}

/// Block until this replica holds the lease.
async fn acquire_leadership(lease_lock: &LeaseLock, config: &Config) {
    info!(
        holder_id = %config.pod_name,
        namespace = %config.pod_namespace,
        lease = %config.lease_name,
        "Waiting for leadership"
    );
    loop {
        match lease_lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                return;
            }
            Ok(_) => info!("Lease held by another replica"),
            Err(e) => warn!(error = %e, "Lease acquisition failed"),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Renew the lease forever. Losing it ends the process so the pod restarts
/// as a follower instead of racing the new leader.
#[allow(clippy::exit)]
async fn hold_leadership(lease_lock: LeaseLock) {
    loop {
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
        match lease_lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {}
            Ok(_) => {
                error!("Leadership lost");
                std::process::exit(1);
            }
            Err(e) => {
                error!(error = %e, "Lease renewal failed");
                std::process::exit(1);
            }
        }
    }
}

/// Resolves on SIGTERM or SIGINT.
///
/// Failing to install a handler is fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
