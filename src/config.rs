//! Operator configuration read from the environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `WATCH_NAMESPACE` | unset (cluster-wide) | Only reconcile clusters in this namespace |
//! | `RECONCILE_WORKERS` | 4 | Concurrent reconcile workers |
//! | `RESYNC_PERIOD_SECS` | 300 | Periodic re-reconcile of converged clusters |
//! | `STORE_TIMEOUT_SECS` | 10 | Timeout for every object store call |
//! | `BACKOFF_BASE_MS` | 500 | First retry delay after a transient error |
//! | `BACKOFF_MAX_SECS` | 300 | Retry delay cap |
//! | `RETRY_BUDGET` | 10 | Transient retries before the error shows in status |
//! | `HEALTH_PORT` | 8080 | Port of the health and metrics server |
//! | `POD_NAME` | hostname | Leader election identity |
//! | `POD_NAMESPACE` | `default` | Namespace of the leader election lease |
//! | `LEASE_NAME` | `rabbitmq-operator-leader` | Leader election lease |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::controller::retry::Backoff;

pub const DEFAULT_LEASE_NAME: &str = "rabbitmq-operator-leader";

/// Errors reading the configuration
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name}: cannot parse {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{name} must be at least {min}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: u64,
        min: u64,
    },
}

/// Runtime configuration of the operator.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// `None` watches every namespace
    pub watch_namespace: Option<String>,
    pub workers: usize,
    pub resync_period: Duration,
    pub store_timeout: Duration,
    pub backoff: Backoff,
    pub retry_budget: u32,
    pub health_port: u16,
    pub pod_name: String,
    pub pod_namespace: String,
    pub lease_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            workers: 4,
            resync_period: Duration::from_secs(300),
            store_timeout: Duration::from_secs(10),
            backoff: Backoff::default(),
            retry_budget: 10,
            health_port: 8080,
            pod_name: "unknown".to_string(),
            pod_namespace: "default".to_string(),
            lease_name: DEFAULT_LEASE_NAME.to_string(),
        }
    }
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`, which returns the value of a
    /// variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let workers: u64 = parse(&get, "RECONCILE_WORKERS", defaults.workers as u64)?;
        at_least("RECONCILE_WORKERS", workers, 1)?;
        let resync_secs = parse(&get, "RESYNC_PERIOD_SECS", defaults.resync_period.as_secs())?;
        at_least("RESYNC_PERIOD_SECS", resync_secs, 1)?;
        let timeout_secs = parse(&get, "STORE_TIMEOUT_SECS", defaults.store_timeout.as_secs())?;
        at_least("STORE_TIMEOUT_SECS", timeout_secs, 1)?;
        let base_ms: u64 = parse(&get, "BACKOFF_BASE_MS", 500)?;
        at_least("BACKOFF_BASE_MS", base_ms, 1)?;
        let max_secs: u64 = parse(&get, "BACKOFF_MAX_SECS", defaults.backoff.max.as_secs())?;
        at_least("BACKOFF_MAX_SECS", max_secs, 1)?;

        let pod_name = get("POD_NAME").unwrap_or_else(|| {
            warn!("POD_NAME not set, using hostname");
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| defaults.pod_name.clone())
        });
        let pod_namespace = get("POD_NAMESPACE").unwrap_or_else(|| {
            warn!("POD_NAMESPACE not set, using 'default'");
            defaults.pod_namespace.clone()
        });

        Ok(Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            workers: usize::try_from(workers).unwrap_or(usize::MAX),
            resync_period: Duration::from_secs(resync_secs),
            store_timeout: Duration::from_secs(timeout_secs),
            backoff: Backoff::new(
                Duration::from_millis(base_ms),
                Duration::from_secs(max_secs),
            ),
            retry_budget: parse(&get, "RETRY_BUDGET", defaults.retry_budget)?,
            health_port: parse(&get, "HEALTH_PORT", defaults.health_port)?,
            pod_name,
            pod_namespace,
            lease_name: get("LEASE_NAME").unwrap_or(defaults.lease_name),
        })
    }
}

fn parse<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

fn at_least(name: &'static str, value: u64, min: u64) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::OutOfRange { name, value, min });
    }
    Ok(())
}
