//! Retry accounting for transient failures.
//!
//! The controller runtime owns scheduling: it keeps one pending entry per
//! cluster and never runs two passes for the same cluster at once. What it
//! does not track is how many times in a row a cluster has failed, which
//! drives the backoff delay and the retry budget. [`RetryTracker`] keeps
//! that count between `reconcile` and `error_policy`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::store::ObjectKey;

/// Exponential backoff: `base * 2^(n-1)` for the n-th retry, capped at `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(300))
    }
}

/// Consecutive transient failures per cluster.
#[derive(Debug, Default)]
pub struct RetryTracker {
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more failure of `key` and return the new total.
    pub fn record(&self, key: &ObjectKey) -> u32 {
        let mut failures = self.lock();
        let count = failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Failures of `key` since the last [`RetryTracker::forget`].
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.lock().get(key).copied().unwrap_or(0)
    }

    pub fn forget(&self, key: &ObjectKey) {
        self.lock().remove(key);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectKey, u32>> {
        // A poisoned map only holds counters, keep using it
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
