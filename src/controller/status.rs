//! Status management utilities.
//!
//! Provides helpers for building resource status conditions and for
//! projecting a finished reconcile pass onto `RabbitmqClusterStatus`.

use crate::crd::{ClusterStatus, Condition, RabbitmqClusterStatus};

pub const READY: &str = "Ready";
pub const PROGRESSING: &str = "Progressing";
pub const DEGRADED: &str = "Degraded";

/// Builder for managing conditions list
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Add or update a condition
    pub fn set(&mut self, condition: Condition) -> &mut Self {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Set Ready condition
    pub fn ready(
        &mut self,
        ready: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::ready(ready, reason, message, generation))
    }

    /// Set Progressing condition
    pub fn progressing(
        &mut self,
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::progressing(
            progressing,
            reason,
            message,
            generation,
        ))
    }

    /// Set Degraded condition
    pub fn degraded(
        &mut self,
        degraded: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::degraded(degraded, reason, message, generation))
    }

    /// Keep the transition time of every condition whose state did not
    /// change since `previous`.
    pub fn preserve_transitions(&mut self, previous: &[Condition]) -> &mut Self {
        for condition in &mut self.conditions {
            if let Some(old) = previous.iter().find(|old| old.same_state(condition)) {
                condition.last_transition_time = old.last_transition_time.clone();
            }
        }
        self
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

impl Default for ConditionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a pass ended in `error`.
#[derive(Clone, Debug, PartialEq)]
pub struct Failure {
    pub reason: String,
    pub message: String,
}

impl Failure {
    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Project a finished pass onto the status subresource.
///
/// `failure` is only reported while `cluster_status` is `error`. Conditions
/// that did not change keep their previous transition time, so projecting
/// the same outcome twice yields an identical status.
pub fn project_status(
    previous: Option<&RabbitmqClusterStatus>,
    cluster_status: ClusterStatus,
    failure: Option<&Failure>,
    generation: Option<i64>,
) -> RabbitmqClusterStatus {
    let mut builder = ConditionBuilder::new();
    match (cluster_status, failure) {
        (ClusterStatus::Created, _) => {
            builder
                .ready(true, "ChildrenPresent", "All child objects exist", generation)
                .progressing(false, "Converged", "No child object missing", generation)
                .degraded(false, "Converged", "No failure", generation);
        }
        (ClusterStatus::Error, Some(failure)) => {
            builder
                .ready(false, &failure.reason, &failure.message, generation)
                .progressing(false, &failure.reason, "Waiting for a spec change", generation)
                .degraded(true, &failure.reason, &failure.message, generation);
        }
        (ClusterStatus::Error, None) => {
            builder
                .ready(false, "Error", "Last pass failed", generation)
                .progressing(false, "Error", "Waiting for a spec change", generation)
                .degraded(true, "Error", "Last pass failed", generation);
        }
        (ClusterStatus::Creating | ClusterStatus::Empty, _) => {
            builder
                .ready(false, "ChildrenPending", "Creating child objects", generation)
                .progressing(true, "ChildrenPending", "Creating child objects", generation)
                .degraded(false, "ChildrenPending", "No failure", generation);
        }
    }
    if let Some(previous) = previous {
        builder.preserve_transitions(&previous.conditions);
    }

    RabbitmqClusterStatus {
        cluster_status,
        conditions: builder.build(),
        observed_generation: generation,
    }
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == "True")
}

/// Get the reason for a condition
pub fn get_condition_reason<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a str> {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .map(|c| c.reason.as_str())
}
