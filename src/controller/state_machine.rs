//! Finite state machine for `status.clusterStatus`.
//!
//! Status is a projection of the last completed reconcile pass. Every
//! change goes through the transition table below, which is what keeps the
//! status from regressing: `created` only drops back to `creating` when a
//! required child was actually observed missing and could not be restored.
//!
//! ```text
//!   "" ──ChildrenPending──▶ creating ──ChildrenReady──▶ created
//!   "" ──ChildrenReady────────────────────────────────▶ created
//!                             ▲                          │
//!                             └──ChildrenMissing [guard]─┘
//!   any ──ValidationFailed / IrrecoverableFailure / RetryBudgetExhausted──▶ error
//! ```

use std::fmt;

use crate::controller::error::ErrorKind;
use crate::crd::ClusterStatus;

/// Events that trigger status transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterEvent {
    /// Workload and both services exist after the pass
    ChildrenReady,
    /// Some required child is still missing
    ChildrenPending,
    /// A required child of a created cluster disappeared
    ChildrenMissing,
    /// The spec could not be turned into children
    ValidationFailed,
    /// A child write failed in a way retrying will not fix
    IrrecoverableFailure,
    /// Transient failures kept recurring past the retry budget
    RetryBudgetExhausted,
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterEvent::ChildrenReady => write!(f, "ChildrenReady"),
            ClusterEvent::ChildrenPending => write!(f, "ChildrenPending"),
            ClusterEvent::ChildrenMissing => write!(f, "ChildrenMissing"),
            ClusterEvent::ValidationFailed => write!(f, "ValidationFailed"),
            ClusterEvent::IrrecoverableFailure => write!(f, "IrrecoverableFailure"),
            ClusterEvent::RetryBudgetExhausted => write!(f, "RetryBudgetExhausted"),
        }
    }
}

/// What the finished pass observed
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// StatefulSet, ingress and headless services all exist
    pub required_present: bool,
    /// A required child was read back as absent by a successful fetch
    pub required_absent_observed: bool,
    /// Classification of the pass's error, if any
    pub error_kind: Option<ErrorKind>,
    /// The key has been requeued more often than the retry budget allows
    pub retries_exhausted: bool,
}

impl TransitionContext {
    /// Context of a pass that left the required children in the given state.
    pub fn new(required_present: bool) -> Self {
        Self {
            required_present,
            ..Default::default()
        }
    }

    /// Record that a required child was observed absent.
    pub fn with_absent_observed(mut self, observed: bool) -> Self {
        self.required_absent_observed = observed;
        self
    }

    /// Record the pass's error classification.
    pub fn with_error(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    /// Record retry budget exhaustion.
    pub fn with_retries_exhausted(mut self) -> Self {
        self.retries_exhausted = true;
        self
    }
}

/// A state transition definition with optional guard
#[derive(Debug)]
pub struct Transition {
    pub from: ClusterStatus,
    pub to: ClusterStatus,
    pub event: ClusterEvent,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: ClusterStatus,
        to: ClusterStatus,
        event: ClusterEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug)]
pub enum TransitionResult {
    /// Transition was successful
    Success {
        from: ClusterStatus,
        to: ClusterStatus,
        event: ClusterEvent,
        description: &'static str,
    },
    /// Transition was not valid for current state
    InvalidTransition {
        current: ClusterStatus,
        event: ClusterEvent,
    },
    /// Guard condition prevented the transition
    GuardFailed {
        from: ClusterStatus,
        to: ClusterStatus,
        event: ClusterEvent,
        reason: String,
    },
}

impl TransitionResult {
    /// Status after applying this result to `current`: the target on
    /// success, unchanged otherwise.
    pub fn resulting_status(&self, current: ClusterStatus) -> ClusterStatus {
        match self {
            TransitionResult::Success { to, .. } => *to,
            _ => current,
        }
    }
}

use ClusterStatus::{Created, Creating, Empty, Error};

/// Formal state machine for `status.clusterStatus`
pub struct ClusterStateMachine {
    transitions: Vec<Transition>,
}

impl Default for ClusterStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStateMachine {
    /// Create a new state machine with the defined transition table
    pub fn new() -> Self {
        Self {
            transitions: vec![
                // === Empty ===
                Transition::new(
                    Empty,
                    Creating,
                    ClusterEvent::ChildrenPending,
                    "Children are being created",
                ),
                Transition::new(Empty, Created, ClusterEvent::ChildrenReady, "All children exist"),
                Transition::new(Empty, Error, ClusterEvent::ValidationFailed, "Invalid spec"),
                Transition::new(
                    Empty,
                    Error,
                    ClusterEvent::IrrecoverableFailure,
                    "Child write rejected",
                ),
                Transition::new(
                    Empty,
                    Error,
                    ClusterEvent::RetryBudgetExhausted,
                    "Retry budget exhausted",
                ),
                // === Creating ===
                Transition::new(
                    Creating,
                    Creating,
                    ClusterEvent::ChildrenPending,
                    "Children still being created",
                ),
                Transition::new(
                    Creating,
                    Created,
                    ClusterEvent::ChildrenReady,
                    "All children exist",
                ),
                Transition::new(Creating, Error, ClusterEvent::ValidationFailed, "Invalid spec"),
                Transition::new(
                    Creating,
                    Error,
                    ClusterEvent::IrrecoverableFailure,
                    "Child write rejected",
                ),
                Transition::new(
                    Creating,
                    Error,
                    ClusterEvent::RetryBudgetExhausted,
                    "Retry budget exhausted",
                ),
                // === Created ===
                Transition::new(
                    Created,
                    Created,
                    ClusterEvent::ChildrenReady,
                    "Children still converged",
                ),
                Transition::new(
                    Created,
                    Creating,
                    ClusterEvent::ChildrenMissing,
                    "Required child disappeared",
                ),
                Transition::new(Created, Error, ClusterEvent::ValidationFailed, "Invalid spec"),
                Transition::new(
                    Created,
                    Error,
                    ClusterEvent::IrrecoverableFailure,
                    "Child write rejected",
                ),
                Transition::new(
                    Created,
                    Error,
                    ClusterEvent::RetryBudgetExhausted,
                    "Retry budget exhausted",
                ),
                // === Error ===
                Transition::new(
                    Error,
                    Creating,
                    ClusterEvent::ChildrenPending,
                    "Recovered, children being created",
                ),
                Transition::new(Error, Created, ClusterEvent::ChildrenReady, "Recovered"),
                Transition::new(Error, Error, ClusterEvent::ValidationFailed, "Spec still invalid"),
                Transition::new(
                    Error,
                    Error,
                    ClusterEvent::IrrecoverableFailure,
                    "Child write still rejected",
                ),
            ],
        }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(
        &self,
        current: ClusterStatus,
        event: ClusterEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event);

        match transition {
            Some(t) => {
                if let Some(reason) = self.check_guard(t, ctx) {
                    TransitionResult::GuardFailed {
                        from: t.from,
                        to: t.to,
                        event,
                        reason,
                    }
                } else {
                    TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    }
                }
            }
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: ClusterStatus, event: ClusterEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// Get all valid events for a given state
    pub fn valid_events(&self, state: ClusterStatus) -> Vec<ClusterEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event)
            .collect()
    }

    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match (transition.to, transition.event) {
            // Only a confirmed absence may regress a created cluster
            (Creating, ClusterEvent::ChildrenMissing) if !ctx.required_absent_observed => Some(
                "required child not confirmed absent, keeping created".to_string(),
            ),
            (Created, ClusterEvent::ChildrenReady) if !ctx.required_present => {
                Some("required children missing".to_string())
            }
            _ => None,
        }
    }

    /// Status the cluster ends up in after a pass described by `ctx`.
    pub fn next_status(&self, current: ClusterStatus, ctx: &TransitionContext) -> ClusterStatus {
        let event = determine_event(current, ctx);
        self.transition(current, event, ctx).resulting_status(current)
    }
}

/// Determine the event a finished pass produces
pub fn determine_event(current: ClusterStatus, ctx: &TransitionContext) -> ClusterEvent {
    if ctx.retries_exhausted {
        return ClusterEvent::RetryBudgetExhausted;
    }
    match ctx.error_kind {
        Some(ErrorKind::Validation) => return ClusterEvent::ValidationFailed,
        Some(ErrorKind::Irrecoverable) => return ClusterEvent::IrrecoverableFailure,
        // Transient failures never show up in status by themselves
        Some(ErrorKind::Transient) | None => {}
    }
    if ctx.required_present {
        ClusterEvent::ChildrenReady
    } else if current == Created {
        ClusterEvent::ChildrenMissing
    } else {
        ClusterEvent::ChildrenPending
    }
}
