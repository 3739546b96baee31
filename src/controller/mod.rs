//! Controller module for rabbitmq-operator.
//!
//! Contains the reconcile engine, the status state machine, retry
//! accounting, error classification and status projection.

pub mod common;
pub mod context;
pub mod diff;
pub mod error;
pub mod reconciler;
pub mod retry;
pub mod state_machine;
pub mod status;
