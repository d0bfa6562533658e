//! Controller module for bookkeeper-operator.
//!
//! Contains the reconciliation loop, object reconciler, upgrade sequencer,
//! status projection, and error handling.

pub mod context;
pub mod error;
pub mod objects;
pub mod reconciler;
pub mod rollout;
pub mod status;
