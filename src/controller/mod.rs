//! Create / update / delete / reconcile workflows
//!
//! The [`Reconciler`] ties the pieces together: it takes the cluster lock,
//! asks the planner for steps, dispatches each one and waits on its operation
//! before moving to the next.

mod cluster;
mod outcome;

pub use cluster::Reconciler;
pub use outcome::{ReconcileOutcome, SequencePhase, StepFailure};
