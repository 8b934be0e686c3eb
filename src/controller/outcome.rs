//! What a reconciler call reports back

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::lock::{LockToken, ResourceKeyLock};
use crate::model::{ObservedCluster, ResourceIdentity};
use crate::planner::UpdateStep;
use crate::{Error, Result};

/// Where a mutation sequence is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequencePhase {
    /// Not yet holding the lock
    Init,
    /// Holding the lock, nothing dispatched yet
    Locked,
    /// A remote call has been made and its operation is in flight
    StepDispatched,
    /// The last dispatched operation finished successfully
    StepTerminal,
    /// Every step finished
    Complete,
    /// A step or precondition failed
    Failed,
}

/// The step that stopped a sequence and why
#[derive(Debug)]
pub struct StepFailure {
    /// Zero-based position of the failed step in the plan (equal to the
    /// number of steps applied before it)
    pub step_index: usize,
    /// The failed step; None when the failure happened outside a planned step
    pub step: Option<UpdateStep>,
    /// What went wrong
    pub error: Error,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step {
            Some(step) => write!(f, "step {} ({}) failed: {}", self.step_index + 1, step, self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Result of create, update and reconcile
///
/// Steps are never rolled back: on failure the first `applied_steps` steps of
/// the plan stay applied.
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// Steps confirmed applied
    pub applied_steps: usize,
    /// Steps planned
    pub planned_steps: usize,
    /// Cluster state fetched after the lock was released, when available
    pub final_state: Option<ObservedCluster>,
    /// Set when the sequence stopped early
    pub failure: Option<StepFailure>,
}

impl ReconcileOutcome {
    /// True when every planned step was applied
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// The error that stopped the sequence
    pub fn error(&self) -> Option<&Error> {
        self.failure.as_ref().map(|f| &f.error)
    }

    /// Convert into a `Result`, dropping partial-progress details on failure
    pub fn into_result(self) -> Result<Self> {
        match self.failure {
            Some(failure) => Err(failure.error),
            None => Ok(self),
        }
    }

    pub(super) fn from_progress(
        progress: &Progress,
        final_state: Option<ObservedCluster>,
        error: Option<Error>,
    ) -> Self {
        Self {
            applied_steps: progress.applied(),
            planned_steps: progress.planned(),
            final_state,
            failure: error.map(|e| progress.failure(e)),
        }
    }
}

/// Step counters shared with an outer timeout so a cancelled call can still
/// report how far it got
#[derive(Debug, Default)]
pub(super) struct Progress {
    planned: AtomicUsize,
    applied: AtomicUsize,
    current: Mutex<Option<UpdateStep>>,
}

impl Progress {
    pub fn add_planned(&self, steps: usize) {
        self.planned.fetch_add(steps, Ordering::SeqCst);
    }

    pub fn begin(&self, step: Option<&UpdateStep>) {
        if let Ok(mut current) = self.current.lock() {
            *current = step.cloned();
        }
    }

    pub fn complete_step(&self) {
        self.applied.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }

    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    pub fn planned(&self) -> usize {
        self.planned.load(Ordering::SeqCst)
    }

    pub fn failure(&self, error: Error) -> StepFailure {
        StepFailure {
            step_index: self.applied(),
            step: self.current.lock().ok().and_then(|c| c.clone()),
            error,
        }
    }
}

/// One lock scope: INIT, LOCKED, any number of dispatch/terminal rounds, then
/// COMPLETE or FAILED
///
/// The lock token lives here and is dropped exactly once, in
/// [`finish`](Self::finish) or on drop if the future is cancelled.
pub(super) struct Sequence<'a> {
    cluster: &'a ResourceIdentity,
    phase: SequencePhase,
    token: Option<LockToken>,
}

impl<'a> Sequence<'a> {
    pub async fn lock(locks: &ResourceKeyLock, cluster: &'a ResourceIdentity) -> Sequence<'a> {
        let mut sequence = Sequence {
            cluster,
            phase: SequencePhase::Init,
            token: None,
        };
        sequence.token = Some(locks.acquire(cluster).await);
        sequence.transition(SequencePhase::Locked);
        sequence
    }

    pub fn transition(&mut self, to: SequencePhase) {
        debug!(cluster = %self.cluster, from = ?self.phase, to = ?to, "sequence transition");
        self.phase = to;
    }

    pub fn phase(&self) -> SequencePhase {
        self.phase
    }

    /// Record the outcome and release the lock
    pub fn finish<T>(mut self, result: &Result<T>) {
        let to = if result.is_ok() {
            SequencePhase::Complete
        } else {
            SequencePhase::Failed
        };
        self.transition(to);
        drop(self.token.take());
    }
}
