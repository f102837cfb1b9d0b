//! Busy-state tracking for long-running enrichment operations.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum OperationState {
    #[default]
    Idle,
    Running,
    Failed(String),
}

/// Shared handle; clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct OperationTracker {
    state: Arc<Mutex<OperationState>>,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> OperationState {
        self.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        *self.lock() == OperationState::Running
    }

    /// Move to `Running` unless the operation is already in flight.
    pub fn try_start(&self) -> Option<RunningGuard> {
        let mut state = self.lock();
        if *state == OperationState::Running {
            return None;
        }
        *state = OperationState::Running;
        Some(RunningGuard {
            tracker: self.clone(),
            settled: false,
        })
    }

    fn settle(&self, next: OperationState) {
        *self.lock() = next;
    }

    fn lock(&self) -> MutexGuard<'_, OperationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held while an operation runs. Dropping it unsettled records a failure.
#[derive(Debug)]
pub struct RunningGuard {
    tracker: OperationTracker,
    settled: bool,
}

impl RunningGuard {
    pub fn finish(mut self) {
        self.settled = true;
        self.tracker.settle(OperationState::Idle);
    }

    pub fn fail(mut self, message: impl Into<String>) {
        self.settled = true;
        self.tracker.settle(OperationState::Failed(message.into()));
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.tracker
                .settle(OperationState::Failed("operation interrupted".to_string()));
        }
    }
}
