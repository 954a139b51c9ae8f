//! Data structures for tracking tasks.
//!
//! A `Task` is the immutable description of one command in a run, `TaskState` is
//! its lifecycle, and `TaskReport` is what the orchestrator hands back once the
//! task is finished.

use crate::error::ExecError;
use crate::palette::Color;

/// One command of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Position in the command list, also the label printed before each line.
    pub index: usize,
    /// Command string handed to the shell.
    pub command: String,
    /// Color used for every line this task prints.
    pub color: Color,
}

/// The lifecycle status of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Created, not dispatched yet.
    Pending,
    /// Dispatched for concurrent execution.
    Running,
    /// Command exited with status 0.
    Succeeded,
    /// Command exited non-zero, could not be started, or its output broke.
    Failed { error: String },
    /// Aborted because the run was cancelled.
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed { .. } | TaskState::Cancelled
        )
    }

    /// Moves to `next` if the transition is allowed.
    ///
    /// Allowed: `Pending -> Running`, `Running -> terminal`. Terminal states are
    /// final. Returns whether the state changed.
    pub fn advance(&mut self, next: TaskState) -> bool {
        let allowed = match (&*self, &next) {
            (TaskState::Pending, TaskState::Running) => true,
            (TaskState::Running, next) => next.is_terminal(),
            _ => false,
        };
        if allowed {
            *self = next;
        }
        allowed
    }

    /// Terminal state for an execution result.
    pub fn from_result(result: &Result<(), ExecError>) -> Self {
        match result {
            Ok(()) => TaskState::Succeeded,
            Err(ExecError::Cancelled) => TaskState::Cancelled,
            Err(err) => TaskState::Failed {
                error: err.to_string(),
            },
        }
    }
}

/// Final outcome of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub index: usize,
    pub command: String,
    pub state: TaskState,
}
