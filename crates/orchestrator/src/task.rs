use std::fmt;

use listing::SourceId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::OrchestratorError;

/// Lifecycle of one scrape task.
///
/// ```text
/// Queued -> InFlight -> Succeeded
///              |  ^
///              v  |
///           Retrying
/// Queued | InFlight | Retrying -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    InFlight,
    Retrying,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Queued, InFlight)
                | (InFlight, Succeeded)
                | (InFlight, Retrying)
                | (InFlight, Failed)
                | (Retrying, InFlight)
                | (Queued, Failed)
                | (Retrying, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::InFlight => "in_flight",
            TaskState::Retrying => "retrying",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Identity of a task as reported back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: TaskId,
    pub source: SourceId,
    /// Position of the task's query in the slice passed to `run`.
    pub query_index: usize,
}

/// One (query, source) pair scheduled by the orchestrator.
#[derive(Debug, Clone)]
pub struct ScrapeTask {
    task: TaskRef,
    attempt_count: u32,
    state: TaskState,
}

impl ScrapeTask {
    pub fn new(id: TaskId, source: SourceId, query_index: usize) -> Self {
        Self {
            task: TaskRef {
                id,
                source,
                query_index,
            },
            attempt_count: 0,
            state: TaskState::Queued,
        }
    }

    pub fn task_ref(&self) -> &TaskRef {
        &self.task
    }

    pub fn id(&self) -> TaskId {
        self.task.id
    }

    pub fn source(&self) -> &SourceId {
        &self.task.source
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Move to `next`, counting an attempt on every entry into `InFlight`.
    pub fn transition(&mut self, next: TaskState) -> Result<(), OrchestratorError> {
        if !self.state.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        if next == TaskState::InFlight {
            self.attempt_count += 1;
        }
        debug!(
            task_id = self.task.id.0,
            source = %self.task.source,
            attempt = self.attempt_count,
            from = %self.state,
            state = %next,
            "scrape task transition"
        );
        self.state = next;
        Ok(())
    }
}
