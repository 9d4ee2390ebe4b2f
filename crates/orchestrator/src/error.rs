use thiserror::Error;

use crate::task::TaskState;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("invalid task transition {from} -> {to}")]
    InvalidTransition { from: TaskState, to: TaskState },
    #[error("invalid orchestrator configuration: {0}")]
    InvalidConfig(String),
}
