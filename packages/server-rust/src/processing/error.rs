//! Errors reported by phases, executors and completion callbacks.

use crate::execution::ExecutionError;

/// Why an executor refused a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WorkRejected {
    #[error("work queue is full")]
    QueueFull,
    #[error("executor is stopped")]
    Stopped,
}

/// Failure of a response-completion callback.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// The callback already reported an outcome.
    #[error("completion callback already invoked")]
    AlreadyCompleted,
    /// The exception strategy failed while producing the failure response.
    #[error(transparent)]
    Handler(anyhow::Error),
}

/// Terminal failure of a message-processing phase.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    /// No registered phase supports the message's template.
    #[error("no phase supports the message process template")]
    NoSupportingPhase,
    /// Only validation phases ran for a message that was not consumed.
    #[error("no phase routed the message")]
    NotRouted,
    #[error("phase work rejected: {0}")]
    WorkRejected(#[from] WorkRejected),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    /// A template hook failed.
    #[error(transparent)]
    Template(anyhow::Error),
}
