//! Execution engine: runs an execution plan level by level, dispatching each
//! task to its handler.

pub mod cancel;
pub mod engine;
pub mod handlers;
pub mod retry;

use crate::error::KnowledgeError;
use crate::llm::LlmError;
use std::path::PathBuf;
use thiserror::Error;

pub use cancel::CancellationToken;
pub use engine::{ExecutionEngine, ExecutionObserver, NoopObserver};
pub use handlers::{run_task, TaskContext, TaskEffect};
pub use retry::{Attempted, RetryPolicy};

/// Why a single task failed.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("summarizer: {0}")]
    Llm(#[from] LlmError),

    #[error("filesystem error at {}: {message}", path.display())]
    Filesystem { path: PathBuf, message: String },

    #[error("storage: {0}")]
    Storage(#[from] KnowledgeError),

    #[error("invalid task: {0}")]
    Invalid(String),

    #[error("refused: {0}")]
    Refused(String),

    #[error("stale artifact: {0}")]
    Stale(String),
}

impl TaskError {
    pub fn filesystem(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        TaskError::Filesystem { path: path.into(), message: err.to_string() }
    }

    /// Only summarizer transport and provider failures are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            TaskError::Llm(e) => e.is_transient(),
            TaskError::Filesystem { .. }
            | TaskError::Storage(_)
            | TaskError::Invalid(_)
            | TaskError::Refused(_)
            | TaskError::Stale(_) => false,
        }
    }
}
