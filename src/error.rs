use std::path::PathBuf;
use thiserror::Error;

use crate::domain::TaskValidationError;
use crate::llm::LlmError;

pub type Result<T> = std::result::Result<T, KnowledgeError>;

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid source root: {0}")]
    InvalidRoot(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Invalid execution plan: {}", join(.0))]
    InvalidPlan(Vec<String>),

    #[error("Task validation failed: {}", join(.0))]
    TaskValidation(Vec<TaskValidationError>),

    #[error("Artifact error at {}: {message}", path.display())]
    Artifact { path: PathBuf, message: String },

    #[error("Unknown run: {0}")]
    UnknownRun(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<Vec<TaskValidationError>> for KnowledgeError {
    fn from(errors: Vec<TaskValidationError>) -> Self {
        KnowledgeError::TaskValidation(errors)
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
