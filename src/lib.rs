//! repo-knowledge: Build and incrementally maintain a hierarchical knowledge tree
//!
//! The pipeline scans a repository, detects what changed since the last run,
//! decides what to rebuild or delete, plans a dependency-ordered set of tasks
//! and executes them bottom-up, summarizing files and then directories through
//! an LLM behind a prompt cache.

pub mod cli;
pub mod config;
pub mod decide;
pub mod detect;
pub mod domain;
pub mod error;
pub mod execute;
pub mod llm;
pub mod plan;
pub mod scan;
pub mod service;
pub mod store;
pub mod utils;

pub use error::{KnowledgeError, Result};
