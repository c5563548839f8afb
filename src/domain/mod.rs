//! Core data model shared by every pipeline stage.

pub mod change;
pub mod config;
pub mod context;
pub mod decision;
pub mod mode;
pub mod results;
pub mod status;
pub mod task;

pub use change::{ChangeInfo, ChangeType, PathKind};
pub use config::{
    CacheConfig, Config, DetectConfig, ExecutionConfig, LlmConfig, MemoryConfig,
    MemoryStrategyKind, ProviderKind, ScanConfig, StatusConfig, StoreConfig,
};
pub use context::{DirectoryContext, FileContext, ProcessingStatus};
pub use decision::{
    Decision, DecisionError, DecisionOutcome, DecisionReason, DecisionReport, DeletionDecision,
    RebuildDecision,
};
pub use mode::IndexingMode;
pub use results::{ExecutionCounters, ExecutionResults, TaskFailure, TaskOutcome, TaskTiming};
pub use status::{IndexingStatus, ProcessingStats, RunPhase};
pub use task::{AtomicTask, AtomicTaskBuilder, TaskType, TaskValidationError};
