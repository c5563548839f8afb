//! Execution planning: task DAG, generation from decisions, and preview

pub mod execution_plan;
pub mod generator;
pub mod preview;

pub use execution_plan::{ExecutionPlan, PlanStats};
pub use generator::PlanGenerator;
pub use preview::{render_preview, PreviewOptions};
