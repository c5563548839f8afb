//! Operation surface: trigger a run, poll its status, preview a plan.

pub mod pipeline;
pub mod runs;

pub use pipeline::{analyze, build_conversations, build_plan, preview_plan, resolve_layout, scan_changes, Analysis};
pub use runs::{load_run_record, IndexService, RunRecord};
