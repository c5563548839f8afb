//! Human-readable rendering of a plan, without executing anything.

use super::ExecutionPlan;
use crate::domain::TaskType;
use crate::utils::paths::display_key;
use crate::utils::truncate_path_display;
use std::fmt::Write;

const PATH_WIDTH: usize = 56;
const DEFAULT_TASK_LIMIT: usize = 40;

#[derive(Debug, Clone)]
pub struct PreviewOptions {
    /// Maximum number of task lines; the rest are summarized in one line.
    pub task_limit: usize,
    pub path_width: usize,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self { task_limit: DEFAULT_TASK_LIMIT, path_width: PATH_WIDTH }
    }
}

pub fn render_preview(plan: &ExecutionPlan, title: &str, options: &PreviewOptions) -> String {
    let mut out = String::new();
    let stats = plan.stats();

    let _ = writeln!(out, "{title}");
    let _ = writeln!(
        out,
        "  Tasks: {} ({} need summarization, est. {:.1}s sequential)",
        stats.total_tasks,
        stats.expensive_tasks,
        stats.total_duration.as_secs_f64()
    );

    let _ = writeln!(out, "\nBy type:");
    for task_type in TaskType::ALL {
        let count = stats.by_type.get(&task_type).copied().unwrap_or(0);
        if count > 0 {
            let _ = writeln!(out, "  {:<26} {count:>5}", task_type.as_str());
        }
    }

    let problems = plan.validate_dependencies();
    if !problems.is_empty() {
        let _ = writeln!(out, "\nPlan is invalid and will not run:");
        for problem in &problems {
            let _ = writeln!(out, "  - {problem}");
        }
        return out;
    }

    let Ok(groups) = plan.get_parallel_execution_groups() else {
        return out;
    };
    let _ = writeln!(out, "\nDependency levels:");
    for (level, group) in groups.iter().enumerate() {
        let expensive = group.iter().filter(|t| t.is_expensive()).count();
        let _ = writeln!(out, "  Level {level}: {} tasks ({expensive} summarization)", group.len());
    }

    let _ = writeln!(out, "\nExecution order:");
    let mut shown = 0usize;
    for (level, group) in groups.iter().enumerate() {
        for task in group {
            if shown == options.task_limit {
                break;
            }
            let path = truncate_path_display(display_key(task.target()), options.path_width);
            let _ = writeln!(out, "  [L{level}] {:<26} {path}", task.task_type().as_str());
            shown += 1;
        }
    }
    if plan.len() > shown {
        let _ = writeln!(out, "  ... and {} more", plan.len() - shown);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AtomicTask;

    fn task(task_type: TaskType, target: &str, deps: &[&str]) -> AtomicTask {
        let builder = AtomicTask::builder(task_type, target).dependencies(deps.iter().copied());
        let builder = match task_type {
            TaskType::AnalyzeFile => builder
                .metadata("file_size", 10u64)
                .metadata("last_modified", "2024-01-01T00:00:00Z")
                .metadata("repository_root", "/repo"),
            TaskType::CreateDirectorySummary => builder
                .metadata("child_count", 1u64)
                .metadata("children", serde_json::json!([]))
                .metadata("repository_root", "/repo"),
            _ => builder.metadata("reason", "test"),
        };
        builder.build().unwrap()
    }

    #[test]
    fn preview_lists_types_levels_and_tasks() {
        let mut plan = ExecutionPlan::new();
        plan.add_task(task(TaskType::AnalyzeFile, "src/very/deep/path/to/a/module/file_name.rs", &[])).unwrap();
        plan.add_task(task(TaskType::CreateDirectorySummary, "", &["analyze:src/very/deep/path/to/a/module/file_name.rs"])).unwrap();

        let text = render_preview(&plan, "Plan", &PreviewOptions { task_limit: 10, path_width: 20 });
        assert!(text.contains("Tasks: 2 (2 need summarization"));
        assert!(text.contains("analyze-file"));
        assert!(text.contains("Level 1: 1 tasks"));
        assert!(text.contains("…/"));
        assert!(text.contains("[L1] create-directory-summary   ."));
    }

    #[test]
    fn invalid_plan_shows_problems() {
        let mut plan = ExecutionPlan::new();
        plan.add_task(task(TaskType::Skip, "a", &["missing"])).unwrap();
        let text = render_preview(&plan, "Plan", &PreviewOptions::default());
        assert!(text.contains("Plan is invalid"));
        assert!(text.contains("unknown task 'missing'"));
    }

    #[test]
    fn long_plans_are_cut() {
        let mut plan = ExecutionPlan::new();
        for i in 0..5 {
            plan.add_task(task(TaskType::Skip, &format!("f{i}"), &[])).unwrap();
        }
        let text = render_preview(&plan, "Plan", &PreviewOptions { task_limit: 2, path_width: 40 });
        assert!(text.contains("... and 3 more"));
    }
}
