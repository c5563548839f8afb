//! Turns a decision report into an execution plan.

use super::ExecutionPlan;
use crate::domain::{
    AtomicTask, AtomicTaskBuilder, DecisionOutcome, DecisionReason, DecisionReport, DirectoryContext,
    PathKind, TaskType, TaskValidationError,
};
use crate::error::{KnowledgeError, Result};
use crate::store::KnowledgeLayout;
use crate::utils::paths::display_key;
use serde_json::{json, Value};
use std::collections::HashMap;

pub struct PlanGenerator<'a> {
    layout: &'a KnowledgeLayout,
    verify_skipped: bool,
}

impl<'a> PlanGenerator<'a> {
    pub fn new(layout: &'a KnowledgeLayout) -> Self {
        Self { layout, verify_skipped: false }
    }

    /// Emit verify-freshness tasks instead of plain skips for fresh files.
    pub fn verify_skipped(mut self, verify: bool) -> Self {
        self.verify_skipped = verify;
        self
    }

    /// Build the plan. Task construction problems are collected and returned
    /// together rather than one at a time.
    pub fn generate(&self, report: &DecisionReport, tree: &DirectoryContext) -> Result<ExecutionPlan> {
        let mut plan = ExecutionPlan::new();
        let mut problems: Vec<TaskValidationError> = Vec::new();
        let mut task_for: HashMap<(PathKind, String), String> = HashMap::new();
        let repository_root = self.layout.source_root().display().to_string();

        let mut push = |plan: &mut ExecutionPlan, built: std::result::Result<AtomicTask, Vec<TaskValidationError>>| {
            match built {
                Ok(task) => {
                    let id = task.id().to_string();
                    plan.add_task(task).map(|()| Some(id))
                }
                Err(errors) => {
                    problems.extend(errors);
                    Ok(None)
                }
            }
        };

        for file in tree.all_files() {
            let Some(decision) = report.decision(file.path()) else {
                continue;
            };
            let builder = match decision.outcome() {
                DecisionOutcome::Rebuild | DecisionOutcome::Create => {
                    let mut b = AtomicTask::builder(TaskType::AnalyzeFile, file.path())
                        .metadata("file_size", file.size_bytes())
                        .metadata("last_modified", file.modified().to_rfc3339())
                        .metadata("repository_root", repository_root.as_str())
                        .metadata("reason", decision.reason().as_str());
                    if let Some(from) = decision.metadata().get("moved_from") {
                        b = b.metadata("moved_from", from.clone());
                    }
                    b
                }
                DecisionOutcome::Skip
                    if self.verify_skipped && decision.reason() == DecisionReason::CacheFresh =>
                {
                    AtomicTask::builder(TaskType::VerifyFreshness, file.path())
                        .metadata(
                            "artifact_path",
                            self.layout.artifact_path(file.path(), PathKind::File).display().to_string(),
                        )
                        .metadata("last_modified", file.modified().to_rfc3339())
                        .metadata("file_size", file.size_bytes())
                }
                DecisionOutcome::Skip => skip_builder(file.path(), decision.reason(), decision.reasoning()),
                DecisionOutcome::Delete | DecisionOutcome::Error => continue,
            };
            if let Some(id) = push(&mut plan, builder.build())? {
                task_for.insert((PathKind::File, file.path().to_string()), id);
            }
        }

        for deletion in report.deletions() {
            let mut builder = AtomicTask::builder(TaskType::DeleteOrphan, deletion.path())
                .metadata("artifact_path", deletion.artifact_path().display().to_string())
                .metadata("is_safe_to_delete", deletion.is_safe_to_delete())
                .metadata("backup_recommended", deletion.backup_recommended())
                .metadata("kind", kind_label(deletion.kind()))
                .metadata("reason", deletion.reason().as_str());
            if deletion.kind() == PathKind::Directory {
                builder = builder.id(format!("delete-dir:{}", display_key(deletion.path())));
            }
            push(&mut plan, builder.build())?;
        }

        for dir in tree.post_order() {
            let Some(decision) = report.decision(dir.path()) else {
                continue;
            };
            let builder = match decision.outcome() {
                DecisionOutcome::Rebuild | DecisionOutcome::Create => {
                    // Every child needs a task. A task-less child errored.
                    let missing: Vec<&str> = dir
                        .files()
                        .iter()
                        .filter(|f| !task_for.contains_key(&(PathKind::File, f.path().to_string())))
                        .map(|f| f.path())
                        .chain(
                            dir.directories()
                                .iter()
                                .filter(|d| !task_for.contains_key(&(PathKind::Directory, d.path().to_string())))
                                .map(|d| d.path()),
                        )
                        .collect();
                    if !missing.is_empty() {
                        tracing::warn!(
                            path = %display_key(dir.path()),
                            children = %missing.join(", "),
                            "directory summary withheld: children have no task"
                        );
                        continue;
                    }
                    let children: Vec<Value> = dir
                        .files()
                        .iter()
                        .map(|f| {
                            json!({
                                "path": f.path(),
                                "kind": "file",
                                "skip_reason": f.skip_reason().map(|r| r.as_str()),
                            })
                        })
                        .chain(dir.directories().iter().map(|d| json!({ "path": d.path(), "kind": "directory" })))
                        .collect();
                    let dependencies: Vec<String> = dir
                        .files()
                        .iter()
                        .filter_map(|f| task_for.get(&(PathKind::File, f.path().to_string())))
                        .chain(
                            dir.directories()
                                .iter()
                                .filter_map(|d| task_for.get(&(PathKind::Directory, d.path().to_string()))),
                        )
                        .cloned()
                        .collect();
                    AtomicTask::builder(TaskType::CreateDirectorySummary, dir.path())
                        .metadata("child_count", children.len())
                        .metadata("children", Value::Array(children))
                        .metadata("repository_root", repository_root.as_str())
                        .metadata("reason", decision.reason().as_str())
                        .dependencies(dependencies)
                }
                DecisionOutcome::Skip => skip_builder(dir.path(), decision.reason(), decision.reasoning())
                    .id(format!("skip-dir:{}", display_key(dir.path()))),
                DecisionOutcome::Delete | DecisionOutcome::Error => continue,
            };
            if let Some(id) = push(&mut plan, builder.build())? {
                task_for.insert((PathKind::Directory, dir.path().to_string()), id);
            }
        }

        if !problems.is_empty() {
            return Err(KnowledgeError::TaskValidation(problems));
        }
        tracing::info!(
            tasks = plan.len(),
            expensive = plan.expensive_task_count(),
            "execution plan generated"
        );
        Ok(plan)
    }
}

fn skip_builder(path: &str, reason: DecisionReason, reasoning: &str) -> AtomicTaskBuilder {
    AtomicTask::builder(TaskType::Skip, path)
        .metadata("reason", reason.as_str())
        .metadata("reasoning", reasoning)
}

fn kind_label(kind: PathKind) -> &'static str {
    match kind {
        PathKind::File => "file",
        PathKind::Directory => "directory",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeletionDecision, FileContext, IndexingMode, RebuildDecision, StoreConfig};
    use crate::scan::build_tree;
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    fn at() -> DateTime<Utc> {
        "2024-06-01T12:00:00Z".parse().unwrap()
    }

    fn decide(report: &mut DecisionReport, path: &str, kind: PathKind, outcome: DecisionOutcome, reason: DecisionReason) {
        report.insert_rebuild(RebuildDecision::new(path, kind, outcome, reason, "test", at()));
    }

    fn scenario() -> (DecisionReport, DirectoryContext) {
        let tree = build_tree(
            ["a.py", "b.py", "sub/c.py"].iter().map(|p| FileContext::discovered(*p, 10, at(), None)).collect(),
        );
        let mut report = DecisionReport::new(IndexingMode::Incremental, at());
        decide(&mut report, "a.py", PathKind::File, DecisionOutcome::Rebuild, DecisionReason::NewSource);
        decide(&mut report, "b.py", PathKind::File, DecisionOutcome::Skip, DecisionReason::CacheFresh);
        decide(&mut report, "sub/c.py", PathKind::File, DecisionOutcome::Rebuild, DecisionReason::CacheStale);
        decide(&mut report, "sub", PathKind::Directory, DecisionOutcome::Rebuild, DecisionReason::ChildChanged);
        decide(&mut report, "", PathKind::Directory, DecisionOutcome::Rebuild, DecisionReason::ChildChanged);
        (report, tree)
    }

    fn ids(group: &[&AtomicTask]) -> Vec<String> {
        group.iter().map(|t| t.id().to_string()).collect()
    }

    #[test]
    fn scenario_plan_is_bottom_up() {
        let tmp = TempDir::new().unwrap();
        let layout = KnowledgeLayout::resolve(tmp.path(), &StoreConfig::default()).unwrap();
        let (report, tree) = scenario();

        let plan = PlanGenerator::new(&layout).generate(&report, &tree).unwrap();
        assert!(plan.validate_dependencies().is_empty());

        let groups = plan.get_parallel_execution_groups().unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(ids(&groups[0]), vec!["analyze:a.py", "analyze:sub/c.py", "skip:b.py"]);
        assert_eq!(ids(&groups[1]), vec!["summarize-dir:sub"]);
        assert_eq!(ids(&groups[2]), vec!["summarize-dir:."]);

        let root = plan.task("summarize-dir:.").unwrap();
        assert_eq!(root.dependencies(), ["analyze:a.py", "skip:b.py", "summarize-dir:sub"]);
        assert_eq!(root.meta_u64("child_count"), Some(3));
    }

    #[test]
    fn deletions_have_no_dependencies() {
        let tmp = TempDir::new().unwrap();
        let layout = KnowledgeLayout::resolve(tmp.path(), &StoreConfig::default()).unwrap();
        let (mut report, tree) = scenario();
        report.insert_deletion(DeletionDecision::new(
            "old.py",
            PathKind::File,
            DecisionReason::SourceDeleted,
            "gone",
            at(),
            layout.artifact_path("old.py", PathKind::File),
        ));

        let plan = PlanGenerator::new(&layout).generate(&report, &tree).unwrap();
        let delete = plan.task("delete:old.py").unwrap();
        assert!(delete.dependencies().is_empty());
        assert_eq!(delete.meta_bool("is_safe_to_delete"), Some(true));
        assert_eq!(plan.level_of("delete:old.py"), Some(0));
    }

    #[test]
    fn error_decisions_get_no_task_and_block_their_parent() {
        let tmp = TempDir::new().unwrap();
        let layout = KnowledgeLayout::resolve(tmp.path(), &StoreConfig::default()).unwrap();
        let (mut report, tree) = scenario();
        decide(&mut report, "b.py", PathKind::File, DecisionOutcome::Error, DecisionReason::FilesystemError);

        let plan = PlanGenerator::new(&layout).generate(&report, &tree).unwrap();
        assert!(plan.tasks().iter().all(|t| t.target() != "b.py"));
        assert!(plan.task("summarize-dir:.").is_none());
        assert!(plan.task("summarize-dir:sub").is_some());
        assert!(plan.is_valid());
    }

    #[test]
    fn errored_subtree_withholds_every_ancestor_summary() {
        let tmp = TempDir::new().unwrap();
        let layout = KnowledgeLayout::resolve(tmp.path(), &StoreConfig::default()).unwrap();
        let (mut report, tree) = scenario();
        decide(&mut report, "sub/c.py", PathKind::File, DecisionOutcome::Error, DecisionReason::FilesystemError);

        let plan = PlanGenerator::new(&layout).generate(&report, &tree).unwrap();
        assert!(plan.task("summarize-dir:sub").is_none());
        assert!(plan.task("summarize-dir:.").is_none());
        assert!(plan.task("analyze:a.py").is_some());
    }

    #[test]
    fn verify_skipped_swaps_skip_for_verification() {
        let tmp = TempDir::new().unwrap();
        let layout = KnowledgeLayout::resolve(tmp.path(), &StoreConfig::default()).unwrap();
        let (report, tree) = scenario();

        let plan = PlanGenerator::new(&layout).verify_skipped(true).generate(&report, &tree).unwrap();
        assert_eq!(plan.task("verify:b.py").map(|t| t.task_type()), Some(TaskType::VerifyFreshness));
        assert!(plan.task("skip:b.py").is_none());
    }
}
