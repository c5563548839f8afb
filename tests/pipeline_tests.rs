//! Library-level scenarios for the indexing pipeline

use chrono::Utc;
use repo_knowledge::decide::{render_audit, DecisionEngine};
use repo_knowledge::domain::{
    AtomicTask, Config, DecisionOutcome, DecisionReason, IndexingMode, PathKind, RunPhase,
    TaskOutcome, TaskType,
};
use repo_knowledge::execute::ExecutionEngine;
use repo_knowledge::llm::{
    CompletionRequest, CompletionResponse, ConversationManager, LlmError, OfflineSummarizer,
    Summarizer,
};
use repo_knowledge::plan::ExecutionPlan;
use repo_knowledge::service::{analyze, build_plan, resolve_layout, IndexService, RunRecord};
use repo_knowledge::utils::SystemClock;
use repo_knowledge::KnowledgeError;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn index(root: &Path, mode: IndexingMode, config: Config) -> RunRecord {
    let service = IndexService::new(config);
    let run_id = service.trigger_index(root, mode).unwrap();
    service.wait(&run_id).unwrap()
}

fn counters(record: &RunRecord) -> (u64, u64) {
    let c = &record.results.as_ref().unwrap().counters;
    (c.llm_calls, c.cache_hits)
}

#[test]
fn deciding_twice_on_an_unchanged_snapshot_is_identical() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.py", "# A module.\ndef a():\n    return 1\n");
    write(dir.path(), "pkg/b.rs", "//! B.\npub fn b() {}\n");
    index(dir.path(), IndexingMode::Incremental, Config::default());
    write(dir.path(), "pkg/new.rs", "pub fn fresh() {}\n");

    let config = Config::default();
    let now = Utc::now();
    let first = analyze(dir.path(), IndexingMode::Incremental, &config, now).unwrap();
    let second = analyze(dir.path(), IndexingMode::Incremental, &config, now).unwrap();

    similar_asserts::assert_eq!(
        render_audit(&first.report, dir.path()).unwrap(),
        render_audit(&second.report, dir.path()).unwrap()
    );
    let again = DecisionEngine::new(IndexingMode::Incremental).decide(&first.changes);
    similar_asserts::assert_eq!(first.report.outcome_table(), again.outcome_table());
}

#[test]
fn generated_plans_validate_and_cycles_never_execute() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.py", "A = 1\n");
    write(dir.path(), "x/y/z.py", "Z = 1\n");
    let config = Config::default();
    let analysis = analyze(dir.path(), IndexingMode::FullRebuild, &config, Utc::now()).unwrap();
    let plan = build_plan(&analysis.layout, &analysis.report, &analysis.changes.tree, &config).unwrap();
    assert!(plan.is_valid());
    assert_eq!(plan.get_execution_order().unwrap().len(), plan.len());

    let mut cyclic = ExecutionPlan::new();
    for (target, other) in [("one", "skip:two"), ("two", "skip:one")] {
        let task = AtomicTask::builder(TaskType::Skip, target)
            .metadata("reason", "CACHE_FRESH")
            .depends_on(other)
            .build()
            .unwrap();
        cyclic.add_task(task).unwrap();
    }
    assert!(!cyclic.validate_dependencies().is_empty());

    let summarizer = Arc::new(OfflineSummarizer::new(1));
    let conversations = ConversationManager::new(summarizer, &config.llm, &config.memory, Arc::new(SystemClock));
    let engine = ExecutionEngine::new(&analysis.layout, &conversations, &config.execution, Arc::new(SystemClock));
    let err = engine.execute(&cyclic).unwrap_err();
    assert!(matches!(err, KnowledgeError::InvalidPlan(_)));
    assert_eq!(conversations.llm_calls(), 0);
    assert!(!analysis.layout.knowledge_root().exists());
}

#[test]
fn directory_summaries_start_after_their_children_settle() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "top.py", "TOP = 1\n");
    write(dir.path(), "a/one.py", "ONE = 1\n");
    write(dir.path(), "a/b/two.py", "TWO = 2\n");
    write(dir.path(), "a/b/c/three.py", "THREE = 3\n");

    let config = Config::default();
    let analysis = analyze(dir.path(), IndexingMode::Incremental, &config, Utc::now()).unwrap();
    let plan = build_plan(&analysis.layout, &analysis.report, &analysis.changes.tree, &config).unwrap();
    let record = index(dir.path(), IndexingMode::Incremental, config);
    let results = record.results.unwrap();

    for task in plan.tasks().iter().filter(|t| t.task_type() == TaskType::CreateDirectorySummary) {
        assert_eq!(results.outcome(task.id()), Some(&TaskOutcome::Completed), "{}", task.id());
        let started = results.timing(task.id()).unwrap().started_seq;
        for dep in task.dependencies() {
            assert_eq!(results.outcome(dep), Some(&TaskOutcome::Completed));
            assert!(results.timing(dep).unwrap().finished_seq < started, "{dep} before {}", task.id());
        }
    }
}

#[test]
fn identical_prompts_hit_the_cache_and_model_changes_miss() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.py", "# Alpha.\nA = 1\n");
    write(dir.path(), "sub/b.py", "# Beta.\nB = 2\n");

    let first = index(dir.path(), IndexingMode::FullRebuild, Config::default());
    let (calls, hits) = counters(&first);
    assert_eq!(calls, 4);
    assert_eq!(hits, 0);

    let second = index(dir.path(), IndexingMode::FullRebuild, Config::default());
    assert_eq!(counters(&second), (0, 4));

    let mut changed = Config::default();
    changed.llm.temperature = 0.7;
    let third = index(dir.path(), IndexingMode::FullRebuild, changed);
    assert_eq!(counters(&third), (4, 0));
}

struct FailOn {
    inner: OfflineSummarizer,
    path: &'static str,
}

impl Summarizer for FailOn {
    fn name(&self) -> &str {
        "fail-on"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let needle = format!("Path: {}\n", self.path);
        if request.messages.iter().any(|m| m.content.contains(&needle)) {
            return Err(LlmError::InvalidRequest("refusing this file".to_string()));
        }
        self.inner.complete(request)
    }
}

#[test]
fn a_failed_file_skips_only_its_ancestors() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "good.py", "GOOD = 1\n");
    write(dir.path(), "other/fine.py", "FINE = 1\n");
    write(dir.path(), "sub/ok.py", "OK = 1\n");
    write(dir.path(), "sub/bad.py", "BAD = 1\n");

    let service = IndexService::new(Config::default())
        .with_summarizer(Arc::new(FailOn { inner: OfflineSummarizer::new(1), path: "sub/bad.py" }));
    let run_id = service.trigger_index(dir.path(), IndexingMode::Incremental).unwrap();
    let record = service.wait(&run_id).unwrap();
    let results = record.results.as_ref().unwrap();

    assert_eq!(record.status.phase, RunPhase::Completed);
    assert!(matches!(results.outcome("analyze:sub/bad.py"), Some(TaskOutcome::Failed { attempts: 1, .. })));
    assert!(matches!(results.outcome("summarize-dir:sub"), Some(TaskOutcome::SkippedDependency { .. })));
    assert!(matches!(results.outcome("summarize-dir:."), Some(TaskOutcome::SkippedDependency { .. })));
    for id in ["analyze:good.py", "analyze:other/fine.py", "analyze:sub/ok.py", "summarize-dir:other"] {
        assert_eq!(results.outcome(id), Some(&TaskOutcome::Completed), "{id}");
    }
    let failed = results.failed_paths();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, "sub/bad.py");
    assert!(failed[0].1.contains("refusing this file"));
    assert_eq!(record.status.stats.failed, 1);

    let layout = resolve_layout(dir.path(), service.config()).unwrap();
    assert!(layout.artifact_path("other", PathKind::Directory).exists());
    assert!(!layout.artifact_path("sub", PathKind::Directory).exists());
}

#[test]
fn incremental_run_rebuilds_only_the_changed_branch() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "b.py", "# Unchanged.\nB = 1\n");
    write(dir.path(), "sub/c.py", "# Original.\nC = 1\n");
    index(dir.path(), IndexingMode::Incremental, Config::default());

    write(dir.path(), "a.py", "# Brand new.\nA = 1\n");
    write(dir.path(), "sub/c.py", "# Rewritten with more content.\nC = 2\nD = 3\n");

    let config = Config::default();
    let analysis = analyze(dir.path(), IndexingMode::Incremental, &config, Utc::now()).unwrap();
    let report = &analysis.report;
    let expect = |path: &str, outcome: DecisionOutcome, reason: DecisionReason| {
        let decision = report.decision(path).unwrap_or_else(|| panic!("no decision for {path:?}"));
        assert_eq!((decision.outcome(), decision.reason()), (outcome, reason), "{path:?}");
    };
    expect("a.py", DecisionOutcome::Rebuild, DecisionReason::NewSource);
    expect("b.py", DecisionOutcome::Skip, DecisionReason::CacheFresh);
    expect("sub/c.py", DecisionOutcome::Rebuild, DecisionReason::CacheStale);
    expect("sub", DecisionOutcome::Rebuild, DecisionReason::ChildChanged);
    expect("", DecisionOutcome::Rebuild, DecisionReason::ChildChanged);

    let plan = build_plan(&analysis.layout, report, &analysis.changes.tree, &config).unwrap();
    let level = |id: &str| plan.level_of(id).unwrap_or_else(|| panic!("no task {id}"));
    assert_eq!(level("analyze:a.py"), 0);
    assert_eq!(level("analyze:sub/c.py"), 0);
    assert_eq!(level("summarize-dir:sub"), 1);
    assert_eq!(level("summarize-dir:."), 2);
    assert!(plan.task("analyze:b.py").is_none());

    let record = index(dir.path(), IndexingMode::Incremental, config);
    let results = record.results.unwrap();
    assert!(results.is_success());
    assert_eq!(results.counters.files_processed, 2);
    assert_eq!(results.counters.directories_summarized, 2);
}

#[test]
fn orphaned_artifact_is_deleted_and_nothing_else_is_touched() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "old.py", "OLD = 1\n");
    write(dir.path(), "keep.py", "KEEP = 1\n");
    index(dir.path(), IndexingMode::Incremental, Config::default());

    let layout = resolve_layout(dir.path(), &Config::default()).unwrap();
    let old_artifact = layout.artifact_path("old.py", PathKind::File);
    let keep_artifact = layout.artifact_path("keep.py", PathKind::File);
    assert!(old_artifact.exists());
    let keep_before = fs::read_to_string(&keep_artifact).unwrap();

    fs::remove_file(dir.path().join("old.py")).unwrap();
    let config = Config::default();
    let analysis = analyze(dir.path(), IndexingMode::Incremental, &config, Utc::now()).unwrap();
    let deletion = analysis.report.deletion("old.py").unwrap();
    assert_eq!(deletion.outcome(), DecisionOutcome::Delete);
    assert_eq!(deletion.reason(), DecisionReason::SourceDeleted);
    assert!(deletion.is_safe_to_delete());

    let record = index(dir.path(), IndexingMode::Incremental, config);
    let results = record.results.unwrap();
    assert_eq!(results.outcome("delete:old.py"), Some(&TaskOutcome::Completed));
    assert_eq!(results.counters.artifacts_deleted, 1);
    assert!(!old_artifact.exists());
    assert_eq!(fs::read_to_string(&keep_artifact).unwrap(), keep_before);
}
