//! Background indexing runs: trigger, poll, cancel, wait.

use super::pipeline::{build_conversations, build_plan, preview_plan, resolve_layout, scan_changes};
use crate::decide::DecisionEngine;
use crate::domain::{
    AtomicTask, Config, ExecutionResults, IndexingMode, IndexingStatus, RunPhase, TaskOutcome,
    TaskType,
};
use crate::error::{KnowledgeError, Result};
use crate::execute::{CancellationToken, ExecutionEngine, ExecutionObserver};
use crate::llm::Summarizer;
use crate::store::{write_json_atomic, KnowledgeLayout};
use crate::utils::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// What a finished run leaves behind in `_runs/<run_id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub status: IndexingStatus,
    pub knowledge_root: Option<PathBuf>,
    /// Decision counts keyed by outcome label.
    pub decisions: BTreeMap<String, usize>,
    pub results: Option<ExecutionResults>,
}

struct RunHandle {
    status: Arc<Mutex<IndexingStatus>>,
    cancel: CancellationToken,
    record: Arc<Mutex<Option<RunRecord>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Operation surface over the pipeline. Runs execute on their own thread;
/// callers poll [`IndexService::get_status`] or block on [`IndexService::wait`].
pub struct IndexService {
    config: Config,
    clock: Arc<dyn Clock>,
    summarizer: Option<Arc<dyn Summarizer>>,
    runs: Mutex<HashMap<String, Arc<RunHandle>>>,
}

impl IndexService {
    pub fn new(config: Config) -> Self {
        Self { config, clock: Arc::new(SystemClock), summarizer: None, runs: Mutex::new(HashMap::new()) }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use this summarizer instead of the one `llm.provider` selects.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start indexing `root` in the background and return the run id.
    pub fn trigger_index(&self, root: &Path, mode: IndexingMode) -> Result<String> {
        let layout = resolve_layout(root, &self.config)?;
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let status = Arc::new(Mutex::new(IndexingStatus::new(
            run_id.clone(),
            layout.source_root().to_path_buf(),
            mode,
            self.config.status.max_errors,
            self.clock.now(),
        )));
        let cancel = CancellationToken::new();
        let record = Arc::new(Mutex::new(None));

        let job = RunJob {
            run_id: run_id.clone(),
            mode,
            layout,
            config: self.config.clone(),
            clock: self.clock.clone(),
            summarizer: self.summarizer.clone(),
            status: status.clone(),
            cancel: cancel.clone(),
            record: record.clone(),
        };
        let thread = std::thread::Builder::new()
            .name(format!("index-{}", &run_id[..8]))
            .spawn(move || job.run())?;

        let handle = RunHandle { status, cancel, record, thread: Mutex::new(Some(thread)) };
        lock(&self.runs).insert(run_id.clone(), Arc::new(handle));
        info!(run_id = %run_id, root = %root.display(), %mode, "indexing run started");
        Ok(run_id)
    }

    fn handle(&self, run_id: &str) -> Result<Arc<RunHandle>> {
        lock(&self.runs)
            .get(run_id)
            .cloned()
            .ok_or_else(|| KnowledgeError::UnknownRun(run_id.to_string()))
    }

    /// Point-in-time copy of a run's status.
    pub fn get_status(&self, run_id: &str) -> Result<IndexingStatus> {
        Ok(lock(&self.handle(run_id)?.status).clone())
    }

    /// Stop dispatching new tasks for a run. Tasks already running finish.
    pub fn cancel(&self, run_id: &str) -> Result<()> {
        self.handle(run_id)?.cancel.cancel();
        info!(run_id = %run_id, "cancellation requested");
        Ok(())
    }

    /// Block until a run finishes and return its record.
    pub fn wait(&self, run_id: &str) -> Result<RunRecord> {
        let handle = self.handle(run_id)?;
        let thread = lock(&handle.thread).take();
        if let Some(thread) = thread {
            thread
                .join()
                .map_err(|_| KnowledgeError::Other(format!("run {run_id} panicked")))?;
        }
        let record = lock(&handle.record).clone();
        Ok(record.unwrap_or_else(|| RunRecord {
            status: lock(&handle.status).clone(),
            knowledge_root: None,
            decisions: BTreeMap::new(),
            results: None,
        }))
    }

    pub fn preview_plan(&self, root: &Path, mode: IndexingMode) -> Result<String> {
        preview_plan(root, mode, &self.config, self.clock.now())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Load a persisted run record; the most recent one when `run_id` is `None`.
pub fn load_run_record(layout: &KnowledgeLayout, run_id: Option<&str>) -> Result<RunRecord> {
    let read = |path: &Path| -> Result<RunRecord> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    };
    if let Some(id) = run_id {
        let path = layout.run_record_path(id);
        if !path.exists() {
            return Err(KnowledgeError::UnknownRun(id.to_string()));
        }
        return read(&path);
    }

    let runs_dir = layout.runs_dir();
    let mut latest: Option<RunRecord> = None;
    if runs_dir.is_dir() {
        for entry in fs::read_dir(&runs_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read(&path) {
                Ok(record) => {
                    if latest.as_ref().map_or(true, |l| record.status.started_at > l.status.started_at) {
                        latest = Some(record);
                    }
                }
                Err(e) => warn!(path = %path.display(), "skipping unreadable run record: {e}"),
            }
        }
    }
    latest.ok_or_else(|| KnowledgeError::UnknownRun(format!("no runs recorded under {}", runs_dir.display())))
}

/// Keeps the shared status in step with the execution engine.
struct StatusObserver {
    status: Arc<Mutex<IndexingStatus>>,
}

impl ExecutionObserver for StatusObserver {
    fn task_settled(&self, task: &AtomicTask, outcome: &TaskOutcome) {
        let mut status = lock(&self.status);
        match outcome {
            TaskOutcome::Completed if task.task_type() == TaskType::Skip => status.stats.skipped += 1,
            TaskOutcome::Completed => status.stats.completed += 1,
            TaskOutcome::Failed { reason, .. } => {
                status.stats.failed += 1;
                status.record_error(format!("{}: {reason}", task.target()));
            }
            TaskOutcome::SkippedDependency { .. } => status.stats.skipped += 1,
            TaskOutcome::Cancelled => {}
        }
    }
}

struct RunJob {
    run_id: String,
    mode: IndexingMode,
    layout: KnowledgeLayout,
    config: Config,
    clock: Arc<dyn Clock>,
    summarizer: Option<Arc<dyn Summarizer>>,
    status: Arc<Mutex<IndexingStatus>>,
    cancel: CancellationToken,
    record: Arc<Mutex<Option<RunRecord>>>,
}

impl RunJob {
    fn set_phase(&self, phase: RunPhase) {
        lock(&self.status).set_phase(phase, self.clock.now());
    }

    fn run(self) {
        let mut record = RunRecord {
            status: lock(&self.status).clone(),
            knowledge_root: Some(self.layout.knowledge_root().to_path_buf()),
            decisions: BTreeMap::new(),
            results: None,
        };

        if let Err(e) = self.execute(&mut record) {
            error!(run_id = %self.run_id, "indexing run failed: {e}");
            let mut status = lock(&self.status);
            status.record_error(e.to_string());
            status.set_phase(RunPhase::Failed, self.clock.now());
        }

        record.status = lock(&self.status).clone();
        if let Err(e) = write_json_atomic(&self.layout.run_record_path(&self.run_id), &record) {
            warn!(run_id = %self.run_id, "could not persist run record: {e}");
        }
        *lock(&self.record) = Some(record);
    }

    fn execute(&self, record: &mut RunRecord) -> Result<()> {
        self.set_phase(RunPhase::Scanning);
        let changes = scan_changes(&self.layout, &self.config, self.clock.now())?;
        {
            let mut status = lock(&self.status);
            status.stats.discovered = changes.tree.total_file_count();
            if !changes.has_changes() {
                info!(run_id = %self.run_id, "no source changes detected");
            }
            for e in &changes.errors {
                status.record_error(format!("{}: {}", e.path, e.message));
            }
        }

        self.set_phase(RunPhase::Deciding);
        let report = DecisionEngine::new(self.mode).decide(&changes);
        record.decisions = report
            .counts_by_outcome()
            .into_iter()
            .map(|(outcome, n)| (outcome.as_str().to_string(), n))
            .collect();
        {
            let mut status = lock(&self.status);
            // Classification errors were already logged during the scan.
            for e in report.errors().iter().filter(|e| !changes.errors.iter().any(|c| c.path == e.path)) {
                status.record_error(format!("{}: {}", e.path, e.message));
            }
        }

        self.set_phase(RunPhase::Planning);
        let plan = build_plan(&self.layout, &report, &changes.tree, &self.config)?;
        lock(&self.status).stats.planned = plan.len();

        if self.cancel.is_cancelled() {
            self.set_phase(RunPhase::Cancelled);
            return Ok(());
        }

        self.set_phase(RunPhase::Executing);
        let conversations =
            build_conversations(&self.config, &self.layout, self.summarizer.clone(), self.clock.clone())?;
        let observer = StatusObserver { status: self.status.clone() };
        let results = ExecutionEngine::new(&self.layout, &conversations, &self.config.execution, self.clock.clone())
            .with_cancellation(self.cancel.clone())
            .with_observer(&observer)
            .execute(&plan)?;

        if self.config.cache.enabled && self.config.cache.persist {
            if let Err(e) = conversations.save_cache(&self.layout.prompt_cache_path()) {
                warn!(run_id = %self.run_id, "could not persist prompt cache: {e}");
            }
        }

        let phase = if results.cancelled { RunPhase::Cancelled } else { RunPhase::Completed };
        info!(
            run_id = %self.run_id,
            completed = results.completed().len(),
            failed = results.failed().len(),
            phase = ?phase,
            "indexing run finished"
        );
        record.results = Some(results);
        self.set_phase(phase);
        Ok(())
    }
}
