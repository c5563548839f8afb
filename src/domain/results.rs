//! Per-run execution results and performance counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::ProcessingStatus;

/// Final state of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed { reason: String, attempts: u32 },
    /// Not attempted because a prerequisite failed or was itself skipped.
    SkippedDependency { dependency: String },
    /// Not dispatched because the run was cancelled.
    Cancelled,
}

impl TaskOutcome {
    pub fn as_status(&self) -> ProcessingStatus {
        match self {
            TaskOutcome::Completed => ProcessingStatus::Completed,
            TaskOutcome::Failed { .. } => ProcessingStatus::Failed,
            TaskOutcome::SkippedDependency { .. } | TaskOutcome::Cancelled => {
                ProcessingStatus::Skipped
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }
}

/// Dispatch bookkeeping. Sequence numbers come from one counter shared by
/// the whole run, so `started_seq`/`finished_seq` order events across tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTiming {
    pub started_seq: u64,
    pub finished_seq: u64,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub target: String,
    pub reason: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounters {
    pub llm_calls: u64,
    pub cache_hits: u64,
    pub files_processed: u64,
    pub directories_summarized: u64,
    pub artifacts_written: u64,
    pub artifacts_deleted: u64,
    pub retries: u64,
}

/// Accumulator for one execution run.
///
/// Shared between worker threads behind a mutex by the execution engine;
/// everything here is plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResults {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    completed: BTreeSet<String>,
    failed: BTreeMap<String, TaskFailure>,
    skipped: BTreeMap<String, String>,
    not_dispatched: BTreeSet<String>,
    outcomes: BTreeMap<String, TaskOutcome>,
    targets: BTreeMap<String, String>,
    timings: BTreeMap<String, TaskTiming>,
    pub counters: ExecutionCounters,
}

impl ExecutionResults {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            cancelled: false,
            completed: BTreeSet::new(),
            failed: BTreeMap::new(),
            skipped: BTreeMap::new(),
            not_dispatched: BTreeSet::new(),
            outcomes: BTreeMap::new(),
            targets: BTreeMap::new(),
            timings: BTreeMap::new(),
            counters: ExecutionCounters::default(),
        }
    }

    pub fn record_completed(&mut self, task_id: &str, target: &str, timing: TaskTiming) {
        self.completed.insert(task_id.to_string());
        self.timings.insert(task_id.to_string(), timing);
        self.set_outcome(task_id, target, TaskOutcome::Completed);
    }

    pub fn record_failed(&mut self, task_id: &str, target: &str, reason: impl Into<String>, timing: TaskTiming) {
        let reason = reason.into();
        self.failed.insert(
            task_id.to_string(),
            TaskFailure { target: target.to_string(), reason: reason.clone(), attempts: timing.attempts },
        );
        self.timings.insert(task_id.to_string(), timing);
        self.set_outcome(task_id, target, TaskOutcome::Failed { reason, attempts: timing.attempts });
    }

    pub fn record_skipped_dependency(&mut self, task_id: &str, target: &str, dependency: &str) {
        self.skipped.insert(task_id.to_string(), dependency.to_string());
        self.set_outcome(
            task_id,
            target,
            TaskOutcome::SkippedDependency { dependency: dependency.to_string() },
        );
    }

    pub fn record_cancelled(&mut self, task_id: &str, target: &str) {
        self.not_dispatched.insert(task_id.to_string());
        self.set_outcome(task_id, target, TaskOutcome::Cancelled);
    }

    fn set_outcome(&mut self, task_id: &str, target: &str, outcome: TaskOutcome) {
        self.targets.insert(task_id.to_string(), target.to_string());
        self.outcomes.insert(task_id.to_string(), outcome);
    }

    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.finished_at = Some(at);
    }

    pub fn outcome(&self, task_id: &str) -> Option<&TaskOutcome> {
        self.outcomes.get(task_id)
    }

    pub fn outcomes(&self) -> &BTreeMap<String, TaskOutcome> {
        &self.outcomes
    }

    pub fn timing(&self, task_id: &str) -> Option<&TaskTiming> {
        self.timings.get(task_id)
    }

    pub fn completed(&self) -> &BTreeSet<String> {
        &self.completed
    }

    pub fn failed(&self) -> &BTreeMap<String, TaskFailure> {
        &self.failed
    }

    /// Tasks skipped because of a failed prerequisite, with that prerequisite.
    pub fn skipped(&self) -> &BTreeMap<String, String> {
        &self.skipped
    }

    pub fn not_dispatched(&self) -> &BTreeSet<String> {
        &self.not_dispatched
    }

    /// Target path of a recorded task.
    pub fn target_of(&self, task_id: &str) -> Option<&str> {
        self.targets.get(task_id).map(String::as_str)
    }

    /// Failed source paths with their reasons, sorted by path.
    pub fn failed_paths(&self) -> Vec<(&str, &str)> {
        let mut rows: Vec<(&str, &str)> =
            self.failed.values().map(|f| (f.target.as_str(), f.reason.as_str())).collect();
        rows.sort();
        rows
    }

    pub fn settled_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled
    }

    pub fn elapsed_ms(&self) -> Option<i64> {
        self.finished_at.map(|end| (end - self.started_at).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(seq: u64) -> TaskTiming {
        TaskTiming { started_seq: seq, finished_seq: seq + 1, attempts: 1, elapsed_ms: 3 }
    }

    #[test]
    fn outcomes_are_tracked_per_task() {
        let mut results = ExecutionResults::new(Utc::now());
        results.record_completed("analyze:a.py", "a.py", timing(0));
        results.record_failed("analyze:b.py", "b.py", "provider unavailable", timing(2));
        results.record_skipped_dependency("summarize-dir:.", "", "analyze:b.py");

        assert!(results.completed().contains("analyze:a.py"));
        assert_eq!(results.failed_paths(), vec![("b.py", "provider unavailable")]);
        assert_eq!(
            results.outcome("summarize-dir:.").map(TaskOutcome::as_status),
            Some(ProcessingStatus::Skipped)
        );
        assert_eq!(results.settled_count(), 3);
        assert!(!results.is_success());
    }

    #[test]
    fn cancelled_tasks_are_not_failures() {
        let mut results = ExecutionResults::new(Utc::now());
        results.record_cancelled("analyze:a.py", "a.py");
        assert!(results.failed().is_empty());
        assert!(results.not_dispatched().contains("analyze:a.py"));
    }
}
