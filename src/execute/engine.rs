//! Level-by-level plan execution on a bounded worker pool.

use super::handlers::{run_task, TaskContext, TaskEffect};
use super::{CancellationToken, RetryPolicy};
use crate::domain::{AtomicTask, ExecutionConfig, ExecutionResults, TaskOutcome, TaskTiming};
use crate::error::{KnowledgeError, Result};
use crate::llm::ConversationManager;
use crate::plan::ExecutionPlan;
use crate::store::KnowledgeLayout;
use crate::utils::Clock;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Notified as tasks settle. Called from worker threads.
pub trait ExecutionObserver: Sync {
    fn group_started(&self, _level: usize, _size: usize) {}

    fn task_settled(&self, _task: &AtomicTask, _outcome: &TaskOutcome) {}
}

pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {}

pub struct ExecutionEngine<'a> {
    layout: &'a KnowledgeLayout,
    conversations: &'a ConversationManager,
    config: ExecutionConfig,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    observer: &'a dyn ExecutionObserver,
}

impl<'a> ExecutionEngine<'a> {
    pub fn new(
        layout: &'a KnowledgeLayout,
        conversations: &'a ConversationManager,
        config: &ExecutionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            layout,
            conversations,
            config: config.clone(),
            retry: RetryPolicy::from_config(config),
            clock,
            cancel: CancellationToken::new(),
            observer: &NoopObserver,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: &'a dyn ExecutionObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Run every task of `plan`.
    ///
    /// An invalid plan is rejected before anything runs. Otherwise the run
    /// always yields results: task failures are recorded, never returned.
    pub fn execute(&self, plan: &ExecutionPlan) -> Result<ExecutionResults> {
        let problems = plan.validate_dependencies();
        if !problems.is_empty() {
            return Err(KnowledgeError::InvalidPlan(problems));
        }
        let groups = plan.get_parallel_execution_groups()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_workers.max(1))
            .thread_name(|i| format!("knowledge-worker-{i}"))
            .build()
            .map_err(|e| KnowledgeError::Other(format!("failed to start worker pool: {e}")))?;

        let llm_calls_before = self.conversations.llm_calls();
        let cache_hits_before = self.conversations.cache_hits();
        let results = Mutex::new(ExecutionResults::new(self.clock.now()));
        let sequence = AtomicU64::new(0);
        let ctx = TaskContext {
            layout: self.layout,
            conversations: self.conversations,
            config: &self.config,
            clock: self.clock.as_ref(),
        };

        info!(tasks = plan.len(), levels = groups.len(), workers = self.config.max_workers, "executing plan");
        for (level, group) in groups.iter().enumerate() {
            if self.cancel.is_cancelled() {
                let mut guard = results.lock().unwrap_or_else(|e| e.into_inner());
                for task in groups[level..].iter().flatten() {
                    guard.record_cancelled(task.id(), task.target());
                }
                warn!(level, "run cancelled; remaining tasks not dispatched");
                break;
            }
            debug!(level, size = group.len(), "starting dependency level");
            self.observer.group_started(level, group.len());
            pool.install(|| {
                group.par_iter().for_each(|task| self.dispatch(task, &ctx, &results, &sequence));
            });
        }

        let mut results = results.into_inner().unwrap_or_else(|e| e.into_inner());
        results.counters.llm_calls = self.conversations.llm_calls() - llm_calls_before;
        results.counters.cache_hits = self.conversations.cache_hits() - cache_hits_before;
        results.cancelled = self.cancel.is_cancelled() && !results.not_dispatched().is_empty();
        results.finish(self.clock.now());
        info!(
            completed = results.completed().len(),
            failed = results.failed().len(),
            skipped = results.skipped().len(),
            llm_calls = results.counters.llm_calls,
            "execution finished"
        );
        Ok(results)
    }

    fn dispatch(
        &self,
        task: &AtomicTask,
        ctx: &TaskContext<'_>,
        results: &Mutex<ExecutionResults>,
        sequence: &AtomicU64,
    ) {
        let blocked_by = {
            let guard = results.lock().unwrap_or_else(|e| e.into_inner());
            task.dependencies()
                .iter()
                .find(|dep| !guard.outcome(dep).is_some_and(TaskOutcome::is_completed))
                .cloned()
        };
        if let Some(dependency) = blocked_by {
            debug!(task_id = %task.id(), dependency = %dependency, "prerequisite did not complete");
            self.settle(task, results, |r| r.record_skipped_dependency(task.id(), task.target(), &dependency));
            return;
        }
        if self.cancel.is_cancelled() {
            self.settle(task, results, |r| r.record_cancelled(task.id(), task.target()));
            return;
        }

        let started_seq = sequence.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let attempted = self.retry.run(&self.cancel, |_| run_task(task, ctx));
        let timing = TaskTiming {
            started_seq,
            finished_seq: sequence.fetch_add(1, Ordering::SeqCst),
            attempts: attempted.attempts,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        match attempted.result {
            Ok(effect) => self.settle(task, results, |r| {
                apply_effect(r, &effect);
                r.counters.retries += u64::from(timing.attempts.saturating_sub(1));
                r.record_completed(task.id(), task.target(), timing);
            }),
            Err(e) => {
                warn!(task_id = %task.id(), path = %task.target(), attempts = timing.attempts, "task failed: {e}");
                self.settle(task, results, |r| {
                    r.counters.retries += u64::from(timing.attempts.saturating_sub(1));
                    r.record_failed(task.id(), task.target(), e.to_string(), timing);
                });
            }
        }
    }

    fn settle<F>(&self, task: &AtomicTask, results: &Mutex<ExecutionResults>, record: F)
    where
        F: FnOnce(&mut ExecutionResults),
    {
        let outcome = {
            let mut guard = results.lock().unwrap_or_else(|e| e.into_inner());
            record(&mut guard);
            guard.outcome(task.id()).cloned()
        };
        if let Some(outcome) = outcome {
            self.observer.task_settled(task, &outcome);
        }
    }
}

fn apply_effect(results: &mut ExecutionResults, effect: &TaskEffect) {
    let counters = &mut results.counters;
    match effect {
        TaskEffect::Analyzed { .. } => {
            counters.files_processed += 1;
            counters.artifacts_written += 1;
        }
        TaskEffect::Summarized { .. } => {
            counters.directories_summarized += 1;
            counters.artifacts_written += 1;
        }
        TaskEffect::Deleted { removed, .. } => {
            if *removed {
                counters.artifacts_deleted += 1;
            }
        }
        TaskEffect::Verified | TaskEffect::Skipped => {}
    }
}
