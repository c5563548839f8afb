//! Run-level progress counters and the bounded error log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;

use super::IndexingMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Queued,
    Scanning,
    Deciding,
    Planning,
    Executing,
    Completed,
    Cancelled,
    Failed,
}

impl RunPhase {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Cancelled | RunPhase::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub discovered: usize,
    pub planned: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ProcessingStats {
    pub fn settled(&self) -> usize {
        self.completed + self.failed + self.skipped
    }
}

/// Point-in-time view of one indexing run.
///
/// The error log is a ring buffer: once `max_errors` entries are held the
/// oldest entry is dropped and counted in `dropped_errors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingStatus {
    pub run_id: String,
    pub root: PathBuf,
    pub mode: IndexingMode,
    pub phase: RunPhase,
    pub stats: ProcessingStats,
    pub errors: VecDeque<String>,
    pub dropped_errors: usize,
    pub max_errors: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl IndexingStatus {
    pub fn new(
        run_id: impl Into<String>,
        root: PathBuf,
        mode: IndexingMode,
        max_errors: usize,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            root,
            mode,
            phase: RunPhase::Queued,
            stats: ProcessingStats::default(),
            errors: VecDeque::new(),
            dropped_errors: 0,
            max_errors,
            started_at,
            finished_at: None,
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.max_errors == 0 {
            self.dropped_errors += 1;
            return;
        }
        if self.errors.len() == self.max_errors {
            self.errors.pop_front();
            self.dropped_errors += 1;
        }
        self.errors.push_back(message.into());
    }

    pub fn total_errors(&self) -> usize {
        self.errors.len() + self.dropped_errors
    }

    /// Move to `phase`. The first finishing phase stamps `finished_at` with `at`.
    pub fn set_phase(&mut self, phase: RunPhase, at: DateTime<Utc>) {
        self.phase = phase;
        if phase.is_finished() && self.finished_at.is_none() {
            self.finished_at = Some(at);
        }
    }
}
