//! Immutable file and directory contexts discovered by a scan.
//!
//! A `DirectoryContext` owns its children outright and carries no parent
//! reference, so data only ever flows from leaves up to the root. State
//! changes produce new values (`with_status`, `with_statuses`) instead of
//! mutating in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::SkipReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed | ProcessingStatus::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContext {
    path: String,
    size_bytes: u64,
    modified: DateTime<Utc>,
    status: ProcessingStatus,
    skip_reason: Option<SkipReason>,
}

impl FileContext {
    /// A freshly discovered file. Files with a skip reason start out `Skipped`.
    pub fn discovered(
        path: impl Into<String>,
        size_bytes: u64,
        modified: DateTime<Utc>,
        skip_reason: Option<SkipReason>,
    ) -> Self {
        let status =
            if skip_reason.is_some() { ProcessingStatus::Skipped } else { ProcessingStatus::Pending };
        Self { path: path.into(), size_bytes, modified, status, skip_reason }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        self.skip_reason
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    #[must_use]
    pub fn with_status(&self, status: ProcessingStatus) -> Self {
        Self { status, ..self.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryContext {
    path: String,
    files: Vec<FileContext>,
    directories: Vec<DirectoryContext>,
}

impl DirectoryContext {
    /// Children are sorted by path so every traversal is deterministic.
    pub fn new(
        path: impl Into<String>,
        mut files: Vec<FileContext>,
        mut directories: Vec<DirectoryContext>,
    ) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        directories.sort_by(|a, b| a.path.cmp(&b.path));
        Self { path: path.into(), files, directories }
    }

    /// Relative key of this directory; the scan root is `""`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn files(&self) -> &[FileContext] {
        &self.files
    }

    pub fn directories(&self) -> &[DirectoryContext] {
        &self.directories
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.directories.is_empty()
    }

    /// Number of files in this directory and all descendants.
    pub fn total_file_count(&self) -> usize {
        self.files.len() + self.directories.iter().map(|d| d.total_file_count()).sum::<usize>()
    }

    fn terminal_file_count(&self) -> usize {
        self.files.iter().filter(|f| f.status.is_terminal()).count()
            + self.directories.iter().map(|d| d.terminal_file_count()).sum::<usize>()
    }

    /// Share of descendant files in a terminal state, 0–100. Empty trees are complete.
    pub fn completion_percentage(&self) -> f64 {
        let total = self.total_file_count();
        if total == 0 {
            return 100.0;
        }
        self.terminal_file_count() as f64 * 100.0 / total as f64
    }

    /// True only when every descendant file has reached a terminal status.
    pub fn is_ready_for_summary(&self) -> bool {
        self.files.iter().all(|f| f.status.is_terminal())
            && self.directories.iter().all(|d| d.is_ready_for_summary())
    }

    /// Direct children as `(path, is_directory)`, files first.
    pub fn child_paths(&self) -> Vec<(&str, bool)> {
        self.files
            .iter()
            .map(|f| (f.path(), false))
            .chain(self.directories.iter().map(|d| (d.path(), true)))
            .collect()
    }

    /// Every directory in the tree, children before parents.
    pub fn post_order(&self) -> Vec<&DirectoryContext> {
        let mut out = Vec::new();
        self.collect_post_order(&mut out);
        out
    }

    fn collect_post_order<'a>(&'a self, out: &mut Vec<&'a DirectoryContext>) {
        for dir in &self.directories {
            dir.collect_post_order(out);
        }
        out.push(self);
    }

    /// Every file in the tree, in path order within each directory.
    pub fn all_files(&self) -> Vec<&FileContext> {
        let mut out: Vec<&FileContext> = self.files.iter().collect();
        for dir in &self.directories {
            out.extend(dir.all_files());
        }
        out
    }

    pub fn find_directory(&self, path: &str) -> Option<&DirectoryContext> {
        if self.path == path {
            return Some(self);
        }
        self.directories.iter().find_map(|d| d.find_directory(path))
    }

    pub fn find_file(&self, path: &str) -> Option<&FileContext> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .or_else(|| self.directories.iter().find_map(|d| d.find_file(path)))
    }

    /// A copy of this tree with file statuses replaced where `status_of` answers.
    #[must_use]
    pub fn with_statuses(&self, status_of: &dyn Fn(&str) -> Option<ProcessingStatus>) -> Self {
        Self {
            path: self.path.clone(),
            files: self
                .files
                .iter()
                .map(|f| match status_of(f.path()) {
                    Some(status) => f.with_status(status),
                    None => f.clone(),
                })
                .collect(),
            directories: self.directories.iter().map(|d| d.with_statuses(status_of)).collect(),
        }
    }
}
