//! Decision records and the per-run decision report.
//!
//! Decisions are write-once audit records: they are built in full, handed to
//! the report, and only ever read afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::{IndexingMode, PathKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    Rebuild,
    Skip,
    Delete,
    Create,
    Error,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Rebuild => "REBUILD",
            DecisionOutcome::Skip => "SKIP",
            DecisionOutcome::Delete => "DELETE",
            DecisionOutcome::Create => "CREATE",
            DecisionOutcome::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    NewSource,
    CacheStale,
    CacheFresh,
    ChildChanged,
    StructureChanged,
    ForcedRebuild,
    FullModeRefresh,
    SourceMoved,
    SourceDeleted,
    OrphanedAnalysisCache,
    AmbiguousOrphan,
    UnsupportedContent,
    FilesystemError,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::NewSource => "NEW_SOURCE",
            DecisionReason::CacheStale => "CACHE_STALE",
            DecisionReason::CacheFresh => "CACHE_FRESH",
            DecisionReason::ChildChanged => "CHILD_CHANGED",
            DecisionReason::StructureChanged => "STRUCTURE_CHANGED",
            DecisionReason::ForcedRebuild => "FORCED_REBUILD",
            DecisionReason::FullModeRefresh => "FULL_MODE_REFRESH",
            DecisionReason::SourceMoved => "SOURCE_MOVED",
            DecisionReason::SourceDeleted => "SOURCE_DELETED",
            DecisionReason::OrphanedAnalysisCache => "ORPHANED_ANALYSIS_CACHE",
            DecisionReason::AmbiguousOrphan => "AMBIGUOUS_ORPHAN",
            DecisionReason::UnsupportedContent => "UNSUPPORTED_CONTENT",
            DecisionReason::FilesystemError => "FILESYSTEM_ERROR",
        }
    }
}

/// Outcome for a source path that still exists (or errored while being read).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebuildDecision {
    path: String,
    kind: PathKind,
    outcome: DecisionOutcome,
    reason: DecisionReason,
    reasoning: String,
    timestamp: DateTime<Utc>,
    metadata: BTreeMap<String, Value>,
}

impl RebuildDecision {
    pub fn new(
        path: impl Into<String>,
        kind: PathKind,
        outcome: DecisionOutcome,
        reason: DecisionReason,
        reasoning: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            path: path.into(),
            kind,
            outcome,
            reason,
            reasoning: reasoning.into(),
            timestamp,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    pub fn outcome(&self) -> DecisionOutcome {
        self.outcome
    }

    pub fn reason(&self) -> DecisionReason {
        self.reason
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }
}

/// Outcome for an artifact whose source is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionDecision {
    path: String,
    kind: PathKind,
    reason: DecisionReason,
    reasoning: String,
    timestamp: DateTime<Utc>,
    metadata: BTreeMap<String, Value>,
    artifact_path: PathBuf,
    is_safe_to_delete: bool,
    backup_recommended: bool,
}

impl DeletionDecision {
    pub fn new(
        path: impl Into<String>,
        kind: PathKind,
        reason: DecisionReason,
        reasoning: impl Into<String>,
        timestamp: DateTime<Utc>,
        artifact_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            path: path.into(),
            kind,
            reason,
            reasoning: reasoning.into(),
            timestamp,
            metadata: BTreeMap::new(),
            artifact_path: artifact_path.into(),
            is_safe_to_delete: true,
            backup_recommended: false,
        }
    }

    /// Mark the deletion as not provably safe; a backup is then recommended.
    #[must_use]
    pub fn unsafe_to_delete(mut self) -> Self {
        self.is_safe_to_delete = false;
        self.backup_recommended = true;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    pub fn outcome(&self) -> DecisionOutcome {
        DecisionOutcome::Delete
    }

    pub fn reason(&self) -> DecisionReason {
        self.reason
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn is_safe_to_delete(&self) -> bool {
        self.is_safe_to_delete
    }

    pub fn backup_recommended(&self) -> bool {
        self.backup_recommended
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Rebuild(RebuildDecision),
    Deletion(DeletionDecision),
}

impl Decision {
    pub fn path(&self) -> &str {
        match self {
            Decision::Rebuild(d) => d.path(),
            Decision::Deletion(d) => d.path(),
        }
    }

    pub fn outcome(&self) -> DecisionOutcome {
        match self {
            Decision::Rebuild(d) => d.outcome(),
            Decision::Deletion(d) => d.outcome(),
        }
    }
}

/// A problem surfaced during decision making.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionError {
    pub path: String,
    pub reason: DecisionReason,
    pub message: String,
}

/// Every decision of one pass, keyed by path, plus derived path sets.
///
/// The sets are maintained on every insertion so they always agree with the
/// decision maps; re-inserting a path replaces its previous decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionReport {
    mode: IndexingMode,
    generated_at: DateTime<Utc>,
    decisions: BTreeMap<String, RebuildDecision>,
    deletions: BTreeMap<String, DeletionDecision>,
    files_to_rebuild: BTreeSet<String>,
    files_to_delete: BTreeSet<String>,
    directories_to_create: BTreeSet<String>,
    directories_to_rebuild: BTreeSet<String>,
    directories_to_delete: BTreeSet<String>,
    errors: Vec<DecisionError>,
}

impl DecisionReport {
    pub fn new(mode: IndexingMode, generated_at: DateTime<Utc>) -> Self {
        Self {
            mode,
            generated_at,
            decisions: BTreeMap::new(),
            deletions: BTreeMap::new(),
            files_to_rebuild: BTreeSet::new(),
            files_to_delete: BTreeSet::new(),
            directories_to_create: BTreeSet::new(),
            directories_to_rebuild: BTreeSet::new(),
            directories_to_delete: BTreeSet::new(),
            errors: Vec::new(),
        }
    }

    pub fn insert(&mut self, decision: Decision) {
        match decision {
            Decision::Rebuild(d) => self.insert_rebuild(d),
            Decision::Deletion(d) => self.insert_deletion(d),
        }
    }

    pub fn insert_rebuild(&mut self, decision: RebuildDecision) {
        let path = decision.path().to_string();
        if let Some(previous) = self.decisions.remove(&path) {
            self.forget_rebuild(&previous);
        }
        match (decision.kind(), decision.outcome()) {
            (PathKind::File, DecisionOutcome::Rebuild | DecisionOutcome::Create) => {
                self.files_to_rebuild.insert(path.clone());
            }
            (PathKind::Directory, DecisionOutcome::Create) => {
                self.directories_to_create.insert(path.clone());
            }
            (PathKind::Directory, DecisionOutcome::Rebuild) => {
                self.directories_to_rebuild.insert(path.clone());
            }
            (_, DecisionOutcome::Error) => {
                self.errors.push(DecisionError {
                    path: path.clone(),
                    reason: decision.reason(),
                    message: decision.reasoning().to_string(),
                });
            }
            _ => {}
        }
        self.decisions.insert(path, decision);
    }

    pub fn insert_deletion(&mut self, decision: DeletionDecision) {
        let path = decision.path().to_string();
        if let Some(previous) = self.deletions.remove(&path) {
            self.forget_deletion(&previous);
        }
        match decision.kind() {
            PathKind::File => self.files_to_delete.insert(path.clone()),
            PathKind::Directory => self.directories_to_delete.insert(path.clone()),
        };
        if !decision.is_safe_to_delete() {
            self.errors.push(DecisionError {
                path: path.clone(),
                reason: decision.reason(),
                message: format!("unsafe deletion candidate: {}", decision.reasoning()),
            });
        }
        self.deletions.insert(path, decision);
    }

    /// Record a problem that has no path-level decision of its own.
    pub fn push_error(&mut self, error: DecisionError) {
        self.errors.push(error);
    }

    fn forget_rebuild(&mut self, previous: &RebuildDecision) {
        let path = previous.path();
        self.files_to_rebuild.remove(path);
        self.directories_to_create.remove(path);
        self.directories_to_rebuild.remove(path);
        self.errors.retain(|e| !(e.path == path && e.reason == previous.reason()));
    }

    fn forget_deletion(&mut self, previous: &DeletionDecision) {
        let path = previous.path();
        match previous.kind() {
            PathKind::File => self.files_to_delete.remove(path),
            PathKind::Directory => self.directories_to_delete.remove(path),
        };
        self.errors.retain(|e| !(e.path == path && e.reason == previous.reason()));
    }

    pub fn mode(&self) -> IndexingMode {
        self.mode
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn decision(&self, path: &str) -> Option<&RebuildDecision> {
        self.decisions.get(path)
    }

    pub fn deletion(&self, path: &str) -> Option<&DeletionDecision> {
        self.deletions.get(path)
    }

    pub fn decisions(&self) -> impl Iterator<Item = &RebuildDecision> {
        self.decisions.values()
    }

    pub fn deletions(&self) -> impl Iterator<Item = &DeletionDecision> {
        self.deletions.values()
    }

    pub fn files_to_rebuild(&self) -> &BTreeSet<String> {
        &self.files_to_rebuild
    }

    pub fn files_to_delete(&self) -> &BTreeSet<String> {
        &self.files_to_delete
    }

    pub fn directories_to_create(&self) -> &BTreeSet<String> {
        &self.directories_to_create
    }

    pub fn directories_to_rebuild(&self) -> &BTreeSet<String> {
        &self.directories_to_rebuild
    }

    pub fn directories_to_delete(&self) -> &BTreeSet<String> {
        &self.directories_to_delete
    }

    pub fn errors(&self) -> &[DecisionError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.decisions.len() + self.deletions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decision count per outcome, deletions included.
    pub fn counts_by_outcome(&self) -> BTreeMap<DecisionOutcome, usize> {
        let mut counts = BTreeMap::new();
        for outcome in self
            .decisions
            .values()
            .map(RebuildDecision::outcome)
            .chain(self.deletions.values().map(DeletionDecision::outcome))
        {
            *counts.entry(outcome).or_insert(0) += 1;
        }
        counts
    }

    /// Decision count per reason, deletions included.
    pub fn counts_by_reason(&self) -> BTreeMap<DecisionReason, usize> {
        let mut counts = BTreeMap::new();
        for reason in self
            .decisions
            .values()
            .map(RebuildDecision::reason)
            .chain(self.deletions.values().map(DeletionDecision::reason))
        {
            *counts.entry(reason).or_insert(0) += 1;
        }
        counts
    }

    /// `(path, outcome, reason)` for every decision, sorted by path.
    pub fn outcome_table(&self) -> Vec<(String, DecisionOutcome, DecisionReason)> {
        let mut rows: Vec<_> = self
            .decisions
            .values()
            .map(|d| (d.path().to_string(), d.outcome(), d.reason()))
            .chain(self.deletions.values().map(|d| (d.path().to_string(), d.outcome(), d.reason())))
            .collect();
        rows.sort();
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rebuild(path: &str, kind: PathKind, outcome: DecisionOutcome, reason: DecisionReason) -> RebuildDecision {
        RebuildDecision::new(path, kind, outcome, reason, "test", Utc::now())
    }

    #[test]
    fn sets_follow_inserted_decisions() {
        let mut report = DecisionReport::new(IndexingMode::Incremental, Utc::now());
        report.insert_rebuild(rebuild("a.py", PathKind::File, DecisionOutcome::Rebuild, DecisionReason::NewSource));
        report.insert_rebuild(rebuild("sub", PathKind::Directory, DecisionOutcome::Create, DecisionReason::NewSource));
        report.insert_deletion(DeletionDecision::new(
            "old.py",
            PathKind::File,
            DecisionReason::SourceDeleted,
            "gone",
            Utc::now(),
            "/k/old.py.kb.md",
        ));

        assert!(report.files_to_rebuild().contains("a.py"));
        assert!(report.directories_to_create().contains("sub"));
        assert!(report.files_to_delete().contains("old.py"));
        assert_eq!(report.len(), 3);
    }

    #[test]
    fn reinserting_a_path_replaces_set_membership() {
        let mut report = DecisionReport::new(IndexingMode::Incremental, Utc::now());
        report.insert_rebuild(rebuild("a.py", PathKind::File, DecisionOutcome::Rebuild, DecisionReason::CacheStale));
        report.insert_rebuild(rebuild("a.py", PathKind::File, DecisionOutcome::Skip, DecisionReason::CacheFresh));

        assert!(report.files_to_rebuild().is_empty());
        assert_eq!(report.decision("a.py").map(|d| d.outcome()), Some(DecisionOutcome::Skip));
    }

    #[test]
    fn errors_and_unsafe_deletions_are_surfaced() {
        let mut report = DecisionReport::new(IndexingMode::Incremental, Utc::now());
        report.insert_rebuild(rebuild("locked.py", PathKind::File, DecisionOutcome::Error, DecisionReason::FilesystemError));
        report.insert_deletion(
            DeletionDecision::new("odd", PathKind::File, DecisionReason::AmbiguousOrphan, "?", Utc::now(), "/k/odd")
                .unsafe_to_delete(),
        );

        let paths: Vec<&str> = report.errors().iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["locked.py", "odd"]);

        report.insert_rebuild(rebuild("locked.py", PathKind::File, DecisionOutcome::Skip, DecisionReason::CacheFresh));
        assert_eq!(report.errors().len(), 1);
    }

    #[test]
    fn counts_group_by_outcome() {
        let mut report = DecisionReport::new(IndexingMode::Full, Utc::now());
        report.insert_rebuild(rebuild("a", PathKind::File, DecisionOutcome::Skip, DecisionReason::CacheFresh));
        report.insert_rebuild(rebuild("b", PathKind::File, DecisionOutcome::Skip, DecisionReason::CacheFresh));
        report.insert_rebuild(rebuild("", PathKind::Directory, DecisionOutcome::Rebuild, DecisionReason::FullModeRefresh));

        let counts = report.counts_by_outcome();
        assert_eq!(counts.get(&DecisionOutcome::Skip), Some(&2));
        assert_eq!(counts.get(&DecisionOutcome::Rebuild), Some(&1));
    }
}
