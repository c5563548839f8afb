//! Rebuild decision engine.
//!
//! Turns a [`ChangeSet`] and an [`IndexingMode`] into a [`DecisionReport`]
//! holding exactly one decision per path. Every timestamp comes from the
//! change set, so deciding twice on the same snapshot gives identical output.

use crate::detect::{ChangeSet, Removal};
use crate::domain::{
    ChangeType, DecisionError, DecisionOutcome, DecisionReason, DecisionReport, DeletionDecision,
    DirectoryContext, FileContext, IndexingMode, PathKind, RebuildDecision,
};
use crate::utils::paths::{display_key, parent_key};
use std::collections::BTreeSet;

pub struct DecisionEngine {
    mode: IndexingMode,
}

impl DecisionEngine {
    pub fn new(mode: IndexingMode) -> Self {
        Self { mode }
    }

    pub fn decide(&self, changes: &ChangeSet) -> DecisionReport {
        let at = changes.scanned_at;
        let mut report = DecisionReport::new(self.mode, at);

        let errored: BTreeSet<&str> = changes.errors.iter().map(|e| e.path.as_str()).collect();
        for error in &changes.errors {
            if error.path.is_empty() {
                report.push_error(DecisionError {
                    path: String::new(),
                    reason: DecisionReason::FilesystemError,
                    message: error.message.clone(),
                });
                continue;
            }
            let kind = if changes.tree.find_directory(&error.path).is_some() {
                PathKind::Directory
            } else {
                PathKind::File
            };
            report.insert_rebuild(RebuildDecision::new(
                error.path.as_str(),
                kind,
                DecisionOutcome::Error,
                DecisionReason::FilesystemError,
                error.message.as_str(),
                at,
            ));
        }

        for file in changes.tree.all_files() {
            if errored.contains(file.path()) {
                continue;
            }
            report.insert_rebuild(self.decide_file(file, changes));
        }

        for removed in &changes.removed {
            let decision = match &removed.removal {
                Removal::Deleted => DeletionDecision::new(
                    removed.source_key.as_str(),
                    removed.kind,
                    DecisionReason::SourceDeleted,
                    "source no longer exists",
                    at,
                    removed.artifact_path.clone(),
                ),
                Removal::MovedTo { path } => DeletionDecision::new(
                    removed.source_key.as_str(),
                    removed.kind,
                    DecisionReason::SourceMoved,
                    format!("source moved to {path}"),
                    at,
                    removed.artifact_path.clone(),
                )
                .with_metadata("moved_to", path.as_str()),
                Removal::Excluded => DeletionDecision::new(
                    removed.source_key.as_str(),
                    removed.kind,
                    DecisionReason::OrphanedAnalysisCache,
                    "source exists but is no longer indexed",
                    at,
                    removed.artifact_path.clone(),
                ),
                Removal::Ambiguous { detail } => DeletionDecision::new(
                    removed.source_key.as_str(),
                    removed.kind,
                    DecisionReason::AmbiguousOrphan,
                    detail.as_str(),
                    at,
                    removed.artifact_path.clone(),
                )
                .unsafe_to_delete(),
            };
            report.insert_deletion(decision);
        }

        for dir in changes.tree.post_order() {
            if errored.contains(dir.path()) && !dir.path().is_empty() {
                continue;
            }
            let decision = self.decide_directory(dir, changes, &report);
            report.insert_rebuild(decision);
        }

        tracing::info!(
            mode = %self.mode,
            decisions = report.len(),
            errors = report.errors().len(),
            "decisions complete"
        );
        report
    }

    fn decide_file(&self, file: &FileContext, changes: &ChangeSet) -> RebuildDecision {
        let at = changes.scanned_at;
        let path = file.path();
        let decision = |outcome, reason, reasoning: String| {
            RebuildDecision::new(path, PathKind::File, outcome, reason, reasoning, at)
                .with_metadata("file_size", file.size_bytes())
                .with_metadata("last_modified", file.modified().to_rfc3339())
        };

        if let Some(skip) = file.skip_reason() {
            return decision(
                DecisionOutcome::Skip,
                DecisionReason::UnsupportedContent,
                format!("not summarized: {}", skip.as_str()),
            )
            .with_metadata("skip_reason", skip.as_str());
        }
        if self.mode == IndexingMode::FullRebuild {
            return decision(
                DecisionOutcome::Rebuild,
                DecisionReason::ForcedRebuild,
                "full rebuild requested".to_string(),
            );
        }

        let change = changes.files.get(path).and_then(|p| p.change.as_ref());
        match change.map(|c| c.change_type()) {
            None => decision(
                DecisionOutcome::Skip,
                DecisionReason::CacheFresh,
                "artifact is newer than source".to_string(),
            ),
            Some(ChangeType::New) => decision(
                DecisionOutcome::Rebuild,
                DecisionReason::NewSource,
                "no artifact exists".to_string(),
            ),
            Some(ChangeType::Modified) => decision(
                DecisionOutcome::Rebuild,
                DecisionReason::CacheStale,
                "source changed since the artifact was built".to_string(),
            ),
            Some(ChangeType::Moved) => {
                let from = change.and_then(|c| c.moved_from()).unwrap_or_default();
                decision(
                    DecisionOutcome::Rebuild,
                    DecisionReason::SourceMoved,
                    format!("moved from {from}"),
                )
                .with_metadata("moved_from", from)
            }
            // Deleted sources are never in the scanned tree.
            Some(ChangeType::Deleted) => decision(
                DecisionOutcome::Error,
                DecisionReason::FilesystemError,
                "scanned file classified as deleted".to_string(),
            ),
        }
    }

    fn decide_directory(
        &self,
        dir: &DirectoryContext,
        changes: &ChangeSet,
        report: &DecisionReport,
    ) -> RebuildDecision {
        let key = dir.path();
        let change = changes.directories.get(key).and_then(|p| p.change_type());
        let decision = |outcome, reason, reasoning: String| {
            RebuildDecision::new(key, PathKind::Directory, outcome, reason, reasoning, changes.scanned_at)
                .with_metadata("child_count", dir.child_paths().len())
        };

        let mut unreadable: BTreeSet<&str> = dir
            .child_paths()
            .into_iter()
            .filter(|(path, _)| report.decision(path).is_some_and(|d| d.outcome() == DecisionOutcome::Error))
            .map(|(path, _)| path)
            .collect();
        unreadable.extend(
            changes
                .errors
                .iter()
                .map(|e| e.path.as_str())
                .filter(|path| parent_key(path) == Some(key)),
        );
        if !unreadable.is_empty() {
            let listed: Vec<&str> = unreadable.into_iter().collect();
            return decision(
                DecisionOutcome::Error,
                DecisionReason::FilesystemError,
                format!("children could not be read: {}", listed.join(", ")),
            );
        }

        if change == Some(ChangeType::New) {
            let reason =
                if self.mode == IndexingMode::FullRebuild { DecisionReason::ForcedRebuild } else { DecisionReason::NewSource };
            return decision(DecisionOutcome::Create, reason, "no directory summary exists".to_string());
        }
        match self.mode {
            IndexingMode::FullRebuild => {
                return decision(
                    DecisionOutcome::Rebuild,
                    DecisionReason::ForcedRebuild,
                    "full rebuild requested".to_string(),
                )
            }
            IndexingMode::Full => {
                return decision(
                    DecisionOutcome::Rebuild,
                    DecisionReason::FullModeRefresh,
                    "full mode regenerates every directory summary".to_string(),
                )
            }
            IndexingMode::Incremental => {}
        }

        let changed_children: Vec<&str> = dir
            .child_paths()
            .into_iter()
            .filter(|(path, _)| {
                report.decision(path).is_some_and(|d| d.outcome() != DecisionOutcome::Skip)
            })
            .map(|(path, _)| path)
            .chain(
                changes
                    .removed
                    .iter()
                    .filter(|r| parent_key(&r.source_key) == Some(key))
                    .map(|r| r.source_key.as_str()),
            )
            .collect();

        match change {
            None => decision(
                DecisionOutcome::Skip,
                DecisionReason::CacheFresh,
                "no descendant changed".to_string(),
            ),
            Some(_) if !changed_children.is_empty() => decision(
                DecisionOutcome::Rebuild,
                DecisionReason::ChildChanged,
                format!("changed children: {}", changed_children.join(", ")),
            ),
            Some(_) if changes.directories.get(key).is_some_and(|p| p.header.is_some()) => decision(
                DecisionOutcome::Rebuild,
                DecisionReason::StructureChanged,
                format!("children of {} differ from the recorded set", display_key(key)),
            ),
            Some(_) => decision(
                DecisionOutcome::Rebuild,
                DecisionReason::CacheStale,
                "directory summary is unreadable".to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ClassificationError, PathChange, RemovedArtifact};
    use crate::domain::ChangeInfo;
    use crate::scan::build_tree;
    use crate::store::ArtifactHeader;
    use chrono::{DateTime, Utc};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn at() -> DateTime<Utc> {
        "2024-06-01T12:00:00Z".parse().unwrap()
    }

    fn header(key: &str, kind: PathKind) -> ArtifactHeader {
        ArtifactHeader {
            source: key.into(),
            kind,
            built_at: at(),
            source_modified: at(),
            source_size: 1,
            source_hash: None,
            children: vec![],
            model_config: "m".into(),
        }
    }

    fn change(key: &str, kind: PathKind, t: Option<ChangeType>) -> PathChange {
        PathChange {
            change: t.map(|t| ChangeInfo::new(key, kind, t, at())),
            header: (t != Some(ChangeType::New)).then(|| header(key, kind)),
        }
    }

    /// a.py new, b.py fresh, sub/c.py modified.
    fn scenario() -> ChangeSet {
        let files = ["a.py", "b.py", "sub/c.py"]
            .iter()
            .map(|p| FileContext::discovered(*p, 10, at(), None))
            .collect();
        let mut file_changes = BTreeMap::new();
        file_changes.insert("a.py".to_string(), change("a.py", PathKind::File, Some(ChangeType::New)));
        file_changes.insert("b.py".to_string(), change("b.py", PathKind::File, None));
        file_changes.insert("sub/c.py".to_string(), change("sub/c.py", PathKind::File, Some(ChangeType::Modified)));
        let mut dirs = BTreeMap::new();
        dirs.insert("sub".to_string(), change("sub", PathKind::Directory, Some(ChangeType::Modified)));
        dirs.insert(String::new(), change("", PathKind::Directory, Some(ChangeType::Modified)));
        ChangeSet {
            scanned_at: at(),
            tree: build_tree(files),
            files: file_changes,
            directories: dirs,
            removed: vec![],
            errors: vec![],
        }
    }

    fn outcome(report: &DecisionReport, path: &str) -> (DecisionOutcome, DecisionReason) {
        let d = report.decision(path).unwrap();
        (d.outcome(), d.reason())
    }

    #[test]
    fn incremental_scenario() {
        let report = DecisionEngine::new(IndexingMode::Incremental).decide(&scenario());

        assert_eq!(outcome(&report, "a.py"), (DecisionOutcome::Rebuild, DecisionReason::NewSource));
        assert_eq!(outcome(&report, "b.py"), (DecisionOutcome::Skip, DecisionReason::CacheFresh));
        assert_eq!(outcome(&report, "sub/c.py"), (DecisionOutcome::Rebuild, DecisionReason::CacheStale));
        assert_eq!(outcome(&report, "sub"), (DecisionOutcome::Rebuild, DecisionReason::ChildChanged));
        assert_eq!(outcome(&report, ""), (DecisionOutcome::Rebuild, DecisionReason::ChildChanged));
        assert_eq!(
            report.files_to_rebuild().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["a.py", "sub/c.py"]
        );
    }

    #[test]
    fn full_rebuild_forces_everything() {
        let report = DecisionEngine::new(IndexingMode::FullRebuild).decide(&scenario());
        for path in ["a.py", "b.py", "sub/c.py", "sub", ""] {
            assert_eq!(report.decision(path).unwrap().outcome(), DecisionOutcome::Rebuild, "{path}");
        }
        assert_eq!(outcome(&report, "b.py").1, DecisionReason::ForcedRebuild);
    }

    #[test]
    fn full_mode_reuses_files_but_refreshes_directories() {
        let report = DecisionEngine::new(IndexingMode::Full).decide(&scenario());
        assert_eq!(outcome(&report, "b.py"), (DecisionOutcome::Skip, DecisionReason::CacheFresh));
        assert_eq!(outcome(&report, "sub"), (DecisionOutcome::Rebuild, DecisionReason::FullModeRefresh));
    }

    #[test]
    fn deciding_twice_is_identical() {
        let changes = scenario();
        let engine = DecisionEngine::new(IndexingMode::Incremental);
        similar_asserts::assert_eq!(engine.decide(&changes), engine.decide(&changes));
    }

    #[test]
    fn removals_become_deletions() {
        let mut changes = scenario();
        changes.removed = vec![
            RemovedArtifact {
                source_key: "old.py".into(),
                kind: PathKind::File,
                artifact_path: PathBuf::from("/k/old.py.kb.md"),
                removal: Removal::Deleted,
            },
            RemovedArtifact {
                source_key: "odd.py".into(),
                kind: PathKind::File,
                artifact_path: PathBuf::from("/k/odd.py.kb.md"),
                removal: Removal::Ambiguous { detail: "unreadable header".into() },
            },
        ];
        let report = DecisionEngine::new(IndexingMode::Incremental).decide(&changes);

        let old = report.deletion("old.py").unwrap();
        assert!(old.is_safe_to_delete());
        assert_eq!(old.reason(), DecisionReason::SourceDeleted);
        let odd = report.deletion("odd.py").unwrap();
        assert!(!odd.is_safe_to_delete());
        assert!(odd.backup_recommended());
        assert_eq!(report.errors().len(), 1);
        assert_eq!(report.files_to_delete().len(), 2);
    }

    #[test]
    fn classification_errors_become_error_decisions() {
        let mut changes = scenario();
        changes.errors = vec![
            ClassificationError { path: "locked.py".into(), message: "permission denied".into() },
            ClassificationError { path: String::new(), message: "walk failed".into() },
        ];
        let report = DecisionEngine::new(IndexingMode::Incremental).decide(&changes);

        assert_eq!(outcome(&report, "locked.py"), (DecisionOutcome::Error, DecisionReason::FilesystemError));
        assert_eq!(outcome(&report, ""), (DecisionOutcome::Error, DecisionReason::FilesystemError));
        assert_eq!(outcome(&report, "sub"), (DecisionOutcome::Rebuild, DecisionReason::ChildChanged));
        assert_eq!(report.errors().len(), 3);
        assert!(!report.files_to_rebuild().contains("locked.py"));
        assert!(!report.directories_to_rebuild().contains(""));
    }

    #[test]
    fn unreadable_descendant_marks_every_ancestor_as_error() {
        let mut changes = scenario();
        changes.errors = vec![ClassificationError { path: "sub/c.py".into(), message: "permission denied".into() }];
        let report = DecisionEngine::new(IndexingMode::Incremental).decide(&changes);

        assert_eq!(outcome(&report, "sub/c.py"), (DecisionOutcome::Error, DecisionReason::FilesystemError));
        assert_eq!(outcome(&report, "sub"), (DecisionOutcome::Error, DecisionReason::FilesystemError));
        assert_eq!(outcome(&report, ""), (DecisionOutcome::Error, DecisionReason::FilesystemError));
        assert_eq!(outcome(&report, "a.py"), (DecisionOutcome::Rebuild, DecisionReason::NewSource));
        assert!(report.decision("sub").unwrap().reasoning().contains("sub/c.py"));
    }

    #[test]
    fn skipped_content_is_skipped_not_rebuilt() {
        let files = vec![FileContext::discovered("Cargo.lock", 10, at(), Some(crate::utils::SkipReason::LockFile))];
        let changes = ChangeSet {
            scanned_at: at(),
            tree: build_tree(files),
            files: BTreeMap::new(),
            directories: BTreeMap::new(),
            removed: vec![],
            errors: vec![],
        };
        let report = DecisionEngine::new(IndexingMode::FullRebuild).decide(&changes);
        assert_eq!(outcome(&report, "Cargo.lock"), (DecisionOutcome::Skip, DecisionReason::UnsupportedContent));
    }
}
