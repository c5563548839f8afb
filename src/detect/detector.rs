//! Change detection: compare the scanned tree against the artifacts on disk.

use crate::domain::{ChangeInfo, ChangeType, DetectConfig, DirectoryContext, FileContext, PathKind};
use crate::error::Result;
use crate::scan::ScanOutcome;
use crate::store::{read_header, ArtifactHeader, ArtifactLocation, KnowledgeLayout};
use crate::utils::paths::parent_key;
use crate::utils::sha256_hex;
use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

/// Classification of one scanned path. `change` is `None` when unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct PathChange {
    pub change: Option<ChangeInfo>,
    pub header: Option<ArtifactHeader>,
}

impl PathChange {
    pub fn change_type(&self) -> Option<ChangeType> {
        self.change.as_ref().map(ChangeInfo::change_type)
    }

    pub fn is_changed(&self) -> bool {
        self.change.is_some()
    }
}

/// Why an artifact no longer has a scanned source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Removal {
    /// The source is gone from disk.
    Deleted,
    /// The source content now lives at another path.
    MovedTo { path: String },
    /// The source still exists but is no longer indexed.
    Excluded,
    /// The artifact cannot be tied to a source with confidence.
    Ambiguous { detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedArtifact {
    pub source_key: String,
    pub kind: PathKind,
    pub artifact_path: PathBuf,
    pub removal: Removal,
}

/// A path whose state could not be determined. Recorded, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationError {
    pub path: String,
    pub message: String,
}

/// Output of one detection pass.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub scanned_at: DateTime<Utc>,
    pub tree: DirectoryContext,
    pub files: BTreeMap<String, PathChange>,
    pub directories: BTreeMap<String, PathChange>,
    pub removed: Vec<RemovedArtifact>,
    pub errors: Vec<ClassificationError>,
}

impl ChangeSet {
    /// Every detected change, sorted by path.
    pub fn changes(&self) -> Vec<ChangeInfo> {
        let mut out: Vec<ChangeInfo> = self
            .files
            .values()
            .chain(self.directories.values())
            .filter_map(|p| p.change.clone())
            .collect();
        out.extend(self.removed.iter().filter(|r| r.removal == Removal::Deleted).map(|r| {
            ChangeInfo::new(r.source_key.clone(), r.kind, ChangeType::Deleted, self.scanned_at)
        }));
        out.sort_by(|a, b| (a.path(), a.kind()).cmp(&(b.path(), b.kind())));
        out
    }

    pub fn has_changes(&self) -> bool {
        !self.removed.is_empty()
            || self.files.values().chain(self.directories.values()).any(PathChange::is_changed)
    }
}

pub struct ChangeDetector<'a> {
    config: &'a DetectConfig,
    layout: &'a KnowledgeLayout,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(config: &'a DetectConfig, layout: &'a KnowledgeLayout) -> Self {
        Self { config, layout }
    }

    pub fn detect(&self, scan: ScanOutcome, scanned_at: DateTime<Utc>) -> Result<ChangeSet> {
        let ScanOutcome { tree, errors: scan_errors, .. } = scan;
        let errors: Vec<ClassificationError> = scan_errors
            .into_iter()
            .map(|e| ClassificationError { path: e.path, message: e.message })
            .collect();
        let errored: BTreeSet<&str> = errors.iter().map(|e| e.path.as_str()).collect();

        let indexed_files: Vec<&FileContext> =
            tree.all_files().into_iter().filter(|f| f.skip_reason().is_none()).collect();
        let mut files: BTreeMap<String, PathChange> = indexed_files
            .par_iter()
            .map(|file| (file.path().to_string(), self.classify_file(file, scanned_at)))
            .collect();

        let scanned_files: BTreeSet<&str> = indexed_files.iter().map(|f| f.path()).collect();
        let scanned_dirs: BTreeSet<&str> = tree.post_order().into_iter().map(|d| d.path()).collect();
        let mut removed = Vec::new();
        for location in self.layout.list_artifacts()? {
            let key = location.source_key.as_str();
            let still_indexed = match location.kind {
                PathKind::File => scanned_files.contains(key),
                PathKind::Directory => scanned_dirs.contains(key),
            };
            if still_indexed {
                continue;
            }
            if covered_by_error(key, &errored) {
                tracing::debug!(path = %key, "artifact kept: its source could not be scanned");
                continue;
            }
            removed.push(self.classify_removed(location));
        }

        if self.config.detect_moves {
            self.detect_moves(&mut files, &mut removed, &indexed_files, scanned_at);
        }

        let directories = self.classify_directories(&tree, &files, &removed, &errors, scanned_at);

        let changed = files.values().filter(|p| p.is_changed()).count();
        tracing::info!(
            files = files.len(),
            changed,
            removed = removed.len(),
            errors = errors.len(),
            "change detection complete"
        );

        Ok(ChangeSet { scanned_at, tree, files, directories, removed, errors })
    }

    fn classify_file(&self, file: &FileContext, now: DateTime<Utc>) -> PathChange {
        let artifact_path = self.layout.artifact_path(file.path(), PathKind::File);
        if !artifact_path.exists() {
            return PathChange {
                change: Some(ChangeInfo::new(file.path(), PathKind::File, ChangeType::New, now)),
                header: None,
            };
        }
        let header = match read_header(&artifact_path) {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!(path = %file.path(), error = %e, "unreadable artifact, treating as stale");
                return PathChange {
                    change: Some(ChangeInfo::new(file.path(), PathKind::File, ChangeType::Modified, now)),
                    header: None,
                };
            }
        };

        let tolerance = Duration::milliseconds(self.config.mtime_tolerance_ms as i64);
        let touched = header.mtime_differs(file.modified(), tolerance);
        let resized = self.config.compare_size && file.size_bytes() != header.source_size;
        let change = (touched || resized)
            .then(|| ChangeInfo::new(file.path(), PathKind::File, ChangeType::Modified, now));
        PathChange { change, header: Some(header) }
    }

    fn classify_removed(&self, location: ArtifactLocation) -> RemovedArtifact {
        let ArtifactLocation { source_key, kind, artifact_path } = location;
        let removal = match read_header(&artifact_path) {
            Err(e) => Removal::Ambiguous { detail: format!("unreadable header: {e}") },
            Ok(header) if header.source != source_key || header.kind != kind => Removal::Ambiguous {
                detail: format!(
                    "header names {} '{}' but the artifact sits at the {} slot for '{}'",
                    kind_label(header.kind),
                    header.source,
                    kind_label(kind),
                    source_key
                ),
            },
            Ok(_) => match self.layout.source_path(&source_key).try_exists() {
                Ok(true) => Removal::Excluded,
                Ok(false) => Removal::Deleted,
                Err(e) => Removal::Ambiguous { detail: format!("cannot check source: {e}") },
            },
        };
        RemovedArtifact { source_key, kind, artifact_path, removal }
    }

    /// Pair new files with deleted ones by content hash.
    fn detect_moves(
        &self,
        files: &mut BTreeMap<String, PathChange>,
        removed: &mut [RemovedArtifact],
        indexed_files: &[&FileContext],
        now: DateTime<Utc>,
    ) {
        let mut by_hash: BTreeMap<(String, u64), Vec<usize>> = BTreeMap::new();
        for (idx, r) in removed.iter().enumerate() {
            if r.kind != PathKind::File || r.removal != Removal::Deleted {
                continue;
            }
            if let Ok(ArtifactHeader { source_hash: Some(hash), source_size, .. }) =
                read_header(&r.artifact_path)
            {
                by_hash.entry((hash, source_size)).or_default().push(idx);
            }
        }
        if by_hash.is_empty() {
            return;
        }

        for file in indexed_files {
            let is_new = files.get(file.path()).and_then(PathChange::change_type) == Some(ChangeType::New);
            if !is_new {
                continue;
            }
            let Ok(bytes) = fs::read(self.layout.source_path(file.path())) else {
                continue;
            };
            let key = (sha256_hex(&bytes), file.size_bytes());
            // Only an unambiguous one-to-one match counts as a move.
            let Some(candidates) = by_hash.get_mut(&key) else {
                continue;
            };
            if candidates.len() != 1 {
                continue;
            }
            let idx = candidates.remove(0);
            let from = removed[idx].source_key.clone();
            removed[idx].removal = Removal::MovedTo { path: file.path().to_string() };
            tracing::debug!(from = %from, to = %file.path(), "detected move");
            files.insert(
                file.path().to_string(),
                PathChange { change: Some(ChangeInfo::moved(file.path(), from, now)), header: None },
            );
        }
    }

    fn classify_directories(
        &self,
        tree: &DirectoryContext,
        files: &BTreeMap<String, PathChange>,
        removed: &[RemovedArtifact],
        errors: &[ClassificationError],
        now: DateTime<Utc>,
    ) -> BTreeMap<String, PathChange> {
        // Directories with a changed, removed or errored descendant.
        let mut dirty: BTreeSet<String> = BTreeSet::new();
        let mut mark_ancestors = |key: &str| {
            let mut current = parent_key(key);
            while let Some(dir) = current {
                if !dirty.insert(dir.to_string()) {
                    break;
                }
                current = parent_key(dir);
            }
        };
        for (path, change) in files {
            if change.is_changed() {
                mark_ancestors(path);
            }
        }
        for r in removed {
            mark_ancestors(&r.source_key);
        }
        for e in errors {
            mark_ancestors(&e.path);
        }

        let mut out = BTreeMap::new();
        for dir in tree.post_order() {
            let key = dir.path();
            let artifact_path = self.layout.artifact_path(key, PathKind::Directory);
            let header = if artifact_path.exists() { read_header(&artifact_path).ok() } else { None };

            let change_type = match &header {
                None if !artifact_path.exists() => Some(ChangeType::New),
                None => Some(ChangeType::Modified),
                Some(h) => {
                    let child_changed = dirty.contains(key)
                        || dir.directories().iter().any(|d| {
                            out.get(d.path()).is_some_and(|c: &PathChange| c.is_changed())
                        });
                    let restructured = self.config.compare_structure && !same_children(dir, h);
                    (child_changed || restructured).then_some(ChangeType::Modified)
                }
            };
            let change = change_type.map(|t| ChangeInfo::new(key, PathKind::Directory, t, now));
            out.insert(key.to_string(), PathChange { change, header });
        }
        out
    }
}

/// True when `key` is an errored path or lies beneath one. An error without
/// a path covers the whole tree.
fn covered_by_error(key: &str, errored: &BTreeSet<&str>) -> bool {
    errored.iter().any(|e| {
        e.is_empty() || key == *e || key.strip_prefix(*e).is_some_and(|rest| rest.starts_with('/'))
    })
}

fn same_children(dir: &DirectoryContext, header: &ArtifactHeader) -> bool {
    let current: Vec<&str> = dir.child_paths().into_iter().map(|(p, _)| p).collect();
    let mut recorded: Vec<&str> = header.children.iter().map(String::as_str).collect();
    let mut current_sorted = current.clone();
    current_sorted.sort_unstable();
    recorded.sort_unstable();
    current_sorted == recorded
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
    use crate::domain::{ScanConfig, StoreConfig};
    use crate::scan::{FileScanner, ScanError};
    use crate::store::{write_artifact, Artifact};
    use std::path::Path;
    use tempfile::TempDir;

    fn layout(root: &Path) -> KnowledgeLayout {
        KnowledgeLayout::resolve(root, &StoreConfig::default()).unwrap()
    }

    fn scan(layout: &KnowledgeLayout) -> ScanOutcome {
        let mut scanner = FileScanner::from_config(layout.source_root().to_path_buf(), &ScanConfig::default());
        if let Some(kr) = layout.nested_knowledge_root() {
            scanner = scanner.exclude_path(kr.to_path_buf());
        }
        scanner.scan().unwrap()
    }

    fn source_mtime(layout: &KnowledgeLayout, key: &str) -> Option<DateTime<Utc>> {
        let modified = fs::metadata(layout.source_path(key)).and_then(|m| m.modified()).ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    /// Writes an artifact whose recorded source time matches the file on disk.
    fn record(layout: &KnowledgeLayout, key: &str, kind: PathKind, built_at: DateTime<Utc>, size: u64, children: Vec<String>) {
        let source_modified = source_mtime(layout, key).unwrap_or(built_at);
        record_with(layout, key, kind, built_at, source_modified, size, children);
    }

    fn record_with(
        layout: &KnowledgeLayout,
        key: &str,
        kind: PathKind,
        built_at: DateTime<Utc>,
        source_modified: DateTime<Utc>,
        size: u64,
        children: Vec<String>,
    ) {
        let hash = (kind == PathKind::File)
            .then(|| fs::read(layout.source_path(key)).map(sha256_hex).unwrap_or_default());
        let artifact = Artifact {
            header: ArtifactHeader {
                source: key.to_string(),
                kind,
                built_at,
                source_modified,
                source_size: size,
                source_hash: hash,
                children,
                model_config: "m".to_string(),
            },
            body: "summary".to_string(),
        };
        write_artifact(&layout.artifact_path(key, kind), &artifact).unwrap();
    }

    fn future() -> DateTime<Utc> {
        Utc::now() + Duration::hours(1)
    }

    #[test]
    fn new_modified_and_unchanged_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.py"), "a = 1").unwrap();
        fs::write(root.join("b.py"), "b = 2").unwrap();
        fs::write(root.join("c.py"), "c = 3").unwrap();
        let layout = layout(root);
        record(&layout, "b.py", PathKind::File, future(), 5, vec![]);
        record(&layout, "c.py", PathKind::File, future(), 99, vec![]);

        let set = ChangeDetector::new(&DetectConfig::default(), &layout).detect(scan(&layout), Utc::now()).unwrap();

        assert_eq!(set.files["a.py"].change_type(), Some(ChangeType::New));
        assert_eq!(set.files["b.py"].change_type(), None);
        assert_eq!(set.files["c.py"].change_type(), Some(ChangeType::Modified));
        assert_eq!(set.directories[""].change_type(), Some(ChangeType::New));
    }

    #[test]
    fn stale_timestamp_marks_file_modified() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.py"), "a = 1").unwrap();
        let layout = layout(tmp.path());
        let two_days_ago = Utc::now() - Duration::days(2);
        record_with(&layout, "a.py", PathKind::File, two_days_ago, two_days_ago, 5, vec![]);

        let set = ChangeDetector::new(&DetectConfig::default(), &layout).detect(scan(&layout), Utc::now()).unwrap();
        assert_eq!(set.files["a.py"].change_type(), Some(ChangeType::Modified));
    }

    #[test]
    fn directory_changes_propagate_upwards() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("sub/deep")).unwrap();
        fs::write(root.join("top.py"), "t").unwrap();
        fs::write(root.join("sub/deep/d.py"), "d").unwrap();
        let layout = layout(root);
        record(&layout, "top.py", PathKind::File, future(), 1, vec![]);
        record(&layout, "", PathKind::Directory, future(), 0, vec!["top.py".into(), "sub".into()]);
        record(&layout, "sub", PathKind::Directory, future(), 0, vec!["sub/deep".into()]);
        record(&layout, "sub/deep", PathKind::Directory, future(), 0, vec!["sub/deep/d.py".into()]);

        let set = ChangeDetector::new(&DetectConfig::default(), &layout).detect(scan(&layout), Utc::now()).unwrap();

        assert_eq!(set.files["sub/deep/d.py"].change_type(), Some(ChangeType::New));
        assert_eq!(set.directories["sub/deep"].change_type(), Some(ChangeType::Modified));
        assert_eq!(set.directories["sub"].change_type(), Some(ChangeType::Modified));
        assert_eq!(set.directories[""].change_type(), Some(ChangeType::Modified));
    }

    #[test]
    fn deleted_and_ambiguous_artifacts_are_reported() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("keep.py"), "k").unwrap();
        let layout = layout(tmp.path());
        let gone = Artifact {
            header: ArtifactHeader {
                source: "old.py".into(),
                kind: PathKind::File,
                built_at: Utc::now(),
                source_modified: Utc::now(),
                source_size: 1,
                source_hash: None,
                children: vec![],
                model_config: "m".into(),
            },
            body: "old".into(),
        };
        write_artifact(&layout.artifact_path("old.py", PathKind::File), &gone).unwrap();
        fs::write(layout.artifact_path("mystery.py", PathKind::File), "no header").unwrap();

        let set = ChangeDetector::new(&DetectConfig::default(), &layout).detect(scan(&layout), Utc::now()).unwrap();

        let removals: BTreeMap<&str, &Removal> =
            set.removed.iter().map(|r| (r.source_key.as_str(), &r.removal)).collect();
        assert_eq!(removals["old.py"], &Removal::Deleted);
        assert!(matches!(removals["mystery.py"], Removal::Ambiguous { .. }));
        assert!(set.changes().iter().any(|c| c.path() == "old.py" && c.change_type() == ChangeType::Deleted));
    }

    #[test]
    fn moved_file_is_paired_by_hash() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("old.py"), "same content").unwrap();
        let layout = layout(root);
        record(&layout, "old.py", PathKind::File, future(), 12, vec![]);
        fs::rename(root.join("old.py"), root.join("new.py")).unwrap();

        let set = ChangeDetector::new(&DetectConfig::default(), &layout).detect(scan(&layout), Utc::now()).unwrap();

        let change = set.files["new.py"].change.as_ref().unwrap();
        assert_eq!(change.change_type(), ChangeType::Moved);
        assert_eq!(change.moved_from(), Some("old.py"));
        assert_eq!(set.removed[0].removal, Removal::MovedTo { path: "new.py".into() });
    }

    #[test]
    fn children_set_change_marks_directory_modified() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.py"), "a").unwrap();
        let layout = layout(tmp.path());
        record(&layout, "a.py", PathKind::File, future(), 1, vec![]);
        record(&layout, "", PathKind::Directory, future(), 0, vec!["a.py".into(), "b.py".into()]);

        let set = ChangeDetector::new(&DetectConfig::default(), &layout).detect(scan(&layout), Utc::now()).unwrap();
        assert_eq!(set.directories[""].change_type(), Some(ChangeType::Modified));
    }

    #[test]
    fn edit_before_build_time_is_still_detected() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.py"), "a = 1").unwrap();
        let layout = layout(tmp.path());
        let edited_at = source_mtime(&layout, "a.py").unwrap();
        // Summarized from content recorded 10s before the current edit, built 20s after it.
        record_with(
            &layout,
            "a.py",
            PathKind::File,
            edited_at + Duration::seconds(20),
            edited_at - Duration::seconds(10),
            5,
            vec![],
        );

        let set = ChangeDetector::new(&DetectConfig::default(), &layout).detect(scan(&layout), Utc::now()).unwrap();
        assert_eq!(set.files["a.py"].change_type(), Some(ChangeType::Modified));
    }

    #[test]
    fn recorded_mtime_within_tolerance_is_fresh() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.py"), "a = 1").unwrap();
        let layout = layout(tmp.path());
        let edited_at = source_mtime(&layout, "a.py").unwrap();
        record_with(&layout, "a.py", PathKind::File, future(), edited_at - Duration::milliseconds(400), 5, vec![]);

        let set = ChangeDetector::new(&DetectConfig::default(), &layout).detect(scan(&layout), Utc::now()).unwrap();
        assert_eq!(set.files["a.py"].change_type(), None);
    }

    #[test]
    fn artifacts_under_unscannable_directory_are_kept() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.py"), "a").unwrap();
        let layout = layout(tmp.path());
        record(&layout, "locked/x.py", PathKind::File, future(), 1, vec![]);
        record(&layout, "locked", PathKind::Directory, future(), 0, vec!["locked/x.py".into()]);
        record(&layout, "lockedness.py", PathKind::File, future(), 1, vec![]);

        let mut outcome = scan(&layout);
        outcome.errors.push(ScanError { path: "locked".into(), message: "permission denied".into() });
        let set = ChangeDetector::new(&DetectConfig::default(), &layout).detect(outcome, Utc::now()).unwrap();

        let removed: Vec<&str> = set.removed.iter().map(|r| r.source_key.as_str()).collect();
        assert!(!removed.contains(&"locked/x.py"));
        assert!(!removed.contains(&"locked"));
        // A sibling that merely shares the prefix is still removable.
        assert!(removed.contains(&"lockedness.py"));
        assert_eq!(set.errors.len(), 1);
    }

    #[test]
    fn pathless_scan_error_protects_every_artifact() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.py"), "a").unwrap();
        let layout = layout(tmp.path());
        record(&layout, "gone.py", PathKind::File, future(), 1, vec![]);

        let mut outcome = scan(&layout);
        outcome.errors.push(ScanError { path: String::new(), message: "walk aborted".into() });
        let set = ChangeDetector::new(&DetectConfig::default(), &layout).detect(outcome, Utc::now()).unwrap();
        assert!(set.removed.is_empty());
    }
}
