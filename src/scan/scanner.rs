//! Source-tree scanner with gitignore support

use crate::domain::config::normalize_extension;
use crate::domain::{DirectoryContext, FileContext, ScanConfig};
use crate::utils::paths::parent_key;
use crate::utils::{classify_source, normalize_path};
use anyhow::Result;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};

const NOISE_DIRS: [&str; 7] =
    ["node_modules", "__pycache__", ".git", ".venv", "venv", "target", ".knowledge"];

/// Build a glob set from exclude patterns; any invalid pattern is an error.
pub fn build_exclude_set(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    builder.build()
}

/// A path the scanner could not inspect. The scan carries on without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub files_seen: usize,
    pub files_discovered: usize,
    pub files_marked_skipped: usize,
    pub files_skipped_glob: usize,
    pub files_skipped_extension: usize,
    pub directories: usize,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub tree: DirectoryContext,
    pub errors: Vec<ScanError>,
    pub stats: ScanStats,
}

/// Walks a source root and builds its [`DirectoryContext`] tree.
pub struct FileScanner {
    root_path: PathBuf,
    include_extensions: Vec<String>,
    exclude_globs: Vec<String>,
    excluded_roots: Vec<PathBuf>,
    max_file_bytes: u64,
    respect_gitignore: bool,
    include_hidden: bool,
    follow_symlinks: bool,
    skip_minified: bool,
}

impl FileScanner {
    pub fn new(root_path: PathBuf) -> Self {
        Self::from_config(root_path, &ScanConfig::default())
    }

    pub fn from_config(root_path: PathBuf, config: &ScanConfig) -> Self {
        Self {
            root_path,
            include_extensions: config.include_extensions.clone(),
            exclude_globs: config.exclude_globs.clone(),
            excluded_roots: Vec::new(),
            max_file_bytes: config.max_file_bytes,
            respect_gitignore: config.respect_gitignore,
            include_hidden: config.include_hidden,
            follow_symlinks: config.follow_symlinks,
            skip_minified: config.skip_minified,
        }
    }

    /// Set file extensions to include (e.g., ".rs", ".py"). Empty admits all.
    pub fn include_extensions(mut self, extensions: Vec<String>) -> Self {
        self.include_extensions = extensions.iter().map(|e| normalize_extension(e)).collect();
        self
    }

    pub fn exclude_globs(mut self, globs: Vec<String>) -> Self {
        self.exclude_globs = globs;
        self
    }

    /// Never descend into `path` (used for a knowledge root inside the source tree).
    pub fn exclude_path(mut self, path: PathBuf) -> Self {
        self.excluded_roots.push(path);
        self
    }

    pub fn max_file_bytes(mut self, max_bytes: u64) -> Self {
        self.max_file_bytes = max_bytes;
        self
    }

    pub fn respect_gitignore(mut self, respect: bool) -> Self {
        self.respect_gitignore = respect;
        self
    }

    fn should_include_extension(&self, path: &Path) -> bool {
        if self.include_extensions.is_empty() {
            return true;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        !ext.is_empty() && self.include_extensions.contains(&normalize_extension(ext))
    }

    /// Scan the root. Files come back sorted by relative path within each
    /// directory; directories without any discovered file are pruned.
    pub fn scan(&self) -> Result<ScanOutcome> {
        if !self.root_path.is_dir() {
            anyhow::bail!("Source root is not a directory: {}", self.root_path.display());
        }
        let exclude_globset = build_exclude_set(&self.exclude_globs)?;
        let mut stats = ScanStats::default();
        let mut errors = Vec::new();
        let mut files = Vec::new();

        let include_hidden = self.include_hidden;
        let excluded_roots = self.excluded_roots.clone();
        let dir_filter = move |entry: &ignore::DirEntry| -> bool {
            if !entry.file_type().is_some_and(|t| t.is_dir()) || entry.depth() == 0 {
                return true;
            }
            if excluded_roots.iter().any(|root| entry.path().starts_with(root)) {
                return false;
            }
            let Some(name) = entry.file_name().to_str() else {
                return true;
            };
            if NOISE_DIRS.contains(&name) {
                return false;
            }
            include_hidden || !name.starts_with('.') || name == ".github"
        };

        let mut builder = WalkBuilder::new(&self.root_path);
        builder
            .git_ignore(self.respect_gitignore)
            .git_global(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .require_git(false)
            .follow_links(self.follow_symlinks)
            .hidden(false)
            .parents(true)
            .filter_entry(dir_filter);

        for entry_result in builder.build() {
            let entry = match entry_result {
                Ok(e) => e,
                Err(err) => {
                    let path = walk_error_path(&err)
                        .and_then(|p| self.relative(p))
                        .unwrap_or_default();
                    tracing::warn!(path = %path, error = %err, "scan error");
                    errors.push(ScanError { path, message: err.to_string() });
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().map_or(true, |t| t.is_dir()) {
                continue;
            }
            stats.files_seen += 1;

            let Some(rel_path) = self.relative(path) else {
                continue;
            };
            if exclude_globset.is_match(&rel_path) {
                stats.files_skipped_glob += 1;
                continue;
            }
            if !self.should_include_extension(path) {
                stats.files_skipped_extension += 1;
                continue;
            }

            match self.inspect(path, &rel_path) {
                Ok(file) => {
                    if file.skip_reason().is_some() {
                        stats.files_marked_skipped += 1;
                    }
                    stats.files_discovered += 1;
                    files.push(file);
                }
                Err(err) => {
                    tracing::warn!(path = %rel_path, error = %err, "cannot inspect file");
                    errors.push(ScanError { path: rel_path, message: err.to_string() });
                }
            }
        }

        let tree = build_tree(files);
        stats.directories = tree.post_order().len();
        stats.errors = errors.len();
        tracing::debug!(
            root = %self.root_path.display(),
            files = stats.files_discovered,
            directories = stats.directories,
            "scan complete"
        );

        Ok(ScanOutcome { tree, errors, stats })
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root_path).ok()?;
        Some(normalize_path(&rel.to_string_lossy()))
    }

    fn inspect(&self, path: &Path, rel_path: &str) -> std::io::Result<FileContext> {
        let metadata = path.metadata()?;
        // Open once so permission problems surface as errors, not as "binary".
        File::open(path)?;
        let modified: DateTime<Utc> = metadata.modified()?.into();
        let size = metadata.len();
        let skip_reason = classify_source(path, size, self.max_file_bytes, self.skip_minified);
        Ok(FileContext::discovered(rel_path, size, modified, skip_reason))
    }
}

fn walk_error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            walk_error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child),
        _ => None,
    }
}

/// Assemble files into a directory tree rooted at `""`.
pub fn build_tree(files: Vec<FileContext>) -> DirectoryContext {
    let mut files_by_dir: BTreeMap<String, Vec<FileContext>> = BTreeMap::new();
    let mut children_by_dir: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for file in files {
        let dir = parent_key(file.path()).unwrap_or("").to_string();
        let mut current = dir.clone();
        while let Some(parent) = parent_key(&current) {
            let parent = parent.to_string();
            if !children_by_dir.entry(parent.clone()).or_default().insert(current.clone()) {
                break;
            }
            current = parent;
        }
        files_by_dir.entry(dir).or_default().push(file);
    }

    assemble("", &mut files_by_dir, &children_by_dir)
}

fn assemble(
    key: &str,
    files_by_dir: &mut BTreeMap<String, Vec<FileContext>>,
    children_by_dir: &BTreeMap<String, BTreeSet<String>>,
) -> DirectoryContext {
    let directories = children_by_dir
        .get(key)
        .map(|children| {
            children.iter().map(|child| assemble(child, files_by_dir, children_by_dir)).collect()
        })
        .unwrap_or_default();
    DirectoryContext::new(key, files_by_dir.remove(key).unwrap_or_default(), directories)
}
