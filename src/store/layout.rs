//! Shadow-tree layout: where every artifact, run record and cache file lives.

use crate::domain::{PathKind, StoreConfig};
use crate::error::{KnowledgeError, Result};
use crate::utils::classify::is_vendored;
use crate::utils::{normalize_path, sha256_hex};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const ARTIFACT_SUFFIX: &str = ".kb.md";
pub const DIRECTORY_ARTIFACT: &str = "_directory.kb.md";
pub const RUNS_DIR: &str = "_runs";
pub const CACHE_DIR: &str = "_cache";
pub const PROMPT_CACHE_FILE: &str = "prompt-cache.json";
pub const DEFAULT_KNOWLEDGE_DIR: &str = ".knowledge";

/// An artifact found on disk, with the source key its file name implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub source_key: String,
    pub kind: PathKind,
    pub artifact_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeLayout {
    source_root: PathBuf,
    knowledge_root: PathBuf,
    read_only_source: bool,
}

impl KnowledgeLayout {
    pub fn new(source_root: PathBuf, knowledge_root: PathBuf, read_only_source: bool) -> Self {
        Self { source_root, knowledge_root, read_only_source }
    }

    /// Work out the knowledge root for `source_root`.
    ///
    /// An explicit `knowledge_dir` wins (relative paths are taken from the
    /// source root). Read-only sources get a mirror under the user cache
    /// directory; anything else gets `<root>/.knowledge`.
    pub fn resolve(source_root: &Path, store: &StoreConfig) -> Result<Self> {
        let source_root = source_root.canonicalize().map_err(|e| {
            KnowledgeError::InvalidRoot(format!("{}: {}", source_root.display(), e))
        })?;
        if !source_root.is_dir() {
            return Err(KnowledgeError::InvalidRoot(format!(
                "{} is not a directory",
                source_root.display()
            )));
        }
        let read_only = is_read_only_source(&source_root, store);

        let knowledge_root = match &store.knowledge_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => source_root.join(dir),
            None if read_only => {
                let base = store.mirror_base.clone().or_else(cache_root_dir).ok_or_else(|| {
                    KnowledgeError::Config(
                        "read-only source needs a mirror root but no cache directory is known"
                            .to_string(),
                    )
                })?;
                mirror_root(&base, &source_root)
            }
            None => source_root.join(DEFAULT_KNOWLEDGE_DIR),
        };

        if read_only && knowledge_root.starts_with(&source_root) {
            return Err(KnowledgeError::Config(format!(
                "knowledge root {} is inside read-only source {}",
                knowledge_root.display(),
                source_root.display()
            )));
        }

        tracing::debug!(
            source = %source_root.display(),
            knowledge = %knowledge_root.display(),
            read_only,
            "resolved knowledge layout"
        );
        Ok(Self { source_root, knowledge_root, read_only_source: read_only })
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn knowledge_root(&self) -> &Path {
        &self.knowledge_root
    }

    pub fn is_read_only_source(&self) -> bool {
        self.read_only_source
    }

    pub fn source_path(&self, key: &str) -> PathBuf {
        if key.is_empty() {
            self.source_root.clone()
        } else {
            self.source_root.join(key)
        }
    }

    pub fn artifact_path(&self, key: &str, kind: PathKind) -> PathBuf {
        match kind {
            PathKind::File => self.knowledge_root.join(format!("{key}{ARTIFACT_SUFFIX}")),
            PathKind::Directory if key.is_empty() => self.knowledge_root.join(DIRECTORY_ARTIFACT),
            PathKind::Directory => self.knowledge_root.join(key).join(DIRECTORY_ARTIFACT),
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.knowledge_root.join(RUNS_DIR)
    }

    pub fn run_record_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.json"))
    }

    pub fn prompt_cache_path(&self) -> PathBuf {
        self.knowledge_root.join(CACHE_DIR).join(PROMPT_CACHE_FILE)
    }

    /// The knowledge root when it sits inside the source tree (the scanner skips it).
    pub fn nested_knowledge_root(&self) -> Option<&Path> {
        self.knowledge_root.starts_with(&self.source_root).then_some(self.knowledge_root.as_path())
    }

    /// Every artifact under the knowledge root, sorted by source key.
    pub fn list_artifacts(&self) -> Result<Vec<ArtifactLocation>> {
        if !self.knowledge_root.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        let walker = WalkDir::new(&self.knowledge_root).into_iter().filter_entry(|e| {
            e.depth() != 1 || !matches!(e.file_name().to_str(), Some(RUNS_DIR | CACHE_DIR))
        });
        for entry in walker {
            let entry = entry.map_err(|e| {
                KnowledgeError::Io(std::io::Error::other(format!("listing artifacts: {e}")))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.knowledge_root) else {
                continue;
            };
            let rel = normalize_path(&rel.to_string_lossy());
            if let Some(location) = self.locate(&rel, entry.path()) {
                found.push(location);
            }
        }
        found.sort_by(|a, b| (&a.source_key, a.kind).cmp(&(&b.source_key, b.kind)));
        Ok(found)
    }

    fn locate(&self, rel: &str, artifact_path: &Path) -> Option<ArtifactLocation> {
        if rel == DIRECTORY_ARTIFACT {
            return Some(ArtifactLocation {
                source_key: String::new(),
                kind: PathKind::Directory,
                artifact_path: artifact_path.to_path_buf(),
            });
        }
        if let Some(dir) = rel.strip_suffix(&format!("/{DIRECTORY_ARTIFACT}")) {
            return Some(ArtifactLocation {
                source_key: dir.to_string(),
                kind: PathKind::Directory,
                artifact_path: artifact_path.to_path_buf(),
            });
        }
        rel.strip_suffix(ARTIFACT_SUFFIX).map(|key| ArtifactLocation {
            source_key: key.to_string(),
            kind: PathKind::File,
            artifact_path: artifact_path.to_path_buf(),
        })
    }
}

/// A source is read-only when configured so, vendored, or not writable.
pub fn is_read_only_source(root: &Path, store: &StoreConfig) -> bool {
    store.read_only
        || is_vendored(root)
        || root.metadata().map(|m| m.permissions().readonly()).unwrap_or(false)
}

/// Mirror directory for a read-only source under `base`.
pub fn mirror_root(base: &Path, source_root: &Path) -> PathBuf {
    let key = sha256_hex(source_root.to_string_lossy().as_bytes());
    base.join("repo-knowledge").join("mirrors").join(key)
}

pub fn cache_root_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("LOCALAPPDATA").map(PathBuf::from)
    }
    #[cfg(not(target_os = "windows"))]
    {
        if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME") {
            return Some(PathBuf::from(xdg));
        }
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn layout(tmp: &TempDir) -> KnowledgeLayout {
        KnowledgeLayout::resolve(tmp.path(), &StoreConfig::default()).unwrap()
    }

    #[test]
    fn writable_root_uses_nested_knowledge_dir() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        assert!(layout.knowledge_root().ends_with(DEFAULT_KNOWLEDGE_DIR));
        assert!(layout.nested_knowledge_root().is_some());
    }

    #[test]
    fn artifact_paths_never_collide_with_sources() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        let file = layout.artifact_path("src/lib.rs", PathKind::File);
        let dir = layout.artifact_path("src", PathKind::Directory);
        let root = layout.artifact_path("", PathKind::Directory);

        assert!(file.ends_with("src/lib.rs.kb.md"));
        assert!(dir.ends_with("src/_directory.kb.md"));
        assert_eq!(root, layout.knowledge_root().join("_directory.kb.md"));
    }

    #[test]
    fn read_only_source_gets_mirror_root() {
        let tmp = TempDir::new().unwrap();
        let mirror_base = TempDir::new().unwrap();
        let store = StoreConfig {
            read_only: true,
            mirror_base: Some(mirror_base.path().to_path_buf()),
            ..StoreConfig::default()
        };
        let layout = KnowledgeLayout::resolve(tmp.path(), &store).unwrap();

        assert!(layout.is_read_only_source());
        assert!(layout.knowledge_root().starts_with(mirror_base.path()));
        assert!(layout.nested_knowledge_root().is_none());
    }

    #[test]
    fn read_only_source_rejects_nested_knowledge_dir() {
        let tmp = TempDir::new().unwrap();
        let store = StoreConfig {
            read_only: true,
            knowledge_dir: Some(PathBuf::from("kb")),
            ..StoreConfig::default()
        };
        assert!(KnowledgeLayout::resolve(tmp.path(), &store).is_err());
    }

    #[test]
    fn list_artifacts_maps_back_to_source_keys() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        let kr = layout.knowledge_root();
        fs::create_dir_all(kr.join("sub")).unwrap();
        fs::create_dir_all(kr.join(RUNS_DIR)).unwrap();
        fs::write(kr.join(DIRECTORY_ARTIFACT), "x").unwrap();
        fs::write(kr.join("sub").join(DIRECTORY_ARTIFACT), "x").unwrap();
        fs::write(kr.join("sub/c.py.kb.md"), "x").unwrap();
        fs::write(kr.join("sub/c.py.kb.md.bak"), "x").unwrap();
        fs::write(kr.join(RUNS_DIR).join("r.json"), "{}").unwrap();

        let found: Vec<(String, PathKind)> =
            layout.list_artifacts().unwrap().into_iter().map(|a| (a.source_key, a.kind)).collect();
        assert_eq!(
            found,
            vec![
                (String::new(), PathKind::Directory),
                ("sub".to_string(), PathKind::Directory),
                ("sub/c.py".to_string(), PathKind::File),
            ]
        );
    }

    #[test]
    fn mirror_root_is_stable_per_source() {
        let base = Path::new("/cache");
        assert_eq!(mirror_root(base, Path::new("/a")), mirror_root(base, Path::new("/a")));
        assert_ne!(mirror_root(base, Path::new("/a")), mirror_root(base, Path::new("/b")));
    }
}
