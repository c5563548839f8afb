//! Artifact file format: YAML front matter followed by the Markdown summary.
//!
//! ```text
//! ---
//! source: sub/c.py
//! kind: file
//! built_at: 2024-05-01T10:00:00Z
//! ...
//! ---
//!
//! <summary>
//! ```

use crate::domain::PathKind;
use crate::error::{KnowledgeError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const FRONT_MATTER_FENCE: &str = "---";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub source: String,
    pub kind: PathKind,
    pub built_at: DateTime<Utc>,
    pub source_modified: DateTime<Utc>,
    pub source_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    pub model_config: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub header: ArtifactHeader,
    pub body: String,
}

impl ArtifactHeader {
    /// Whether `modified` is further than `tolerance` from the source
    /// modification time recorded when the artifact was built.
    pub fn mtime_differs(&self, modified: DateTime<Utc>, tolerance: Duration) -> bool {
        let delta = modified - self.source_modified;
        delta > tolerance || delta < -tolerance
    }
}

impl Artifact {
    pub fn render(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(&self.header)
            .map_err(|e| KnowledgeError::Other(format!("serializing artifact header: {e}")))?;
        Ok(format!(
            "{FRONT_MATTER_FENCE}\n{yaml}{FRONT_MATTER_FENCE}\n\n{}\n",
            self.body.trim_end()
        ))
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let invalid = |message: String| KnowledgeError::Artifact { path: path.to_path_buf(), message };

        let rest = text
            .strip_prefix(FRONT_MATTER_FENCE)
            .and_then(|r| r.strip_prefix('\n'))
            .ok_or_else(|| invalid("missing front matter".to_string()))?;
        let end = rest
            .find(&format!("\n{FRONT_MATTER_FENCE}\n"))
            .ok_or_else(|| invalid("unterminated front matter".to_string()))?;
        let header: ArtifactHeader = serde_yaml::from_str(&rest[..end])
            .map_err(|e| invalid(format!("invalid header: {e}")))?;
        let body = rest[end + FRONT_MATTER_FENCE.len() + 2..].trim().to_string();
        Ok(Self { header, body })
    }
}

pub fn read_artifact(path: &Path) -> Result<Artifact> {
    let text = fs::read_to_string(path)?;
    Artifact::parse(&text, path)
}

pub fn read_header(path: &Path) -> Result<ArtifactHeader> {
    read_artifact(path).map(|a| a.header)
}

/// Write through a sibling temp file and rename, so readers never see a
/// half-written artifact.
pub fn write_artifact(path: &Path, artifact: &Artifact) -> Result<()> {
    let text = artifact.render()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    fs::write(&tmp, text)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

/// Copy an artifact to `<artifact>.bak`.
pub fn backup_artifact(path: &Path) -> Result<PathBuf> {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let backup = path.with_file_name(format!("{name}.bak"));
    fs::copy(path, &backup)?;
    Ok(backup)
}

/// Remove one artifact, then prune directories it leaves empty, stopping at
/// `knowledge_root`. Returns whether a file was removed.
pub fn remove_artifact(path: &Path, knowledge_root: &Path) -> Result<bool> {
    if !path.starts_with(knowledge_root) {
        return Err(KnowledgeError::Artifact {
            path: path.to_path_buf(),
            message: format!("outside knowledge root {}", knowledge_root.display()),
        });
    }
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    }

    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == knowledge_root || !current.starts_with(knowledge_root) {
            break;
        }
        let is_empty = fs::read_dir(current).map(|mut it| it.next().is_none()).unwrap_or(false);
        if !is_empty || fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Artifact {
        Artifact {
            header: ArtifactHeader {
                source: "sub/c.py".to_string(),
                kind: PathKind::File,
                built_at: "2024-05-01T10:00:00Z".parse().unwrap(),
                source_modified: "2024-05-01T09:00:00Z".parse().unwrap(),
                source_size: 42,
                source_hash: Some("abc".to_string()),
                children: Vec::new(),
                model_config: "m1".to_string(),
            },
            body: "Defines the `c` helper.\n\n---\nTrailing rule kept.".to_string(),
        }
    }

    #[test]
    fn mtime_comparison_uses_recorded_source_time() {
        let header = sample().header;
        let recorded = header.source_modified;
        let tolerance = Duration::seconds(1);
        assert!(!header.mtime_differs(recorded, tolerance));
        assert!(!header.mtime_differs(recorded + Duration::milliseconds(500), tolerance));
        // Still before built_at, but not the content the summary was made from.
        assert!(header.mtime_differs(recorded + Duration::seconds(10), tolerance));
        assert!(header.mtime_differs(recorded - Duration::seconds(10), tolerance));
    }

    #[test]
    fn written_artifact_reads_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kb/sub/c.py.kb.md");
        let artifact = sample();

        write_artifact(&path, &artifact).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("---\nsource: sub/c.py\n"));
        similar_asserts::assert_eq!(read_artifact(&path).unwrap(), artifact);
    }

    #[test]
    fn missing_front_matter_is_an_artifact_error() {
        let err = Artifact::parse("just text", Path::new("x.kb.md")).unwrap_err();
        assert!(matches!(err, KnowledgeError::Artifact { .. }));
    }

    #[test]
    fn remove_prunes_empty_parents_only() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("kb");
        let doomed = root.join("a/b/old.py.kb.md");
        let neighbour = root.join("a/keep.py.kb.md");
        write_artifact(&doomed, &sample()).unwrap();
        write_artifact(&neighbour, &sample()).unwrap();

        assert!(remove_artifact(&doomed, &root).unwrap());
        assert!(!root.join("a/b").exists());
        assert!(neighbour.exists());
        assert!(!remove_artifact(&doomed, &root).unwrap());
    }

    #[test]
    fn remove_refuses_paths_outside_root() {
        let tmp = TempDir::new().unwrap();
        let outside = tmp.path().join("source.py");
        fs::write(&outside, "x").unwrap();
        assert!(remove_artifact(&outside, &tmp.path().join("kb")).is_err());
        assert!(outside.exists());
    }

    #[test]
    fn backup_copies_next_to_artifact() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.py.kb.md");
        write_artifact(&path, &sample()).unwrap();
        let backup = backup_artifact(&path).unwrap();
        assert!(backup.ends_with("a.py.kb.md.bak"));
        assert!(backup.exists());
    }
}
