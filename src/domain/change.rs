//! Change classification records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a path is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    New,
    Modified,
    Deleted,
    Moved,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::New => "new",
            ChangeType::Modified => "modified",
            ChangeType::Deleted => "deleted",
            ChangeType::Moved => "moved",
        }
    }
}

/// One detected change. Produced once per detection pass and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeInfo {
    path: String,
    kind: PathKind,
    change_type: ChangeType,
    detected_at: DateTime<Utc>,
    moved_from: Option<String>,
}

impl ChangeInfo {
    pub fn new(
        path: impl Into<String>,
        kind: PathKind,
        change_type: ChangeType,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self { path: path.into(), kind, change_type, detected_at, moved_from: None }
    }

    pub fn moved(
        path: impl Into<String>,
        from: impl Into<String>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            path: path.into(),
            kind: PathKind::File,
            change_type: ChangeType::Moved,
            detected_at,
            moved_from: Some(from.into()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    pub fn moved_from(&self) -> Option<&str> {
        self.moved_from.as_deref()
    }
}
