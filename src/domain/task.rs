//! Atomic tasks: the schedulable units of an execution plan.
//!
//! Tasks are assembled with [`AtomicTaskBuilder`], which fills in default
//! priority and duration estimates and validates the metadata bag against the
//! task type. A built [`AtomicTask`] cannot be changed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::utils::paths::display_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    AnalyzeFile,
    CreateDirectorySummary,
    DeleteOrphan,
    VerifyFreshness,
    Skip,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::AnalyzeFile,
        TaskType::CreateDirectorySummary,
        TaskType::DeleteOrphan,
        TaskType::VerifyFreshness,
        TaskType::Skip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::AnalyzeFile => "analyze-file",
            TaskType::CreateDirectorySummary => "create-directory-summary",
            TaskType::DeleteOrphan => "delete-orphan",
            TaskType::VerifyFreshness => "verify-freshness",
            TaskType::Skip => "skip",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            TaskType::AnalyzeFile => "analyze",
            TaskType::CreateDirectorySummary => "summarize-dir",
            TaskType::DeleteOrphan => "delete",
            TaskType::VerifyFreshness => "verify",
            TaskType::Skip => "skip",
        }
    }

    /// Metadata keys a task of this type must carry.
    pub fn required_metadata(&self) -> &'static [&'static str] {
        match self {
            TaskType::AnalyzeFile => &["file_size", "last_modified", "repository_root"],
            TaskType::CreateDirectorySummary => &["child_count", "children", "repository_root"],
            TaskType::DeleteOrphan => &["artifact_path", "is_safe_to_delete", "backup_recommended"],
            TaskType::VerifyFreshness => &["artifact_path", "last_modified"],
            TaskType::Skip => &["reason"],
        }
    }

    pub fn default_priority(&self) -> i32 {
        match self {
            TaskType::DeleteOrphan => 80,
            TaskType::AnalyzeFile | TaskType::CreateDirectorySummary => 50,
            TaskType::VerifyFreshness => 10,
            TaskType::Skip => 0,
        }
    }

    /// Whether executing the task costs a summarization call.
    pub fn is_expensive(&self) -> bool {
        matches!(self, TaskType::AnalyzeFile | TaskType::CreateDirectorySummary)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskValidationError {
    #[error("task for '{target}' has an empty id")]
    EmptyId { target: String },

    #[error("task {task_id}: missing required metadata key '{key}' for {task_type}")]
    MissingMetadata { task_id: String, task_type: TaskType, key: &'static str },

    #[error("task {task_id} depends on itself")]
    SelfDependency { task_id: String },

    #[error("task {task_id} lists dependency '{dependency}' more than once")]
    DuplicateDependency { task_id: String, dependency: String },
}

/// One validated unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicTask {
    id: String,
    task_type: TaskType,
    target: String,
    dependencies: Vec<String>,
    #[serde(with = "duration_millis")]
    estimated_duration: Duration,
    priority: i32,
    metadata: BTreeMap<String, Value>,
}

impl AtomicTask {
    pub fn builder(task_type: TaskType, target: impl Into<String>) -> AtomicTaskBuilder {
        AtomicTaskBuilder::new(task_type, target)
    }

    /// Default id for a task of `task_type` on `target`, e.g. `analyze:src/lib.rs`.
    pub fn default_id(task_type: TaskType, target: &str) -> String {
        format!("{}:{}", task_type.id_prefix(), display_key(target))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn estimated_duration(&self) -> Duration {
        self.estimated_duration
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn meta_bool(&self, key: &str) -> Option<bool> {
        self.metadata.get(key).and_then(Value::as_bool)
    }

    pub fn meta_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(Value::as_u64)
    }

    pub fn is_expensive(&self) -> bool {
        self.task_type.is_expensive()
    }
}

/// Two-phase constructor for [`AtomicTask`].
#[derive(Debug, Clone)]
pub struct AtomicTaskBuilder {
    id: Option<String>,
    task_type: TaskType,
    target: String,
    dependencies: Vec<String>,
    estimated_duration: Option<Duration>,
    priority: Option<i32>,
    metadata: BTreeMap<String, Value>,
}

impl AtomicTaskBuilder {
    pub fn new(task_type: TaskType, target: impl Into<String>) -> Self {
        Self {
            id: None,
            task_type,
            target: target.into(),
            dependencies: Vec::new(),
            estimated_duration: None,
            priority: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn depends_on(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.push(task_id.into());
        self
    }

    pub fn dependencies<I, S>(mut self, task_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(task_ids.into_iter().map(Into::into));
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration = Some(duration);
        self
    }

    pub fn metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Validate and freeze the task. Every problem found is reported.
    pub fn build(self) -> Result<AtomicTask, Vec<TaskValidationError>> {
        let id = self.id.unwrap_or_else(|| AtomicTask::default_id(self.task_type, &self.target));
        let mut errors = Vec::new();

        if id.trim().is_empty() {
            errors.push(TaskValidationError::EmptyId { target: self.target.clone() });
        }
        for &key in self.task_type.required_metadata() {
            if !self.metadata.contains_key(key) {
                errors.push(TaskValidationError::MissingMetadata {
                    task_id: id.clone(),
                    task_type: self.task_type,
                    key,
                });
            }
        }
        let mut seen = BTreeSet::new();
        for dep in &self.dependencies {
            if *dep == id {
                errors.push(TaskValidationError::SelfDependency { task_id: id.clone() });
            } else if !seen.insert(dep.as_str()) {
                errors.push(TaskValidationError::DuplicateDependency {
                    task_id: id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let estimated_duration = self
            .estimated_duration
            .unwrap_or_else(|| default_duration(self.task_type, &self.metadata));
        let priority = self.priority.unwrap_or_else(|| self.task_type.default_priority());

        Ok(AtomicTask {
            id,
            task_type: self.task_type,
            target: self.target,
            dependencies: self.dependencies,
            estimated_duration,
            priority,
            metadata: self.metadata,
        })
    }
}

// Rough cost model: summarization time grows with input size.
fn default_duration(task_type: TaskType, metadata: &BTreeMap<String, Value>) -> Duration {
    let meta = |key: &str| metadata.get(key).and_then(Value::as_u64).unwrap_or(0);
    match task_type {
        TaskType::AnalyzeFile => Duration::from_millis(1_500 + meta("file_size") / 8),
        TaskType::CreateDirectorySummary => Duration::from_millis(1_000 + 250 * meta("child_count")),
        TaskType::DeleteOrphan => Duration::from_millis(10),
        TaskType::VerifyFreshness => Duration::from_millis(20),
        TaskType::Skip => Duration::ZERO,
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
