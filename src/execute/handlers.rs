//! Task handlers, one per task type.

use super::TaskError;
use crate::domain::{AtomicTask, ExecutionConfig, PathKind, TaskType};
use crate::llm::prompts::{self, ChildSummary};
use crate::llm::ConversationManager;
use crate::store::{
    backup_artifact, read_artifact, read_header, remove_artifact, write_artifact, Artifact,
    ArtifactHeader, KnowledgeLayout,
};
use crate::utils::{decode_source, estimate_tokens, sha256_hex, Clock};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Everything a handler may touch.
pub struct TaskContext<'a> {
    pub layout: &'a KnowledgeLayout,
    pub conversations: &'a ConversationManager,
    pub config: &'a ExecutionConfig,
    pub clock: &'a dyn Clock,
}

/// What a successful task did, for the run counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEffect {
    Analyzed { cached: bool },
    Summarized { cached: bool, turns: usize },
    Deleted { removed: bool, backup: Option<PathBuf> },
    Verified,
    Skipped,
}

pub fn run_task(task: &AtomicTask, ctx: &TaskContext<'_>) -> Result<TaskEffect, TaskError> {
    match task.task_type() {
        TaskType::AnalyzeFile => analyze_file(task, ctx),
        TaskType::CreateDirectorySummary => summarize_directory(task, ctx),
        TaskType::DeleteOrphan => delete_orphan(task, ctx),
        TaskType::VerifyFreshness => verify_freshness(task, ctx),
        TaskType::Skip => Ok(TaskEffect::Skipped),
    }
}

fn modified_time(path: &Path) -> Result<(DateTime<Utc>, u64), TaskError> {
    let meta = fs::metadata(path).map_err(|e| TaskError::filesystem(path, e))?;
    let modified = meta.modified().map_err(|e| TaskError::filesystem(path, e))?;
    Ok((DateTime::<Utc>::from(modified), meta.len()))
}

fn analyze_file(task: &AtomicTask, ctx: &TaskContext<'_>) -> Result<TaskEffect, TaskError> {
    let key = task.target();
    let source = ctx.layout.source_path(key);

    // Metadata first: the recorded mtime must never postdate the hashed bytes.
    let (source_modified, _) = modified_time(&source)?;
    let bytes = fs::read(&source).map_err(|e| TaskError::filesystem(&source, e))?;
    let source_size = bytes.len() as u64;
    let text = decode_source(&bytes, Some(ctx.config.max_source_chars));

    let prompt = prompts::file_prompt(key, &text.content, text.truncated);
    let reply = ctx
        .conversations
        .summarize(&format!("file:{key}"), prompts::FILE_SYSTEM_PROMPT, prompt)?;

    let artifact = Artifact {
        header: ArtifactHeader {
            source: key.to_string(),
            kind: PathKind::File,
            built_at: ctx.clock.now(),
            source_modified,
            source_size,
            source_hash: Some(sha256_hex(&bytes)),
            children: Vec::new(),
            model_config: ctx.conversations.model_hash().to_string(),
        },
        body: reply.text,
    };
    let artifact_path = ctx.layout.artifact_path(key, PathKind::File);
    write_artifact(&artifact_path, &artifact)?;
    debug!(path = %key, cached = reply.cached, encoding = %text.encoding, "file artifact written");
    Ok(TaskEffect::Analyzed { cached: reply.cached })
}

fn child_entries(task: &AtomicTask) -> Result<Vec<(String, PathKind, Option<String>)>, TaskError> {
    let children = task
        .metadata()
        .get("children")
        .and_then(Value::as_array)
        .ok_or_else(|| TaskError::Invalid(format!("{}: children metadata is not a list", task.id())))?;
    children
        .iter()
        .map(|child| {
            let path = child
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| TaskError::Invalid(format!("{}: child without path", task.id())))?;
            let kind = match child.get("kind").and_then(Value::as_str) {
                Some("directory") => PathKind::Directory,
                _ => PathKind::File,
            };
            let skip = child.get("skip_reason").and_then(Value::as_str).map(str::to_string);
            Ok((path.to_string(), kind, skip))
        })
        .collect()
}

/// Read the summaries the children's tasks produced. Children without an
/// artifact get a placeholder line.
fn collect_child_summaries(task: &AtomicTask, ctx: &TaskContext<'_>) -> Result<Vec<ChildSummary>, TaskError> {
    let mut out = Vec::new();
    for (path, kind, skip) in child_entries(task)? {
        let summary = match skip {
            Some(reason) => format!("Not summarized ({reason})."),
            None => {
                let artifact_path = ctx.layout.artifact_path(&path, kind);
                if artifact_path.exists() {
                    read_artifact(&artifact_path)?.body
                } else {
                    "No summary available.".to_string()
                }
            }
        };
        out.push(ChildSummary { path, is_directory: kind == PathKind::Directory, summary });
    }
    Ok(out)
}

/// Split children into batches of roughly `budget` estimated tokens.
fn batches(children: &[ChildSummary], budget: usize) -> Vec<&[ChildSummary]> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (idx, child) in children.iter().enumerate() {
        let cost = estimate_tokens(&child.summary) + estimate_tokens(&child.path);
        if idx > start && used + cost > budget {
            out.push(&children[start..idx]);
            start = idx;
            used = 0;
        }
        used += cost;
    }
    if start < children.len() {
        out.push(&children[start..]);
    }
    out
}

fn summarize_directory(task: &AtomicTask, ctx: &TaskContext<'_>) -> Result<TaskEffect, TaskError> {
    let key = task.target();
    let children = collect_child_summaries(task, ctx)?;
    let conversation_id = format!("dir:{key}");
    let budget = ctx.conversations.token_budget();
    let total: usize = children.iter().map(|c| estimate_tokens(&c.summary)).sum();

    let (reply, turns) = if total <= budget / 2 {
        let prompt = prompts::directory_prompt(key, &children);
        let reply = ctx
            .conversations
            .summarize(&conversation_id, prompts::DIRECTORY_SYSTEM_PROMPT, prompt)?;
        (reply, 1)
    } else {
        let groups = batches(&children, budget / 2);
        let mut conversation = ctx.conversations.start(&conversation_id, prompts::DIRECTORY_SYSTEM_PROMPT);
        for (idx, group) in groups.iter().enumerate() {
            let prompt = prompts::directory_batch_prompt(key, idx + 1, groups.len(), group);
            ctx.conversations.send(&mut conversation, prompt)?;
        }
        let reply = ctx
            .conversations
            .send(&mut conversation, prompts::directory_finish_prompt(key, children.len()))?;
        info!(path = %key, batches = groups.len(), "directory summarized in batches");
        (reply, groups.len() + 1)
    };

    let source = ctx.layout.source_path(key);
    let source_modified = modified_time(&source).map(|(m, _)| m).unwrap_or_else(|_| ctx.clock.now());
    let mut child_paths: Vec<String> = children.iter().map(|c| c.path.clone()).collect();
    child_paths.sort();

    let artifact = Artifact {
        header: ArtifactHeader {
            source: key.to_string(),
            kind: PathKind::Directory,
            built_at: ctx.clock.now(),
            source_modified,
            source_size: children.len() as u64,
            source_hash: None,
            children: child_paths,
            model_config: ctx.conversations.model_hash().to_string(),
        },
        body: reply.text,
    };
    write_artifact(&ctx.layout.artifact_path(key, PathKind::Directory), &artifact)?;
    Ok(TaskEffect::Summarized { cached: reply.cached, turns })
}

fn artifact_path_of(task: &AtomicTask) -> Result<PathBuf, TaskError> {
    task.meta_str("artifact_path")
        .map(PathBuf::from)
        .ok_or_else(|| TaskError::Invalid(format!("{}: missing artifact_path", task.id())))
}

fn delete_orphan(task: &AtomicTask, ctx: &TaskContext<'_>) -> Result<TaskEffect, TaskError> {
    let artifact_path = artifact_path_of(task)?;
    let safe = task.meta_bool("is_safe_to_delete").unwrap_or(false);
    let backup_recommended = task.meta_bool("backup_recommended").unwrap_or(true);

    if !safe && !ctx.config.allow_unsafe_deletes {
        return Err(TaskError::Refused(format!(
            "{} is not safe to delete; set execution.allow_unsafe_deletes to override",
            artifact_path.display()
        )));
    }

    let backup = if backup_recommended && artifact_path.exists() {
        Some(backup_artifact(&artifact_path)?)
    } else {
        None
    };
    let removed = remove_artifact(&artifact_path, ctx.layout.knowledge_root())?;
    info!(path = %task.target(), removed, backup = backup.is_some(), "orphaned artifact deleted");
    Ok(TaskEffect::Deleted { removed, backup })
}

fn verify_freshness(task: &AtomicTask, ctx: &TaskContext<'_>) -> Result<TaskEffect, TaskError> {
    let artifact_path = artifact_path_of(task)?;
    let header = read_header(&artifact_path)
        .map_err(|e| TaskError::Stale(format!("{}: {e}", task.target())))?;
    let (modified, size) = modified_time(&ctx.layout.source_path(task.target()))?;

    if header.mtime_differs(modified, Duration::zero()) || size != header.source_size {
        return Err(TaskError::Stale(format!(
            "{} changed after its artifact was built",
            task.target()
        )));
    }
    Ok(TaskEffect::Verified)
}
