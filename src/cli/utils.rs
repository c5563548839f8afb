//! Shared CLI utilities.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use crate::config::{load_config, merge_cli_with_config, CliOverrides};
use crate::domain::{Config, IndexingMode, ProviderKind, RunPhase};
use crate::service::RunRecord;

/// Parse a comma-separated string into a `Vec<String>`, trimming whitespace and
/// discarding empty segments.  Returns `None` when `value` is `None`.
pub fn parse_csv(value: &Option<String>) -> Option<Vec<String>> {
    value.as_ref().map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| part.to_string())
            .collect::<Vec<_>>()
    })
}

/// Source root, mode and the overrides every planning command accepts.
#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Repository root to index
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Indexing mode
    #[arg(short, long, value_enum, default_value_t = IndexingMode::Incremental)]
    pub mode: IndexingMode,

    /// Worker threads for execution
    #[arg(short = 'w', long, value_name = "N")]
    pub workers: Option<usize>,

    /// Where artifacts are written (default: <PATH>/.knowledge)
    #[arg(long, value_name = "DIR")]
    pub knowledge_dir: Option<PathBuf>,

    /// Summarization backend
    #[arg(long, value_enum)]
    pub provider: Option<ProviderKind>,

    /// Model name passed to the provider
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Delete orphaned artifacts even when they cannot be proven safe (backs them up first)
    #[arg(long)]
    pub allow_unsafe_deletes: bool,

    /// Include only these extensions (comma-separated)
    #[arg(short = 'i', long, value_name = "EXTS")]
    pub include_ext: Option<String>,

    /// Exclude paths matching these globs (comma-separated)
    #[arg(short = 'e', long, value_name = "GLOBS")]
    pub exclude_glob: Option<String>,

    /// Skip files larger than this (bytes)
    #[arg(long, value_name = "BYTES")]
    pub max_file_bytes: Option<u64>,

    /// Ignore .gitignore rules
    #[arg(long)]
    pub no_gitignore: bool,
}

impl SourceArgs {
    /// Canonical root plus the fully layered configuration.
    pub fn resolve(&self, config_path: Option<&Path>) -> Result<(PathBuf, Config)> {
        let root = self
            .path
            .canonicalize()
            .with_context(|| format!("Cannot access {}", self.path.display()))?;
        if !root.is_dir() {
            anyhow::bail!("Path is not a directory: {}", root.display());
        }
        let file_config = load_config(&root, config_path)?;
        let overrides = CliOverrides {
            max_workers: self.workers,
            knowledge_dir: self.knowledge_dir.clone(),
            provider: self.provider,
            model: self.model.clone(),
            allow_unsafe_deletes: self.allow_unsafe_deletes.then_some(true),
            include_extensions: parse_csv(&self.include_ext),
            exclude_globs: parse_csv(&self.exclude_glob),
            max_file_bytes: self.max_file_bytes,
            respect_gitignore: self.no_gitignore.then_some(false),
            verify_skipped: None,
        };
        Ok((root, merge_cli_with_config(file_config, overrides)))
    }
}

fn phase_label(phase: RunPhase) -> String {
    let label = format!("{phase:?}").to_lowercase();
    match phase {
        RunPhase::Completed => console::style(label).green().to_string(),
        RunPhase::Failed => console::style(label).red().to_string(),
        RunPhase::Cancelled => console::style(label).yellow().to_string(),
        _ => label,
    }
}

pub fn print_record(record: &RunRecord) {
    let status = &record.status;
    println!("Run {}: {}", status.run_id, phase_label(status.phase));
    println!("  root: {}", status.root.display());
    if let Some(knowledge_root) = &record.knowledge_root {
        println!("  knowledge root: {}", knowledge_root.display());
    }
    println!("  mode: {}", status.mode);
    println!("  started: {}", status.started_at.to_rfc3339());
    if let Some(finished) = status.finished_at {
        println!("  finished: {}", finished.to_rfc3339());
    }
    println!("  files discovered: {}", status.stats.discovered);
    println!("  tasks planned: {}", status.stats.planned);
    println!(
        "  completed: {}  failed: {}  skipped: {}",
        status.stats.completed, status.stats.failed, status.stats.skipped
    );
    if !record.decisions.is_empty() {
        let parts: Vec<String> = record.decisions.iter().map(|(k, v)| format!("{k} {v}")).collect();
        println!("  decisions: {}", parts.join(", "));
    }
    if let Some(results) = &record.results {
        let c = &results.counters;
        println!("  llm calls: {} (cache hits: {})", c.llm_calls, c.cache_hits);
        println!(
            "  artifacts written: {}  deleted: {}  retries: {}",
            c.artifacts_written, c.artifacts_deleted, c.retries
        );
        if let Some(ms) = results.elapsed_ms() {
            println!("  elapsed: {:.1}s", ms as f64 / 1000.0);
        }
        let failed = results.failed_paths();
        if !failed.is_empty() {
            println!("\nFailed:");
            for (path, reason) in failed {
                println!("  {path}: {reason}");
            }
        }
        if !results.skipped().is_empty() {
            println!("\nSkipped after a failed prerequisite:");
            for (task_id, dependency) in results.skipped() {
                let target = results.target_of(task_id).unwrap_or(task_id.as_str());
                println!("  {target} (waiting on {dependency})");
            }
        }
    }
    if !status.errors.is_empty() {
        println!("\nErrors ({}):", status.total_errors());
        for error in &status.errors {
            println!("  {error}");
        }
        if status.dropped_errors > 0 {
            println!("  ... {} earlier errors not kept", status.dropped_errors);
        }
    }
}
