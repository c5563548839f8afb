//! The stages of one indexing pass, composed: scan, detect, decide, plan.

use crate::decide::DecisionEngine;
use crate::detect::{ChangeDetector, ChangeSet};
use crate::domain::{Config, DecisionReport, DirectoryContext, IndexingMode};
use crate::error::{KnowledgeError, Result};
use crate::llm::cache::ttl_from_secs;
use crate::llm::{build_summarizer, ConversationManager, PromptCache, Summarizer};
use crate::plan::{render_preview, ExecutionPlan, PlanGenerator, PreviewOptions};
use crate::scan::FileScanner;
use crate::store::KnowledgeLayout;
use crate::utils::Clock;
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the planning stages produce for one root.
pub struct Analysis {
    pub layout: KnowledgeLayout,
    pub changes: ChangeSet,
    pub report: DecisionReport,
}

pub fn resolve_layout(root: &Path, config: &Config) -> Result<KnowledgeLayout> {
    if !root.is_dir() {
        return Err(KnowledgeError::InvalidRoot(format!("{} is not a directory", root.display())));
    }
    KnowledgeLayout::resolve(root, &config.store)
}

/// Walk the source tree and classify every path against its artifact.
pub fn scan_changes(layout: &KnowledgeLayout, config: &Config, now: DateTime<Utc>) -> Result<ChangeSet> {
    let mut scanner = FileScanner::from_config(layout.source_root().to_path_buf(), &config.scan);
    if let Some(nested) = layout.nested_knowledge_root() {
        scanner = scanner.exclude_path(nested.to_path_buf());
    }
    let scan = scanner.scan().map_err(|e| KnowledgeError::Scan(format!("{e:#}")))?;
    info!(
        root = %layout.source_root().display(),
        files = scan.stats.files_discovered,
        errors = scan.errors.len(),
        "scan finished"
    );
    ChangeDetector::new(&config.detect, layout).detect(scan, now)
}

pub fn analyze(root: &Path, mode: IndexingMode, config: &Config, now: DateTime<Utc>) -> Result<Analysis> {
    let layout = resolve_layout(root, config)?;
    let changes = scan_changes(&layout, config, now)?;
    let report = DecisionEngine::new(mode).decide(&changes);
    Ok(Analysis { layout, changes, report })
}

pub fn build_plan(
    layout: &KnowledgeLayout,
    report: &DecisionReport,
    tree: &DirectoryContext,
    config: &Config,
) -> Result<ExecutionPlan> {
    PlanGenerator::new(layout)
        .verify_skipped(config.execution.verify_skipped)
        .generate(report, tree)
}

/// Dry run: decisions and plan rendered as text. Nothing is written.
pub fn preview_plan(root: &Path, mode: IndexingMode, config: &Config, now: DateTime<Utc>) -> Result<String> {
    let analysis = analyze(root, mode, config, now)?;
    let plan = build_plan(&analysis.layout, &analysis.report, &analysis.changes.tree, config)?;
    let title = format!("Plan for {} ({mode})", analysis.layout.source_root().display());
    let mut out = render_preview(&plan, &title, &PreviewOptions::default());

    let _ = writeln!(out, "\nDecisions:");
    for (outcome, count) in analysis.report.counts_by_outcome() {
        let _ = writeln!(out, "  {:<26} {count:>5}", outcome.as_str());
    }
    let errors = analysis.report.errors();
    if !errors.is_empty() {
        let _ = writeln!(out, "\nErrors ({}):", errors.len());
        for error in errors {
            let _ = writeln!(out, "  - {}: {}", error.path, error.message);
        }
    }
    let _ = writeln!(out, "\nKnowledge root: {}", analysis.layout.knowledge_root().display());
    Ok(out)
}

/// Conversation manager for a run, with the persisted prompt cache loaded
/// when caching is enabled.
pub fn build_conversations(
    config: &Config,
    layout: &KnowledgeLayout,
    summarizer: Option<Arc<dyn Summarizer>>,
    clock: Arc<dyn Clock>,
) -> Result<ConversationManager> {
    let summarizer = match summarizer {
        Some(s) => s,
        None => build_summarizer(&config.llm)?,
    };
    let now = clock.now();
    let manager = ConversationManager::new(summarizer, &config.llm, &config.memory, clock);
    if !config.cache.enabled {
        return Ok(manager);
    }
    let cache = if config.cache.persist {
        let ttl = ttl_from_secs(config.cache.ttl_secs);
        PromptCache::load(&layout.prompt_cache_path(), config.cache.capacity, ttl, now).unwrap_or_else(|e| {
            warn!("starting with an empty prompt cache: {e}");
            PromptCache::from_config(&config.cache)
        })
    } else {
        PromptCache::from_config(&config.cache)
    };
    Ok(manager.with_cache(cache))
}
