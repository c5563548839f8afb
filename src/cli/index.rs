//! Index command implementation

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::utils::{print_record, SourceArgs};
use crate::domain::{IndexingStatus, RunPhase};
use crate::service::IndexService;

#[derive(Args, Debug)]
pub struct IndexArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Re-check freshness of artifacts that would otherwise be skipped
    #[arg(long)]
    pub verify_skipped: bool,

    /// Do not draw a progress bar
    #[arg(long)]
    pub no_progress: bool,
}

pub fn run(args: IndexArgs, config_path: Option<&Path>) -> Result<()> {
    let (root, mut config) = args.source.resolve(config_path)?;
    if args.verify_skipped {
        config.execution.verify_skipped = true;
    }

    let service = IndexService::new(config);
    let run_id = service
        .trigger_index(&root, args.source.mode)
        .with_context(|| format!("Failed to start indexing {}", root.display()))?;
    info!(run_id = %run_id, root = %root.display(), "indexing started");

    let bar = progress_bar(args.no_progress);
    loop {
        let status = service.get_status(&run_id)?;
        update_bar(&bar, &status);
        if status.phase.is_finished() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    bar.finish_and_clear();

    let record = service.wait(&run_id)?;
    print_record(&record);

    match record.status.phase {
        RunPhase::Failed => anyhow::bail!("Indexing run {} failed", run_id),
        RunPhase::Cancelled => anyhow::bail!("Indexing run {} was cancelled", run_id),
        _ => {}
    }
    if record.status.stats.failed > 0 {
        anyhow::bail!("{} task(s) failed", record.status.stats.failed);
    }
    Ok(())
}

fn progress_bar(hidden: bool) -> ProgressBar {
    let bar = ProgressBar::new(0);
    if hidden || !console::Term::stderr().is_term() {
        bar.set_draw_target(ProgressDrawTarget::hidden());
    }
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg:<10} [{bar:30}] {pos}/{len} tasks") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn update_bar(bar: &ProgressBar, status: &IndexingStatus) {
    bar.set_message(format!("{:?}", status.phase).to_lowercase());
    bar.set_length(status.stats.planned as u64);
    bar.set_position(status.stats.settled() as u64);
}
