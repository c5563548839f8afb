//! Status command implementation

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use super::utils::print_record;
use crate::config::load_config;
use crate::service::{load_run_record, resolve_layout};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Repository root the run indexed
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Run id (default: most recent run)
    #[arg(long, value_name = "ID")]
    pub run: Option<String>,

    /// Where artifacts are written (default: <PATH>/.knowledge)
    #[arg(long, value_name = "DIR")]
    pub knowledge_dir: Option<PathBuf>,

    /// Print the raw run record as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: StatusArgs, config_path: Option<&Path>) -> Result<()> {
    let root = args
        .path
        .canonicalize()
        .with_context(|| format!("Cannot access {}", args.path.display()))?;
    let mut config = load_config(&root, config_path)?;
    if let Some(dir) = args.knowledge_dir {
        config.store.knowledge_dir = Some(dir);
    }
    let layout = resolve_layout(&root, &config)?;
    let record = load_run_record(&layout, args.run.as_deref())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_record(&record);
    }
    Ok(())
}
