//! Decisions command implementation

use anyhow::{Context, Result};
use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};

use super::utils::SourceArgs;
use crate::decide::render_audit;
use crate::service::analyze;

#[derive(Args, Debug)]
pub struct DecisionsArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Write the report here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

pub fn run(args: DecisionsArgs, config_path: Option<&Path>) -> Result<()> {
    let (root, config) = args.source.resolve(config_path)?;
    let analysis = analyze(&root, args.source.mode, &config, chrono::Utc::now())
        .with_context(|| format!("Failed to analyze {}", root.display()))?;
    let json = render_audit(&analysis.report, &root)?;

    match args.output {
        Some(path) => {
            fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Decision report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
