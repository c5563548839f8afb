//! Preview command implementation

use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

use super::utils::SourceArgs;
use crate::service::preview_plan;

#[derive(Args, Debug)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

pub fn run(args: PreviewArgs, config_path: Option<&Path>) -> Result<()> {
    let (root, config) = args.source.resolve(config_path)?;
    let text = preview_plan(&root, args.source.mode, &config, chrono::Utc::now())
        .with_context(|| format!("Failed to plan {}", root.display()))?;
    println!("{text}");
    Ok(())
}
