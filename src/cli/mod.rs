//! Command-line interface for repo-knowledge
//!
//! Provides `index`, `preview`, `decisions` and `status` subcommands over the
//! indexing service.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod decisions;
mod index;
mod preview;
mod status;
mod utils;

/// Build and incrementally maintain an LLM-summarized knowledge tree for a repository
#[derive(Parser)]
#[command(name = "repo-knowledge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (sets log level to DEBUG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config file (repo-knowledge.toml or .repo-knowledge.yml)
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the knowledge tree up to date
    Index(index::IndexArgs),

    /// Show the execution plan without running it
    Preview(preview::PreviewArgs),

    /// Print the decision audit report as JSON
    Decisions(decisions::DecisionsArgs),

    /// Show a recorded indexing run
    Status(status::StatusArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG in the environment always takes precedence; --verbose falls back to DEBUG.
    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::WARN.into())
    };
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Index(args) => index::run(args, config),
        Commands::Preview(args) => preview::run(args, config),
        Commands::Decisions(args) => decisions::run(args, config),
        Commands::Status(args) => status::run(args, config),
    }
}
