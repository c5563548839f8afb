//! repo-knowledge command-line entry point.

use anyhow::Result;

fn main() -> Result<()> {
    repo_knowledge::cli::run()
}
