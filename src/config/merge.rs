//! Merge CLI overrides on top of loaded configuration

use crate::domain::{Config, ProviderKind};
use crate::domain::config::normalize_extension;
use std::path::PathBuf;

/// Values given on the command line. `None` leaves the configured value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub max_workers: Option<usize>,
    pub knowledge_dir: Option<PathBuf>,
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub allow_unsafe_deletes: Option<bool>,
    pub include_extensions: Option<Vec<String>>,
    pub exclude_globs: Option<Vec<String>>,
    pub max_file_bytes: Option<u64>,
    pub respect_gitignore: Option<bool>,
    pub verify_skipped: Option<bool>,
}

pub fn merge_cli_with_config(mut config: Config, cli: CliOverrides) -> Config {
    if let Some(workers) = cli.max_workers {
        config.execution.max_workers = workers.max(1);
    }
    if let Some(dir) = cli.knowledge_dir {
        config.store.knowledge_dir = Some(dir);
    }
    if let Some(provider) = cli.provider {
        config.llm.provider = provider;
    }
    if let Some(model) = cli.model {
        config.llm.model = model;
    }
    if let Some(allow) = cli.allow_unsafe_deletes {
        config.execution.allow_unsafe_deletes = allow;
    }
    if let Some(exts) = cli.include_extensions {
        config.scan.include_extensions = exts.iter().map(|e| normalize_extension(e)).collect();
    }
    if let Some(globs) = cli.exclude_globs {
        config.scan.exclude_globs.extend(globs);
    }
    if let Some(bytes) = cli.max_file_bytes {
        config.scan.max_file_bytes = bytes;
    }
    if let Some(respect) = cli.respect_gitignore {
        config.scan.respect_gitignore = respect;
    }
    if let Some(verify) = cli.verify_skipped {
        config.execution.verify_skipped = verify;
    }
    config
}
