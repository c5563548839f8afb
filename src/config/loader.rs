//! Config file discovery and layering

use crate::domain::Config;
use anyhow::{Context, Result};
use figment::providers::{Env, Serialized};
use figment::Figment;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "REPO_KNOWLEDGE_";

const NESTED_SECTIONS: [&str; 2] = ["repo-knowledge", "rk"];

/// Load the effective configuration for `repo_root`.
///
/// Layers, lowest first: built-in defaults, the config file, then
/// `REPO_KNOWLEDGE_*` environment variables (`__` separates nested keys, e.g.
/// `REPO_KNOWLEDGE_EXECUTION__MAX_WORKERS=8`). A config file named with
/// `config_path` must parse; an auto-discovered one that does not is ignored
/// with a warning.
pub fn load_config(repo_root: &Path, config_path: Option<&Path>) -> Result<Config> {
    let file_config = load_file_config(repo_root, config_path)?;
    layer_env(file_config, Env::prefixed(ENV_PREFIX).split("__"))
}

fn layer_env(base: Config, env: Env) -> Result<Config> {
    let config: Config = Figment::from(Serialized::defaults(base))
        .merge(env)
        .extract()
        .context("Invalid configuration from environment")?;
    let problems = config.validate();
    if !problems.is_empty() {
        anyhow::bail!("Invalid configuration: {}", problems.join("; "));
    }
    Ok(config)
}

fn load_file_config(repo_root: &Path, config_path: Option<&Path>) -> Result<Config> {
    let explicit = config_path.is_some();
    let Some(config_file) = config_path.map(Path::to_path_buf).or_else(|| discover_config(repo_root))
    else {
        return Ok(Config::default());
    };

    match parse_config_file(&config_file) {
        Ok(config) => {
            tracing::debug!(path = %config_file.display(), "loaded config file");
            Ok(config)
        }
        Err(e) if !explicit => {
            tracing::warn!(
                "Failed to parse auto-discovered config {}: {:#}",
                config_file.display(),
                e
            );
            Ok(Config::default())
        }
        Err(e) => Err(e),
    }
}

fn parse_config_file(config_file: &Path) -> Result<Config> {
    let content = fs::read_to_string(config_file)
        .with_context(|| format!("Failed reading config file: {}", config_file.display()))?;
    let ext = config_file.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();

    match ext.as_str() {
        "toml" => parse_toml_config(&content, config_file),
        "yaml" | "yml" => parse_yaml_config(&content, config_file),
        other => anyhow::bail!(
            "Unsupported config extension '.{}' for file {}",
            other,
            config_file.display()
        ),
    }
}

/// Parse TOML config, accepting a nested `[repo-knowledge]` or `[rk]` table.
fn parse_toml_config(content: &str, config_file: &Path) -> Result<Config> {
    let raw: toml::Value = toml::from_str(content)
        .with_context(|| format!("Invalid TOML syntax: {}", config_file.display()))?;

    let config_val = NESTED_SECTIONS.iter().find_map(|key| raw.get(*key).cloned()).unwrap_or(raw);

    config_val.try_into().with_context(|| format!("Invalid TOML config: {}", config_file.display()))
}

/// Parse YAML config, accepting a nested `repo-knowledge:` or `rk:` mapping.
fn parse_yaml_config(content: &str, config_file: &Path) -> Result<Config> {
    let raw: serde_yaml::Value = serde_yaml::from_str(content)
        .with_context(|| format!("Invalid YAML syntax: {}", config_file.display()))?;

    let config_val = NESTED_SECTIONS.iter().find_map(|key| raw.get(*key).cloned()).unwrap_or(raw);

    serde_yaml::from_value(config_val)
        .with_context(|| format!("Invalid YAML config: {}", config_file.display()))
}

fn discover_config(repo_root: &Path) -> Option<PathBuf> {
    let candidates = [
        "repo-knowledge.toml",
        ".repo-knowledge.toml",
        "repo-knowledge.yml",
        ".repo-knowledge.yml",
        "repo-knowledge.yaml",
        ".repo-knowledge.yaml",
    ];

    candidates.iter().map(|c| repo_root.join(c)).find(|p| p.is_file())
}
