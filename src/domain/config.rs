//! Configuration model.
//!
//! Every section is `#[serde(default)]`, so a config file only needs the keys
//! it changes. Loading and layering live in `crate::config`.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub store: StoreConfig,
    pub detect: DetectConfig,
    pub execution: ExecutionConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub memory: MemoryConfig,
    pub status: StatusConfig,
}

impl Config {
    /// Every out-of-range value, described. Empty means the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.execution.max_workers == 0 {
            problems.push("execution.max_workers must be at least 1".to_string());
        }
        if self.execution.backoff_multiplier < 1.0 {
            problems.push("execution.backoff_multiplier must be >= 1.0".to_string());
        }
        if self.cache.capacity == 0 {
            problems.push("cache.capacity must be at least 1".to_string());
        }
        if self.memory.token_budget < 256 {
            problems.push("memory.token_budget must be at least 256".to_string());
        }
        if self.llm.max_tokens == 0 {
            problems.push("llm.max_tokens must be at least 1".to_string());
        }
        if self.status.max_errors == 0 {
            problems.push("status.max_errors must be at least 1".to_string());
        }
        if let Err(err) = crate::scan::build_exclude_set(&self.scan.exclude_globs) {
            problems.push(format!("scan.exclude_globs: {err}"));
        }
        problems
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub respect_gitignore: bool,
    pub include_hidden: bool,
    pub follow_symlinks: bool,
    /// Extension allow-list (".rs", ".py"). Empty admits every extension.
    #[serde(deserialize_with = "deserialize_extensions")]
    pub include_extensions: Vec<String>,
    #[serde(deserialize_with = "deserialize_string_list")]
    pub exclude_globs: Vec<String>,
    pub max_file_bytes: u64,
    pub skip_minified: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            follow_symlinks: false,
            include_extensions: Vec::new(),
            exclude_globs: Vec::new(),
            max_file_bytes: 1_048_576,
            skip_minified: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Where artifacts go. Defaults to `<root>/.knowledge`, or a mirror
    /// under the user cache directory for read-only roots.
    pub knowledge_dir: Option<PathBuf>,
    /// Treat the source root as read-only even when it is writable.
    pub read_only: bool,
    /// Base directory for read-only mirrors; defaults to the user cache dir.
    pub mirror_base: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    /// Source timestamps newer than the artifact by less than this are ignored.
    pub mtime_tolerance_ms: u64,
    pub compare_size: bool,
    pub compare_structure: bool,
    pub detect_moves: bool,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self { mtime_tolerance_ms: 1_000, compare_size: true, compare_structure: true, detect_moves: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_workers: usize,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub allow_unsafe_deletes: bool,
    pub verify_skipped: bool,
    /// Source text beyond this many characters is cut before summarizing.
    pub max_source_chars: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            allow_unsafe_deletes: false,
            verify_skipped: false,
            max_source_chars: 24_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Offline,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Offline => "offline",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub api_base: String,
    pub api_key_env: String,
    /// Sentences kept per source by the offline summarizer.
    pub offline_sentences: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Offline,
            model: "claude-3-5-haiku-latest".to_string(),
            temperature: 0.2,
            max_tokens: 1_024,
            timeout_secs: 60,
            api_base: "https://api.anthropic.com".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            offline_sentences: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    pub ttl_secs: u64,
    pub persist: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true, capacity: 1_024, ttl_secs: 7 * 24 * 3_600, persist: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryStrategyKind {
    #[default]
    Summarizing,
    SlidingWindow,
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub strategy: MemoryStrategyKind,
    /// Estimated-token threshold that triggers the memory strategy.
    pub token_budget: usize,
    /// Exchanges kept verbatim by the summarizing strategy.
    pub keep_last: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { strategy: MemoryStrategyKind::Summarizing, token_budget: 6_000, keep_last: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub max_errors: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { max_errors: 200 }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

fn split_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let items = match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => s.split(',').map(str::to_string).collect::<Vec<_>>(),
        StringOrList::Many(v) => v,
    };
    Ok(items.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
}

/// Accept `"a, b"` or `["a", "b"]`.
fn deserialize_string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    split_list(deserializer)
}

/// Like [`deserialize_string_list`], lowercased and with a leading dot.
fn deserialize_extensions<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(split_list(deserializer)?.into_iter().map(|e| normalize_extension(&e)).collect())
}

pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: Config = toml::from_str("[execution]\nmax_workers = 9\n").unwrap();
        assert_eq!(cfg.execution.max_workers, 9);
        assert_eq!(cfg.execution.max_retries, 3);
        assert_eq!(cfg.cache, CacheConfig::default());
    }

    #[test]
    fn extensions_accept_comma_string() {
        let cfg: Config = toml::from_str("[scan]\ninclude_extensions = \"py, RS,.md\"\n").unwrap();
        assert_eq!(cfg.scan.include_extensions, vec![".py", ".rs", ".md"]);
    }

    #[test]
    fn invalid_values_are_all_reported() {
        let mut cfg = Config::default();
        cfg.execution.max_workers = 0;
        cfg.cache.capacity = 0;
        cfg.scan.exclude_globs = vec!["[".to_string()];
        assert_eq!(cfg.validate().len(), 3);
    }

    #[test]
    fn enums_use_config_spelling() {
        let cfg: Config =
            toml::from_str("[llm]\nprovider = \"anthropic\"\n[memory]\nstrategy = \"sliding-window\"\n").unwrap();
        assert_eq!(cfg.llm.provider, ProviderKind::Anthropic);
        assert_eq!(cfg.memory.strategy, MemoryStrategyKind::SlidingWindow);
    }
}
