//! Indexing modes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How aggressively a run rebuilds existing artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum IndexingMode {
    /// Reuse fresh file artifacts, regenerate every directory summary.
    Full,
    /// Rebuild everything regardless of freshness.
    FullRebuild,
    /// Rebuild only what changed.
    Incremental,
}

impl IndexingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexingMode::Full => "full",
            IndexingMode::FullRebuild => "full-rebuild",
            IndexingMode::Incremental => "incremental",
        }
    }
}

impl fmt::Display for IndexingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "full" => Ok(IndexingMode::Full),
            "full-rebuild" | "rebuild" => Ok(IndexingMode::FullRebuild),
            "incremental" => Ok(IndexingMode::Incremental),
            other => Err(format!(
                "Invalid indexing mode '{other}' (expected full, full-rebuild or incremental)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::IndexingMode;

    #[test]
    fn parses_all_spellings() {
        assert_eq!("full".parse::<IndexingMode>(), Ok(IndexingMode::Full));
        assert_eq!("full_rebuild".parse::<IndexingMode>(), Ok(IndexingMode::FullRebuild));
        assert_eq!("Incremental".parse::<IndexingMode>(), Ok(IndexingMode::Incremental));
        assert!("partial".parse::<IndexingMode>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for mode in [IndexingMode::Full, IndexingMode::FullRebuild, IndexingMode::Incremental] {
            assert_eq!(mode.to_string().parse::<IndexingMode>(), Ok(mode));
        }
    }
}
