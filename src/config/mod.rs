//! Configuration loading and merging
//!
//! Precedence, highest first: CLI > environment > config file > defaults.

pub mod loader;
pub mod merge;

pub use loader::{load_config, ENV_PREFIX};
pub use merge::{merge_cli_with_config, CliOverrides};
