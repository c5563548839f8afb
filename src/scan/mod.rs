//! Source discovery with gitignore support

pub mod scanner;

pub use scanner::{build_exclude_set, build_tree, FileScanner, ScanError, ScanOutcome, ScanStats};
