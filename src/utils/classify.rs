//! File classification: which discovered files are worth summarizing, and
//! which roots are vendored third-party code.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::encoding::{is_binary_file, DEFAULT_SAMPLE_SIZE};

static GENERATED_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(?i)auto-generated", r"(?i)do not edit", r"(?i)machine generated", r"(?i)@generated"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

const MINIFIED_INDICATORS: &[&str] = &[".min.", ".bundle.", ".packed."];
const MAX_LINE_LENGTH: usize = 5000;

/// Why a discovered file is kept out of summarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Binary,
    TooLarge,
    Minified,
    Generated,
    LockFile,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Binary => "binary",
            SkipReason::TooLarge => "too_large",
            SkipReason::Minified => "minified",
            SkipReason::Generated => "generated",
            SkipReason::LockFile => "lock_file",
        }
    }
}

/// Classify a discovered file. `None` means the file should be summarized.
pub fn classify_source(
    path: &Path,
    size_bytes: u64,
    max_file_bytes: u64,
    skip_minified: bool,
) -> Option<SkipReason> {
    if is_lock_file(path) {
        return Some(SkipReason::LockFile);
    }
    if size_bytes > max_file_bytes {
        return Some(SkipReason::TooLarge);
    }
    if is_binary_file(path, DEFAULT_SAMPLE_SIZE) {
        return Some(SkipReason::Binary);
    }
    if skip_minified && is_likely_minified(path, MAX_LINE_LENGTH) {
        return Some(SkipReason::Minified);
    }
    if has_generated_header(path) {
        return Some(SkipReason::Generated);
    }
    None
}

/// Check if a file appears to be minified based on filename or first-line length.
pub fn is_likely_minified(path: &Path, max_line_length: usize) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("").to_lowercase();
    if MINIFIED_INDICATORS.iter().any(|indicator| name.contains(indicator)) {
        return true;
    }

    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut buffer = vec![0u8; max_line_length + 1];
    let Ok(bytes_read) = file.read(&mut buffer) else {
        return false;
    };
    if bytes_read == 0 {
        return false;
    }
    match buffer[..bytes_read].iter().position(|&b| b == b'\n') {
        Some(newline_pos) => newline_pos > max_line_length,
        None => bytes_read > max_line_length,
    }
}

/// Check the first couple of kilobytes for a "generated, do not edit" marker.
fn has_generated_header(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut buffer = vec![0u8; 2048];
    let Ok(bytes_read) = file.read(&mut buffer) else {
        return false;
    };
    let sample = String::from_utf8_lossy(&buffer[..bytes_read]);
    let header: String = sample.lines().take(5).collect::<Vec<_>>().join("\n");
    GENERATED_PATTERNS.iter().any(|pattern| pattern.is_match(&header))
}

/// Check if a file is a dependency lock file.
pub fn is_lock_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("").to_lowercase();

    matches!(
        name.as_str(),
        "package-lock.json"
            | "yarn.lock"
            | "pnpm-lock.yaml"
            | "poetry.lock"
            | "pipfile.lock"
            | "cargo.lock"
            | "gemfile.lock"
            | "composer.lock"
            | "go.sum"
    )
}

/// Check if a path sits inside vendored/third-party code.
pub fn is_vendored(path: &Path) -> bool {
    let path_str = path.to_string_lossy().to_lowercase().replace('\\', "/");
    let segments: Vec<&str> = path_str.split('/').collect();
    segments.iter().any(|segment| {
        matches!(
            *segment,
            "vendor"
                | "vendors"
                | "third_party"
                | "third-party"
                | "thirdparty"
                | "external"
                | "extern"
                | "node_modules"
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_is_likely_minified_by_name() {
        assert!(is_likely_minified(Path::new("bundle.min.js"), 5000));
        assert!(is_likely_minified(Path::new("app.bundle.js"), 5000));
        assert!(!is_likely_minified(Path::new("app.js"), 5000));
    }

    #[test]
    fn test_is_lock_file() {
        assert!(is_lock_file(Path::new("package-lock.json")));
        assert!(is_lock_file(Path::new("Cargo.lock")));
        assert!(!is_lock_file(Path::new("package.json")));
    }

    #[test]
    fn test_is_vendored_matches_whole_segments() {
        assert!(is_vendored(Path::new("/src/vendor/foo")));
        assert!(is_vendored(Path::new("node_modules/react")));
        assert!(!is_vendored(Path::new("/src/vendoring_notes")));
        assert!(!is_vendored(Path::new("src/main.rs")));
    }

    #[test]
    fn classify_source_flags_generated_and_binary_files() {
        let tmp = TempDir::new().expect("tmp");
        let generated = tmp.path().join("api.rs");
        fs::write(&generated, "// @generated by protoc. DO NOT EDIT.\npub struct A;\n")
            .expect("write");
        let binary = tmp.path().join("blob.dat");
        fs::write(&binary, [0u8, 1, 2, 3]).expect("write");
        let plain = tmp.path().join("main.rs");
        fs::write(&plain, "fn main() {}\n").expect("write");

        assert_eq!(classify_source(&generated, 40, 1_000, true), Some(SkipReason::Generated));
        assert_eq!(classify_source(&binary, 4, 1_000, true), Some(SkipReason::Binary));
        assert_eq!(classify_source(&plain, 13, 1_000, true), None);
        assert_eq!(classify_source(&plain, 13, 10, true), Some(SkipReason::TooLarge));
    }
}
