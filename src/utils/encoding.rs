//! Encoding-aware source reading.
//!
//! Source files are fed to the summarizer as text, so reading has to survive
//! whatever encoding the repository uses:
//! - BOM detection (UTF-8, UTF-16 LE/BE)
//! - strict UTF-8 fast path
//! - `chardetng` fallback with replacement characters
//! - binary detection so binaries are never sent to a model

use anyhow::Result;
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const DEFAULT_SAMPLE_SIZE: usize = 8192;

/// Decoded text of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText {
    pub content: String,
    /// Lower-case label of the encoding that produced `content`.
    pub encoding: String,
    /// Set when `content` was cut at the caller's character limit.
    pub truncated: bool,
}

/// Encoding label for a leading sample of a file's bytes.
fn encoding_label(sample: &[u8]) -> String {
    if sample.is_empty() {
        return "utf-8".to_string();
    }

    if sample.starts_with(&[0xef, 0xbb, 0xbf]) {
        return "utf-8-sig".to_string();
    }
    if sample.starts_with(&[0xff, 0xfe]) {
        return "utf-16-le".to_string();
    }
    if sample.starts_with(&[0xfe, 0xff]) {
        return "utf-16-be".to_string();
    }

    if std::str::from_utf8(sample).is_ok() {
        return "utf-8".to_string();
    }

    let mut detector = EncodingDetector::new();
    detector.feed(sample, true);
    let name = detector.guess(None, true).name().to_lowercase();
    if name.contains("utf-8") || name == "ascii" {
        "utf-8".to_string()
    } else {
        name
    }
}

/// Detect if a file is binary (not text).
///
/// A NUL byte, or fewer than 70% printable bytes in the sample, marks a file
/// as binary. Unreadable files count as binary.
pub fn is_binary_file(path: &Path, sample_size: usize) -> bool {
    is_binary_file_impl(path, sample_size).unwrap_or(true)
}

fn is_binary_file_impl(path: &Path, sample_size: usize) -> Result<bool> {
    let sample = read_sample(path, sample_size)?;
    if sample.is_empty() {
        return Ok(false);
    }
    if sample.contains(&0) {
        return Ok(true);
    }

    // UTF-8 text outside ASCII is still text
    if std::str::from_utf8(&sample).is_ok() {
        return Ok(false);
    }

    let printable = sample
        .iter()
        .filter(|&&b| (32..=126).contains(&b) || b == 9 || b == 10 || b == 13)
        .count();
    Ok((printable as f64 / sample.len() as f64) < 0.70)
}

fn read_sample(path: &Path, sample_size: usize) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut sample = vec![0u8; sample_size];
    let bytes_read = file.read(&mut sample)?;
    sample.truncate(bytes_read);
    Ok(sample)
}

/// Decode bytes already read from a source file.
///
/// Strict UTF-8 is tried first; otherwise the detected encoding decodes with
/// replacement characters. `max_chars` caps the returned content.
pub fn decode_source(bytes: &[u8], max_chars: Option<usize>) -> SourceText {
    let (decoded, encoding) = match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), "utf-8".to_string()),
        Err(_) => {
            let sample = &bytes[..bytes.len().min(DEFAULT_SAMPLE_SIZE)];
            let label = encoding_label(sample);
            let encoding = Encoding::for_label(label.as_bytes()).unwrap_or(UTF_8);
            let (cow, _, _) = encoding.decode(bytes);
            (cow.into_owned(), encoding.name().to_lowercase())
        }
    };

    let (content, truncated) = match max_chars {
        Some(limit) if decoded.chars().count() > limit => {
            (decoded.chars().take(limit).collect(), true)
        }
        _ => (decoded, false),
    };

    SourceText { content, encoding, truncated }
}
