//! Path normalization and display

use std::path::Path;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Relative, forward-slash form of `path` under `root`; `""` for the root itself.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(normalize_path(&rel.to_string_lossy()))
}

/// Parent key of a relative path key; the root (`""`) has no parent.
pub fn parent_key(key: &str) -> Option<&str> {
    if key.is_empty() {
        return None;
    }
    Some(key.rsplit_once('/').map_or("", |(parent, _)| parent))
}

/// Human label for a relative key, rendering the root as `.`.
pub fn display_key(key: &str) -> &str {
    if key.is_empty() {
        "."
    } else {
        key
    }
}

/// Shorten a path for terminal display, keeping its tail.
///
/// Width is measured in terminal columns; the result fits in `max_width`
/// and starts with `…/` when anything was cut.
pub fn truncate_path_display(path: &str, max_width: usize) -> String {
    if path.width() <= max_width {
        return path.to_string();
    }
    let budget = max_width.saturating_sub(2);
    let mut tail: Vec<char> = Vec::new();
    let mut used = 0usize;
    for ch in path.chars().rev() {
        let w = ch.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        tail.push(ch);
    }
    tail.reverse();
    format!("…/{}", tail.into_iter().collect::<String>().trim_start_matches('/'))
}
