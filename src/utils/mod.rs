//! Shared helpers: token estimation, hashing, path display, safe reading,
//! file classification and the clock port.

pub mod classify;
pub mod clock;
pub mod encoding;
pub mod hashing;
pub mod paths;
pub mod tokens;

pub use classify::{classify_source, SkipReason};
pub use clock::{Clock, ManualClock, SystemClock};
pub use encoding::{decode_source, is_binary_file, SourceText};
pub use hashing::{sha256_hex, stable_key};
pub use paths::{normalize_path, truncate_path_display};
pub use tokens::estimate_tokens;
