//! Token estimation

/// Characters per token used by every estimate in the crate.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate tokens using a fixed character ratio, rounded up.
///
/// Counts Unicode code points, not bytes. Rounding up keeps the estimate on the
/// conservative side so conversations are trimmed before a provider rejects them.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}
