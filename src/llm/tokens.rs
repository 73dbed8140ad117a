//! Fixed-ratio token estimation. Not a tokenizer.

pub const CHARS_PER_TOKEN: usize = 4;

/// `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

pub fn tokens_to_chars(tokens: usize) -> usize {
    tokens.saturating_mul(CHARS_PER_TOKEN)
}
