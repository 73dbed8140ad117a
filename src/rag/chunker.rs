//! Sentence-aware text chunking.
//!
//! Splits page text into consecutive, non-overlapping windows of roughly
//! `chunk_size` characters. When a window would end mid-text, the cut moves
//! back to the last sentence terminator, provided that terminator lies in the
//! final 30% of the window.

use serde::{Deserialize, Serialize};

const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Earliest position (as a share of the window) a sentence cut may land.
    pub min_break_ratio: f64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            min_break_ratio: 0.7,
        }
    }
}

/// Lazy iterator over the chunks of a text.
pub struct Chunks<'a> {
    text: &'a str,
    /// Byte offset of every char, plus `text.len()` as a sentinel.
    offsets: Vec<usize>,
    position: usize,
    chunk_size: usize,
    min_break: usize,
}

impl<'a> Chunks<'a> {
    fn char_count(&self) -> usize {
        self.offsets.len() - 1
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.offsets[start]..self.offsets[end]]
    }

    /// Char index just past the last terminator in `[start, end)`, if it sits
    /// at or after `start + min_break`.
    fn sentence_end(&self, start: usize, end: usize) -> Option<usize> {
        let window = self.slice(start, end);
        let (byte_idx, _) = window
            .char_indices()
            .filter(|(_, c)| SENTENCE_TERMINATORS.contains(c))
            .last()?;
        let char_idx = start + window[..byte_idx].chars().count();
        (char_idx >= start + self.min_break).then_some(char_idx + 1)
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let total = self.char_count();
        while self.position < total {
            let start = self.position;
            let mut end = (start + self.chunk_size).min(total);
            if end < total {
                if let Some(cut) = self.sentence_end(start, end) {
                    end = cut;
                }
            }
            self.position = end;

            let chunk = self.slice(start, end).trim();
            if !chunk.is_empty() {
                return Some(chunk);
            }
        }
        None
    }
}

/// Splits `text` into chunks of about `config.chunk_size` characters.
pub fn chunk_text<'a>(text: &'a str, config: &ChunkerConfig) -> Chunks<'a> {
    let chunk_size = config.chunk_size.max(1);
    let min_break = (chunk_size as f64 * config.min_break_ratio).floor() as usize;
    let offsets = text
        .char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(text.len()))
        .collect();

    Chunks {
        text,
        offsets,
        position: 0,
        chunk_size,
        min_break,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size,
            ..Default::default()
        }
    }

    fn non_whitespace(text: &str) -> String {
        text.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn short_text_is_a_single_trimmed_chunk() {
        let chunks: Vec<&str> = chunk_text("  Hello there.  ", &config(1000)).collect();
        assert_eq!(chunks, vec!["Hello there."]);
    }

    #[test]
    fn empty_and_blank_text_yield_nothing() {
        assert_eq!(chunk_text("", &config(10)).count(), 0);
        assert_eq!(chunk_text("   \n\t ", &config(2)).count(), 0);
    }

    #[test]
    fn cuts_after_late_sentence_terminator() {
        // Terminator at index 8 of a 10-char window: past the 70% mark.
        let text = "abcdefgh. ijklmnopqrstuvwxyz";
        let chunks: Vec<&str> = chunk_text(text, &config(10)).collect();
        assert_eq!(chunks[0], "abcdefgh.");
    }

    #[test]
    fn ignores_early_sentence_terminator() {
        // Terminator at index 2 is before the 70% mark, so the window is cut hard.
        let text = "ab. defghijklmnopqrstuvwxyz";
        let chunks: Vec<&str> = chunk_text(text, &config(10)).collect();
        assert_eq!(chunks[0], "ab. defghi");
    }

    #[test]
    fn chunks_reconstruct_all_non_whitespace_text() {
        let text = "The role requires experience with Rust! Do you know tokio? \
                    Distributed systems matter. "
            .repeat(40);
        for size in [7, 50, 100, 333, 1000] {
            let joined: String = chunk_text(&text, &config(size)).collect();
            assert_eq!(non_whitespace(&joined), non_whitespace(&text), "size {}", size);
        }
    }

    #[test]
    fn chunks_never_exceed_bound() {
        let text = "Sentence number one is here. Another one follows! Is this the third? "
            .repeat(60);
        let size = 100;
        let limit = (size as f64 * 1.43).ceil() as usize;
        for chunk in chunk_text(&text, &config(size)) {
            assert!(chunk.chars().count() <= limit);
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "日本語の文章です。".repeat(50);
        let chunks: Vec<&str> = chunk_text(&text, &config(20)).collect();
        assert!(chunks.len() > 1);
        let joined: String = chunks.concat();
        assert_eq!(non_whitespace(&joined), non_whitespace(&text));
    }
}
