//! Sentence-aware, word-bounded text chunker.
//!
//! Splits cleaned document text into [`TextChunk`]s holding at most
//! `chunk_size` words. Boundaries fall between sentences whenever possible
//! and always on whitespace, never inside a word.
//!
//! # Algorithm
//!
//! 1. Normalize whitespace with [`clean_text`] so that chunk text is the
//!    exact space-joined sequence of its words.
//! 2. Group words into sentences. A sentence ends after a word whose last
//!    character (ignoring closing quotes and brackets) is `.`, `!` or `?`.
//! 3. Accumulate sentences into a buffer until the next sentence would push
//!    the buffer past `chunk_size` words, then flush.
//! 4. A single sentence longer than `chunk_size` is handled per
//!    [`OversizePolicy`]: kept whole as one oversized chunk, or hard-split
//!    at word boundaries.
//! 5. Empty or whitespace-only input yields no chunks.
//!
//! Each chunk carries a SHA-256 hash of its text so the retriever can reuse
//! the embedding of an unchanged chunk.
//!
//! # Example
//!
//! ```rust
//! use refchat_core::chunk::{Chunker, OversizePolicy};
//!
//! let chunker = Chunker::new(2, OversizePolicy::Keep).unwrap();
//! let chunks = chunker.chunk("Alpha beta gamma. Delta epsilon.");
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].text, "Alpha beta gamma.");
//! assert_eq!(chunks[1].text, "Delta epsilon.");
//! ```

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::TextChunk;

/// Default chunk size in words.
pub const DEFAULT_CHUNK_SIZE_WORDS: usize = 500;

/// What to do with a sentence that alone exceeds the chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizePolicy {
    /// Emit the sentence as one oversized chunk.
    #[default]
    Keep,
    /// Hard-split the sentence into pieces of `chunk_size` words.
    Split,
}

/// Deterministic word-count chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    oversize: OversizePolicy,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE_WORDS,
            oversize: OversizePolicy::Keep,
        }
    }
}

impl Chunker {
    /// Create a chunker. `chunk_size` is in words and must be > 0.
    pub fn new(chunk_size: usize, oversize: OversizePolicy) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::validation("chunk size must be > 0"));
        }
        Ok(Self {
            chunk_size,
            oversize,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `text` into chunks with contiguous indices `0..N`.
    ///
    /// # Guarantees
    ///
    /// - The words of all chunks, in order, are exactly the words of `text`.
    /// - Identical input always yields identical chunks.
    /// - Whitespace-only input yields an empty vector.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }

        let mut pieces: Vec<&[&str]> = Vec::new();
        let mut start = 0usize;
        let mut len = 0usize;

        for (s_start, s_end) in sentence_spans(&words) {
            let sentence_len = s_end - s_start;

            if sentence_len > self.chunk_size {
                if len > 0 {
                    pieces.push(&words[start..start + len]);
                }
                match self.oversize {
                    OversizePolicy::Keep => pieces.push(&words[s_start..s_end]),
                    OversizePolicy::Split => {
                        pieces.extend(words[s_start..s_end].chunks(self.chunk_size));
                    }
                }
                start = s_end;
                len = 0;
                continue;
            }

            if len > 0 && len + sentence_len > self.chunk_size {
                pieces.push(&words[start..start + len]);
                start = s_start;
                len = 0;
            }
            if len == 0 {
                start = s_start;
            }
            len += sentence_len;
        }

        if len > 0 {
            pieces.push(&words[start..start + len]);
        }

        pieces
            .into_iter()
            .enumerate()
            .map(|(i, piece)| make_chunk(i, piece))
            .collect()
    }
}

/// Collapse every whitespace run (including non-breaking spaces) to a
/// single space and trim both ends.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Number of whitespace-separated words in `text`.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Half-open `[start, end)` word ranges, one per sentence.
fn sentence_spans(words: &[&str]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for (i, word) in words.iter().enumerate() {
        if ends_sentence(word) {
            spans.push((start, i + 1));
            start = i + 1;
        }
    }
    if start < words.len() {
        spans.push((start, words.len()));
    }
    spans
}

fn ends_sentence(word: &str) -> bool {
    word.trim_end_matches(['"', '\'', ')', ']', '}', '\u{201D}', '\u{2019}', '\u{00BB}'])
        .ends_with(['.', '!', '?', '\u{2026}'])
}

fn make_chunk(index: usize, words: &[&str]) -> TextChunk {
    let text = words.join(" ");
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    TextChunk {
        chunk_index: index,
        word_count: words.len(),
        character_count: text.chars().count(),
        content_hash,
        text,
    }
}
