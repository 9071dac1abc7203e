// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text chunker for embedding generation.
//!
//! Splits text into overlapping, bounded-size chunks using a character-based
//! sliding window. Offsets count `char`s, so a chunk never splits a code point.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::{RagError, Result};

/// Default number of characters per chunk.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1000;

/// Default overlap between consecutive chunks.
pub const DEFAULT_OVERLAP_SIZE: usize = 200;

/// Where a non-final chunk is allowed to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPolicy {
    /// Cut exactly at `max_chunk_size` characters.
    #[default]
    Exact,
    /// Pull the cut back to just after the last whitespace in the window.
    Whitespace,
}

/// Configuration for the text chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    max_chunk_size: usize,
    overlap_size: usize,
    boundary: BoundaryPolicy,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            overlap_size: DEFAULT_OVERLAP_SIZE,
            boundary: BoundaryPolicy::Exact,
        }
    }
}

impl ChunkConfig {
    /// Creates a new ChunkConfig with the specified parameters.
    pub fn new(max_chunk_size: usize, overlap_size: usize) -> Result<Self> {
        if max_chunk_size == 0 {
            return Err(RagError::config("max_chunk_size must be greater than 0"));
        }
        if overlap_size >= max_chunk_size {
            return Err(RagError::config(format!(
                "overlap_size ({}) must be less than max_chunk_size ({})",
                overlap_size, max_chunk_size
            )));
        }
        Ok(Self {
            max_chunk_size,
            overlap_size,
            boundary: BoundaryPolicy::Exact,
        })
    }

    /// Sets the boundary policy.
    pub fn with_boundary(mut self, boundary: BoundaryPolicy) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    pub fn overlap_size(&self) -> usize {
        self.overlap_size
    }

    pub fn boundary(&self) -> BoundaryPolicy {
        self.boundary
    }
}

/// A bounded, offset-tracked slice of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// `"{source_id}:{sequence_index}"`
    pub id: String,
    pub source_id: String,
    pub sequence_index: usize,
    pub text: String,
    /// Start offset in characters (inclusive).
    pub start_offset: usize,
    /// End offset in characters (exclusive).
    pub end_offset: usize,
}

impl Chunk {
    /// Builds the record id for a chunk of `source_id`.
    pub fn make_id(source_id: &str, sequence_index: usize) -> String {
        format!("{}:{}", source_id, sequence_index)
    }

    /// Number of characters covered by the chunk.
    pub fn len_chars(&self) -> usize {
        self.end_offset - self.start_offset
    }
}

/// Splits text into overlapping chunks for embedding generation.
#[derive(Debug, Clone, Default)]
pub struct TextChunker {
    config: ChunkConfig,
}

impl TextChunker {
    /// Creates a new chunker with the given configuration.
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Splits text into overlapping chunks.
    ///
    /// Algorithm:
    /// ```text
    /// cursor = 0
    /// loop:
    ///   end = min(cursor + max_chunk_size, total_chars)
    ///   emit [cursor, end)
    ///   if end == total_chars: stop
    ///   cursor = end - overlap_size
    /// ```
    pub fn chunk(&self, source_id: &str, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        // Byte position of every char, plus the end of the string, so char
        // offsets map to slice boundaries.
        let mut boundaries: Vec<usize> = text.char_indices().map(|(idx, _)| idx).collect();
        boundaries.push(text.len());
        let chars: Vec<char> = text.chars().collect();
        let total_chars = chars.len();

        let max = self.config.max_chunk_size;
        let overlap = self.config.overlap_size;
        let mut chunks = Vec::new();
        let mut cursor = 0_usize;

        loop {
            let mut end = (cursor + max).min(total_chars);
            if end < total_chars && self.config.boundary == BoundaryPolicy::Whitespace {
                end = snap_to_whitespace(&chars, cursor, end, overlap);
            }

            let sequence_index = chunks.len();
            chunks.push(Chunk {
                id: Chunk::make_id(source_id, sequence_index),
                source_id: source_id.to_string(),
                sequence_index,
                text: text[boundaries[cursor]..boundaries[end]].to_string(),
                start_offset: cursor,
                end_offset: end,
            });

            if end == total_chars {
                break;
            }
            cursor = end - overlap;
        }

        chunks
    }

    /// Chunks multiple documents in parallel, preserving input order.
    pub fn chunk_documents<'a, I>(&self, documents: I) -> Vec<Vec<Chunk>>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let documents: Vec<(&str, &str)> = documents.into_iter().collect();
        documents
            .par_iter()
            .map(|(source_id, text)| self.chunk(source_id, text))
            .collect()
    }
}

/// Moves `end` back to just after the last whitespace in `(cursor + overlap, end]`.
///
/// The chunk must stay longer than `overlap` so the next cursor still advances.
fn snap_to_whitespace(chars: &[char], cursor: usize, end: usize, overlap: usize) -> usize {
    let floor = cursor + overlap + 1;
    (floor..=end)
        .rev()
        .find(|&candidate| chars[candidate - 1].is_whitespace())
        .unwrap_or(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max: usize, overlap: usize) -> TextChunker {
        TextChunker::new(ChunkConfig::new(max, overlap).unwrap())
    }

    /// Rebuilds the original text from chunks by dropping each overlap.
    fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let skip = if i == 0 { 0 } else { overlap };
            out.extend(chunk.text.chars().skip(skip));
        }
        out
    }

    #[test]
    fn test_default_config() {
        let config = ChunkConfig::default();
        assert_eq!(config.max_chunk_size(), 1000);
        assert_eq!(config.overlap_size(), 200);
        assert_eq!(config.boundary(), BoundaryPolicy::Exact);
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkConfig::new(20, 5).is_ok());
        assert!(ChunkConfig::new(20, 0).is_ok());

        // overlap >= max would never advance
        assert!(matches!(
            ChunkConfig::new(20, 20),
            Err(RagError::Configuration(_))
        ));
        assert!(ChunkConfig::new(20, 30).is_err());
        assert!(ChunkConfig::new(0, 0).is_err());
    }

    #[test]
    fn test_empty_content() {
        assert!(chunker(20, 5).chunk("doc", "").is_empty());
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunks = chunker(20, 5).chunk("doc", "hello world");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "doc:0");
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 11);
        assert_eq!(chunks[0].text, "hello world");
    }

    #[test]
    fn test_quick_brown_fox_boundaries() {
        let text = "The quick brown fox. It jumps over the lazy dog.";
        let chunks = chunker(20, 5).chunk("fox", text);

        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[0].start_offset, chunks[0].end_offset), (0, 20));
        assert_eq!((chunks[1].start_offset, chunks[1].end_offset), (15, 35));
        assert_eq!((chunks[2].start_offset, chunks[2].end_offset), (30, 48));
        assert_eq!(chunks[0].text, "The quick brown fox.");
        assert_eq!(chunks[1].text, " fox. It jumps over ");
        assert_eq!(chunks[2].text, "over the lazy dog.");
    }

    #[test]
    fn test_coverage_overlap_and_bounds() {
        let text: String = (0..37).map(|i| format!("w{} ", i)).collect();
        for (max, overlap) in [(1, 0), (7, 3), (16, 0), (25, 24), (40, 10), (500, 100)] {
            let chunks = chunker(max, overlap).chunk("s", &text);

            assert_eq!(chunks.first().unwrap().start_offset, 0);
            assert_eq!(chunks.last().unwrap().end_offset, text.chars().count());
            assert_eq!(reassemble(&chunks, overlap), text, "max={max} overlap={overlap}");

            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.sequence_index, i);
                assert!(chunk.len_chars() <= max);
                assert!(chunk.end_offset > chunk.start_offset);
                assert!(!chunk.text.is_empty());
            }
            for pair in chunks.windows(2) {
                assert_eq!(pair[0].end_offset - pair[1].start_offset, overlap);
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit.";
        let a = chunker(12, 4).chunk("doc", text);
        let b = chunker(12, 4).chunk("doc", text);
        assert_eq!(a, b);
    }

    #[test]
    fn test_multibyte_text_uses_char_offsets() {
        let text = "héllo wörld ünïcode テキスト";
        let chunks = chunker(6, 2).chunk("u", text);

        assert_eq!(chunks[0].text, "héllo ");
        assert_eq!(chunks[1].start_offset, 4);
        assert_eq!(reassemble(&chunks, 2), text);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 6);
        }
    }

    #[test]
    fn test_whitespace_snapping_respects_invariants() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let config = ChunkConfig::new(14, 3)
            .unwrap()
            .with_boundary(BoundaryPolicy::Whitespace);
        let chunks = TextChunker::new(config).chunk("greek", text);

        assert_eq!(chunks[0].text, "alpha beta ");
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.text.ends_with(' '), "chunk {:?}", chunk.text);
        }
        for chunk in &chunks {
            assert!(chunk.len_chars() <= 14);
        }
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_offset - pair[1].start_offset, 3);
        }
        assert_eq!(reassemble(&chunks, 3), text);
    }

    #[test]
    fn test_whitespace_snapping_without_whitespace_cuts_exactly() {
        let text = "x".repeat(30);
        let config = ChunkConfig::new(10, 2)
            .unwrap()
            .with_boundary(BoundaryPolicy::Whitespace);
        let chunks = TextChunker::new(config).chunk("x", &text);
        assert_eq!(chunks[0].end_offset, 10);
        assert_eq!(chunks[1].start_offset, 8);
    }

    #[test]
    fn test_chunk_documents_preserves_order() {
        let chunker = chunker(10, 2);
        let docs = vec![("a", "first document text"), ("b", ""), ("c", "third")];
        let chunked = chunker.chunk_documents(docs);

        assert_eq!(chunked.len(), 3);
        assert!(chunked[0].iter().all(|c| c.source_id == "a"));
        assert!(chunked[1].is_empty());
        assert_eq!(chunked[2][0].id, "c:0");
    }
}
