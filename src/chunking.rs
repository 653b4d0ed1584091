//! Chunking utilities for splitting extracted text into overlapping windows.
//!
//! Chunks are measured in Unicode scalar values (`char`s), never bytes or
//! locale-dependent word boundaries, so the same input always produces the
//! same chunk sequence. Every chunk offset is a char offset into the original
//! text.

use crate::error::{Error, Result};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Chunk window settings.
///
/// # Examples
///
/// ```
/// use ragnova::chunking::{ChunkingConfig, DEFAULT_CHUNK_SIZE};
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
/// assert!(config.validate().is_ok());
///
/// let bad = ChunkingConfig { chunk_size: 4, overlap: 4 };
/// assert!(bad.validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    /// Reject window settings that would not advance through the text.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfiguration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::InvalidConfiguration(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Distance in characters between the starts of adjacent chunks.
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }

    /// Split `text` from `source` using these settings.
    pub fn chunk(&self, source: &str, text: &str) -> Result<Vec<Chunk>> {
        chunk_text(source, text, self.chunk_size, self.overlap)
    }
}

/// A chunk of text from a larger document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text content.
    pub text: String,
    /// Identifier of the document the chunk was cut from.
    pub source: String,
    /// Char offset where this chunk starts in the original document.
    pub offset: usize,
    /// Zero-based chunk index within the document.
    pub index: usize,
}

impl Chunk {
    /// Number of characters covered by this chunk.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Split text into overlapping chunks.
///
/// Chunk `i` starts at char `i * (chunk_size - overlap)`. A chunk is emitted
/// for every start position inside the text, so the final chunks may be
/// shorter than `chunk_size` and every character is covered at least once.
///
/// # Examples
///
/// ```
/// use ragnova::chunking::chunk_text;
///
/// let chunks = chunk_text("doc", "abcdefgh", 4, 2).unwrap();
/// let offsets: Vec<usize> = chunks.iter().map(|c| c.offset).collect();
/// assert_eq!(offsets, vec![0, 2, 4, 6]);
/// assert_eq!(chunks[3].text, "gh");
///
/// assert!(chunk_text("doc", "", 4, 2).unwrap().is_empty());
/// assert!(chunk_text("doc", "abc", 0, 0).is_err());
/// ```
pub fn chunk_text(
    source: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    let config = ChunkingConfig {
        chunk_size,
        overlap,
    };
    config.validate()?;

    // char index -> byte index, with a trailing entry for the end of text
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = char_to_byte.len() - 1;

    let chunks = (0..char_count)
        .step_by(config.step())
        .enumerate()
        .map(|(index, start_char)| {
            let end_char = (start_char + chunk_size).min(char_count);
            Chunk {
                text: text[char_to_byte[start_char]..char_to_byte[end_char]]
                    .to_string(),
                source: source.to_string(),
                offset: start_char,
                index,
            }
        })
        .collect();

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn offsets_follow_step() {
        let chunks = chunk_text("doc", "abcdefgh", 4, 2).unwrap();
        let offsets: Vec<usize> = chunks.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0, 2, 4, 6]);

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "cdef", "efgh", "gh"]);
        assert!(chunks.iter().all(|c| c.source == "doc"));
    }

    #[test]
    fn repeated_calls_are_identical() {
        let a = chunk_text("doc", "abcdefgh", 4, 2).unwrap();
        let b = chunk_text("doc", "abcdefgh", 4, 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn short_text_single_chunk() {
        let chunks = chunk_text("doc", "Hello, world!", 1000, 200).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_text("doc", "", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let err = chunk_text("doc", "abc", 0, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(matches!(
            chunk_text("doc", "abc", 3, 3),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            chunk_text("doc", "abc", 3, 5),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn offsets_count_chars_not_bytes() {
        let text = "café ☕ naïve 日本語 🎉 ".repeat(10);
        let chunks = chunk_text("doc", &text, 7, 3).unwrap();

        let chars: Vec<char> = text.chars().collect();
        for chunk in &chunks {
            let expected: String =
                chars[chunk.offset..(chunk.offset + chunk.char_len())]
                    .iter()
                    .collect();
            assert_eq!(chunk.text, expected);
        }
    }

    #[test]
    fn end_to_end_sentence_split() {
        let chunks =
            chunk_text("doc1", "The cat sat. The dog ran.", 20, 5).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "The cat sat. The dog");
        assert_eq!(chunks[1].offset, 15);
        assert_eq!(chunks[1].text, "e dog ran.");
    }

    proptest! {
        #[test]
        fn chunks_cover_every_char(
            text in "\\PC{0,200}",
            chunk_size in 1usize..40,
            overlap_seed in 0usize..40,
        ) {
            let overlap = overlap_seed % chunk_size;
            let chunks = chunk_text("doc", &text, chunk_size, overlap).unwrap();
            let char_count = text.chars().count();

            let mut covered = vec![false; char_count];
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert_eq!(chunk.offset, i * (chunk_size - overlap));
                prop_assert!(chunk.char_len() <= chunk_size);
                for slot in
                    covered.iter_mut().skip(chunk.offset).take(chunk.char_len())
                {
                    *slot = true;
                }
            }
            prop_assert!(covered.iter().all(|c| *c));
            prop_assert_eq!(chunks.is_empty(), char_count == 0);
        }
    }
}
