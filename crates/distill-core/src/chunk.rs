//! Fixed-width text chunker.
//!
//! Splits span text into [`Chunk`]s of at most `max_chars` characters
//! (Unicode scalar values, not bytes). Unlike a paragraph-aware splitter,
//! chunks are cut at exact character offsets so that concatenating them
//! reproduces the input byte for byte.
//!
//! # Guarantees
//!
//! - Text of `L` characters over the threshold `T` yields `ceil(L / T)`
//!   chunks; anything at or under the threshold yields exactly one.
//! - Empty text yields exactly one empty chunk, so every span owns at least
//!   one chunk. This is the only case where a chunk may be empty.
//! - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
//! - Chunk ids are UUIDv5 values derived from the span id and index, so
//!   re-chunking identical input produces identical chunks.
//!
//! # Example
//!
//! ```rust
//! use distill_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("span-1", &"a".repeat(7000), 3000).unwrap();
//! assert_eq!(chunks.len(), 3);
//! assert_eq!(chunks[2].chunk_index, 2);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::models::Chunk;

/// Default chunk threshold in characters.
pub const DEFAULT_MAX_CHARS: usize = 3000;

/// Split `text` into consecutive slices of at most `max_chars` characters.
pub fn split_text(text: &str, max_chars: usize) -> Result<Vec<&str>, ValidationError> {
    if max_chars == 0 {
        return Err(ValidationError::ZeroThreshold);
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (idx, _) in text.char_indices() {
        if count == max_chars {
            pieces.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    pieces.push(&text[start..]);

    Ok(pieces)
}

/// Split a span's text into [`Chunk`]s with contiguous indices.
pub fn chunk_text(
    span_id: &str,
    text: &str,
    max_chars: usize,
) -> Result<Vec<Chunk>, ValidationError> {
    Ok(split_text(text, max_chars)?
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(span_id, i as i64, piece))
        .collect())
}

/// Deterministic chunk id for `(span_id, index)`.
pub fn chunk_id(span_id: &str, index: i64) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("chunk:{}:{}", span_id, index).as_bytes(),
    )
    .to_string()
}

/// SHA-256 hex digest of `text`.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(span_id: &str, index: i64, text: &str) -> Chunk {
    Chunk {
        id: chunk_id(span_id, index),
        span_id: span_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: hash_text(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_count(len: usize, max: usize) -> usize {
        if len == 0 {
            1
        } else {
            len.div_ceil(max)
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("s1", "Hello, world!", 3000).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text_yields_one_empty_chunk() {
        let chunks = chunk_text("s1", "", 3000).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert!(chunks[0].text.is_empty());
    }

    #[test]
    fn test_exact_threshold_is_one_chunk() {
        let text = "x".repeat(3000);
        assert_eq!(split_text(&text, 3000).unwrap().len(), 1);
    }

    #[test]
    fn test_seven_thousand_chars() {
        let text = "abcdefg".repeat(1000);
        let chunks = chunk_text("s1", &text, 3000).unwrap();
        assert_eq!(chunks.len(), 3);
        let lens: Vec<usize> = chunks.iter().map(|c| c.text.chars().count()).collect();
        assert_eq!(lens, vec![3000, 3000, 1000]);
        let indices: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_lossless_and_bounded_across_lengths() {
        let base = "The quick brown fox jumps over the lazy dog. ";
        for len in [1usize, 9, 10, 11, 99, 100, 101, 257] {
            let text: String = base.chars().cycle().take(len).collect();
            for max in [1usize, 3, 10, 64] {
                let pieces = split_text(&text, max).unwrap();
                assert_eq!(pieces.len(), expected_count(len, max), "len={} max={}", len, max);
                assert_eq!(pieces.concat(), text);
                assert!(pieces.iter().all(|p| !p.is_empty()));
                assert!(pieces.iter().all(|p| p.chars().count() <= max));
            }
        }
    }

    #[test]
    fn test_multibyte_counts_characters() {
        let text = "┌──┐│é│└──┘";
        let pieces = split_text(text, 4).unwrap();
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces.concat(), text);
        assert!(pieces.iter().all(|p| p.chars().count() <= 4));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        assert_eq!(
            split_text("abc", 0).unwrap_err(),
            ValidationError::ZeroThreshold
        );
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha Beta Gamma Delta ".repeat(50);
        let c1 = chunk_text("s1", &text, 64).unwrap();
        let c2 = chunk_text("s1", &text, 64).unwrap();
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_chunk_ids_depend_on_span() {
        assert_ne!(chunk_id("s1", 0), chunk_id("s2", 0));
        assert_ne!(chunk_id("s1", 0), chunk_id("s1", 1));
    }
}
