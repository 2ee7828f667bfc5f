//! Overlapping text chunker.
//!
//! Splits document body text into chunks bounded by a configurable
//! `max_chars` limit, with an optional overlap: the trailing
//! `overlap_chars` characters of each chunk reappear at the start of the
//! next one, preserving continuity of meaning across chunk boundaries
//! for retrieval and generation.
//!
//! Split points prefer paragraph breaks (`\n\n`), then line breaks, then
//! spaces; a single unit longer than the limit is hard-sliced rather
//! than dropped or emitted oversized. Stripped of overlaps, the chunks
//! concatenate back to the trimmed input exactly.
//!
//! Each stored chunk receives a UUID plus a SHA-256 hash of its text for
//! staleness detection.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Split `text` into ordered overlapping chunks.
///
/// Limits are measured in characters. Deterministic: identical input and
/// parameters always produce identical output.
///
/// # Errors
///
/// `overlap_chars >= max_chars` is a configuration error — each chunk
/// would then consist entirely of repeated text and chunking could not
/// make progress.
pub fn chunk_text(text: &str, max_chars: usize, overlap_chars: usize) -> Result<Vec<String>> {
    if max_chars == 0 {
        bail!("max_chars must be >= 1");
    }
    if overlap_chars >= max_chars {
        bail!(
            "overlap_chars ({}) must be smaller than max_chars ({})",
            overlap_chars,
            max_chars
        );
    }

    let chars: Vec<char> = text.trim().chars().collect();
    if chars.is_empty() {
        return Ok(Vec::new());
    }
    if chars.len() <= max_chars {
        return Ok(vec![chars.iter().collect()]);
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        // The first chunk uses the full limit; later chunks reserve room
        // for the overlap prefix carried over from the previous chunk.
        let budget = if chunks.is_empty() {
            max_chars
        } else {
            max_chars - overlap_chars
        };

        let mut end = (start + budget).min(chars.len());
        if end < chars.len() {
            if let Some(boundary) = natural_boundary(&chars, start, end) {
                end = boundary;
            }
            // No acceptable boundary: hard-slice at the limit.
        }

        let core: String = chars[start..end].iter().collect();
        if chunks.is_empty() || overlap_chars == 0 {
            chunks.push(core);
        } else {
            let prev = chunks.last().map(String::as_str).unwrap_or_default();
            let tail: String = prev
                .chars()
                .rev()
                .take(overlap_chars)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            chunks.push(format!("{}{}", tail, core));
        }

        start = end;
    }

    Ok(chunks)
}

/// Find the rightmost natural split point in `chars[start..end]`,
/// preferring a paragraph break, then a newline, then a space. Returns
/// the index just past the separator, or `None` when splitting there
/// would leave an empty core.
fn natural_boundary(chars: &[char], start: usize, end: usize) -> Option<usize> {
    let window = &chars[start..end];

    // Paragraph break: "\n\n" (possibly with intervening '\r').
    for i in (1..window.len()).rev() {
        if window[i] == '\n' && window[i - 1] == '\n' {
            let cut = start + i + 1;
            if cut > start {
                return Some(cut);
            }
        }
    }
    for i in (0..window.len()).rev() {
        if window[i] == '\n' {
            let cut = start + i + 1;
            if cut > start {
                return Some(cut);
            }
        }
    }
    for i in (0..window.len()).rev() {
        if window[i] == ' ' {
            let cut = start + i + 1;
            if cut > start {
                return Some(cut);
            }
        }
    }
    None
}

/// Chunk a document body into stored [`Chunk`] records with contiguous
/// sequence indices starting at 0.
pub fn chunk_document(document_id: &str, text: &str, cfg: &ChunkingConfig) -> Result<Vec<Chunk>> {
    let pieces = chunk_text(text, cfg.max_chars, cfg.overlap_chars)?;
    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(document_id, i as i64, &piece))
        .collect())
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        sequence_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Strip each chunk's overlap prefix and concatenate the cores.
    /// The prefix carried into a chunk is at most `overlap` characters,
    /// capped by the previous chunk's length.
    fn reconstruct(chunks: &[String], overlap: usize) -> String {
        let mut out = String::new();
        let mut prev_len = 0usize;
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 || overlap == 0 {
                out.push_str(chunk);
            } else {
                out.extend(chunk.chars().skip(overlap.min(prev_len)));
            }
            prev_len = chunk.chars().count();
        }
        out
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", 100, 0).unwrap().is_empty());
        assert!(chunk_text("   \n\n  ", 100, 0).unwrap().is_empty());
    }

    #[test]
    fn short_input_is_a_single_trimmed_chunk() {
        let chunks = chunk_text("Hello world", 100, 0).unwrap();
        assert_eq!(chunks, vec!["Hello world".to_string()]);

        let chunks = chunk_text("  padded  ", 100, 10).unwrap();
        assert_eq!(chunks, vec!["padded".to_string()]);
    }

    #[test]
    fn overlap_as_large_as_max_fails_fast() {
        assert!(chunk_text("some text", 10, 10).is_err());
        assert!(chunk_text("some text", 10, 11).is_err());
        assert!(chunk_text("some text", 0, 0).is_err());
    }

    #[test]
    fn splits_prefer_paragraph_boundaries() {
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let chunks = chunk_text(text, 30, 0).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "First paragraph here.\n\n");
        assert_eq!(chunks[1], "Second paragraph here.");
    }

    #[test]
    fn oversized_word_run_is_hard_sliced_not_dropped() {
        let text = "a".repeat(25);
        let chunks = chunk_text(&text, 10, 0).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(reconstruct(&chunks, 0), text);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 10);
        }
    }

    #[test]
    fn overlap_suffix_reappears_as_prefix() {
        let text = "The quick brown fox jumps over the lazy dog and keeps on running far away.";
        let overlap = 8;
        let chunks = chunk_text(text, 30, overlap).unwrap();
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let suffix: String = pair[0]
                .chars()
                .rev()
                .take(overlap)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            let prefix: String = pair[1].chars().take(overlap).collect();
            assert_eq!(suffix, prefix, "overlap broken between adjacent chunks");
        }
    }

    #[test]
    fn reconstruction_is_lossless_with_overlap() {
        let text = "Alpha beta gamma delta.\n\nEpsilon zeta eta theta iota kappa.\n\nLambda mu.";
        let chunks = chunk_text(text, 24, 6).unwrap();
        assert_eq!(reconstruct(&chunks, 6), text.trim());
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta and some longer trailing paragraph text";
        let a = chunk_text(text, 20, 5).unwrap();
        let b = chunk_text(text, 20, 5).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn document_chunks_have_contiguous_indices() {
        let cfg = ChunkingConfig {
            max_chars: 20,
            overlap_chars: 4,
        };
        let text = (0..30)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_document("doc1", &text, &cfg).unwrap();
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.sequence_index, i as i64);
            assert_eq!(c.document_id, "doc1");
        }
    }

    proptest! {
        #[test]
        fn prop_reconstruction_is_lossless(
            text in "[ -~\n]{1,400}",
            max in 1usize..60,
            overlap in 0usize..20,
        ) {
            prop_assume!(overlap < max);
            let chunks = chunk_text(&text, max, overlap).unwrap();
            prop_assert_eq!(reconstruct(&chunks, overlap), text.trim().to_string());
        }

        #[test]
        fn prop_first_chunk_respects_limit(
            text in "[ -~]{1,400}",
            max in 1usize..60,
        ) {
            let chunks = chunk_text(&text, max, 0).unwrap();
            for chunk in &chunks {
                prop_assert!(chunk.chars().count() <= max);
            }
        }
    }
}
