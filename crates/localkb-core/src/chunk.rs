//! Boundary-aware text chunker.
//!
//! Splits a document's text into passages no longer than a configurable
//! `max_tokens` budget, preferring the most natural break available.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Split text on `\n\n` paragraph boundaries and pack whole paragraphs
//!    into a buffer until the next one would overflow it.
//! 3. A paragraph that alone exceeds `max_chars` is split into sentences
//!    (`.`, `!`, `?` followed by whitespace), which are packed the same way.
//! 4. A sentence that alone exceeds `max_chars` is hard-split at the last
//!    space or newline inside the window. Consecutive hard-split windows
//!    share `overlap_tokens` worth of trailing text.
//! 5. Empty or whitespace-only text produces no chunks.
//!
//! # Example
//!
//! ```rust
//! use localkb_core::chunk::{split_text, ChunkParams};
//!
//! let pieces = split_text("Hello world.\n\nSecond paragraph.", ChunkParams::new(256, 0));
//! assert_eq!(pieces, vec!["Hello world.\n\nSecond paragraph.".to_string()]);
//! ```

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Size limits for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl ChunkParams {
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_tokens,
            overlap_tokens,
        }
    }

    pub fn max_chars(&self) -> usize {
        (self.max_tokens * CHARS_PER_TOKEN).max(1)
    }

    /// Overlap is capped at half a window so hard splits always advance.
    pub fn overlap_chars(&self) -> usize {
        (self.overlap_tokens * CHARS_PER_TOKEN).min(self.max_chars() / 2)
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self::new(256, 0)
    }
}

/// Split one document into [`Chunk`]s with contiguous indices from 0.
pub fn chunk_document(
    source: &Path,
    filename: &str,
    text: &str,
    params: ChunkParams,
) -> Vec<Chunk> {
    split_text(text, params)
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| Chunk {
            source: source.to_path_buf(),
            filename: filename.to_string(),
            chunk_index,
            hash: hash_text(&text),
            text,
        })
        .collect()
}

/// Split text into passages of at most `params.max_chars()` bytes.
///
/// Hard-split windows may carry up to `params.overlap_chars()` bytes of
/// the previous window; every other passage is disjoint.
pub fn split_text(text: &str, params: ChunkParams) -> Vec<String> {
    let max_chars = params.max_chars();
    let overlap_chars = params.overlap_chars();

    let normalized = text.replace("\r\n", "\n");
    if normalized.trim().is_empty() {
        return Vec::new();
    }

    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in normalized.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.len() > max_chars {
            flush(&mut pieces, &mut current_buf);
            split_paragraph(trimmed, max_chars, overlap_chars, &mut pieces);
            continue;
        }

        push_packed(&mut pieces, &mut current_buf, trimmed, "\n\n", max_chars);
    }

    flush(&mut pieces, &mut current_buf);
    pieces
}

/// Pack sentences of an oversized paragraph, hard-splitting any sentence
/// that is itself too long.
fn split_paragraph(para: &str, max_chars: usize, overlap_chars: usize, pieces: &mut Vec<String>) {
    let mut current_buf = String::new();
    for sentence in split_sentences(para) {
        if sentence.len() > max_chars {
            flush(pieces, &mut current_buf);
            pieces.extend(hard_split(sentence, max_chars, overlap_chars));
            continue;
        }
        push_packed(pieces, &mut current_buf, sentence, " ", max_chars);
    }
    flush(pieces, &mut current_buf);
}

fn push_packed(
    pieces: &mut Vec<String>,
    current_buf: &mut String,
    part: &str,
    separator: &str,
    max_chars: usize,
) {
    let would_be = if current_buf.is_empty() {
        part.len()
    } else {
        current_buf.len() + separator.len() + part.len()
    };
    if would_be > max_chars {
        flush(pieces, current_buf);
    }
    if !current_buf.is_empty() {
        current_buf.push_str(separator);
    }
    current_buf.push_str(part);
}

fn flush(pieces: &mut Vec<String>, current_buf: &mut String) {
    if !current_buf.is_empty() {
        pieces.push(std::mem::take(current_buf));
    }
}

/// Split on sentence terminators followed by whitespace. Returned slices
/// are trimmed and non-empty.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    let end = i + c.len_utf8();
                    let sentence = text[start..end].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    start = end;
                }
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Fixed-width fallback: cut at the last space/newline inside each window.
fn hard_split(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            let piece = remaining.trim();
            if !piece.is_empty() {
                pieces.push(piece.to_string());
            }
            break;
        }

        let limit = snap_to_char_boundary(remaining, max_chars);
        let limit = if limit == 0 {
            next_char_boundary(remaining)
        } else {
            limit
        };
        let cut = match remaining[..limit].rfind(|c: char| c == ' ' || c == '\n' || c == '\t') {
            Some(pos) if pos > 0 => pos + 1,
            _ => limit,
        };

        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }

        let next = if overlap_chars > 0 {
            let back = snap_to_char_boundary(remaining, cut.saturating_sub(overlap_chars));
            // Start the overlap on a word boundary when one exists.
            let back = remaining[back..cut]
                .find(' ')
                .map(|p| back + p + 1)
                .filter(|&b| b < cut)
                .unwrap_or(back);
            if back == 0 {
                cut
            } else {
                back
            }
        } else {
            cut
        };
        remaining = &remaining[next..];
    }

    pieces
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(s: &str) -> usize {
    s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
}

/// Hex-encoded SHA-256 of a chunk's text.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn words(s: &str) -> Vec<&str> {
        s.split_whitespace().collect()
    }

    #[test]
    fn test_small_text_single_chunk() {
        let pieces = split_text("Hello, world!", ChunkParams::new(256, 0));
        assert_eq!(pieces, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(split_text("", ChunkParams::default()).is_empty());
        assert!(split_text(" \n\n\t \n", ChunkParams::default()).is_empty());
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let pieces = split_text(text, ChunkParams::new(256, 0));
        assert_eq!(pieces.len(), 1);
        assert!(pieces[0].contains("First paragraph."));
        assert!(pieces[0].contains("Third paragraph."));
    }

    #[test]
    fn test_paragraphs_exceeding_limit_split_on_paragraphs() {
        // 30 chars per paragraph, limit 8 tokens = 32 chars.
        let text = concat!(
            "This is paragraph number one.\n\n",
            "This is paragraph number two.\n\n",
            "This is paragraph number 3."
        );
        let pieces = split_text(text, ChunkParams::new(8, 0));
        assert_eq!(
            pieces,
            vec![
                "This is paragraph number one.",
                "This is paragraph number two.",
                "This is paragraph number 3.",
            ]
        );
    }

    #[test]
    fn test_prefers_sentence_breaks() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota.";
        let pieces = split_text(text, ChunkParams::new(5, 0));
        assert_eq!(
            pieces,
            vec!["Alpha beta gamma.", "Delta epsilon zeta.", "Eta theta iota."]
        );
    }

    #[test]
    fn test_hard_split_covers_all_words() {
        let text = (0..60)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let params = ChunkParams::new(5, 0);
        let pieces = split_text(&text, params);
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.len() <= params.max_chars(), "piece too long: {:?}", p);
        }
        let rejoined = pieces.join(" ");
        assert_eq!(words(&rejoined), words(&text));
    }

    #[test]
    fn test_hard_split_overlap_repeats_tail() {
        let text = (0..40)
            .map(|i| format!("w{:02}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let pieces = split_text(&text, ChunkParams::new(5, 2));
        assert!(pieces.len() > 1);
        for pair in pieces.windows(2) {
            let last_word = *words(&pair[0]).last().unwrap();
            assert!(
                words(&pair[1]).contains(&last_word),
                "expected {:?} to overlap {:?}",
                pair[1],
                pair[0]
            );
        }
        assert_eq!(*words(pieces.last().unwrap()).last().unwrap(), "w39");
    }

    #[test]
    fn test_trailing_content_not_dropped() {
        let text = format!("{}\n\ntail", "x".repeat(100));
        let pieces = split_text(&text, ChunkParams::new(5, 0));
        assert_eq!(pieces.last().unwrap(), "tail");
        let total_x: usize = pieces.iter().map(|p| p.matches('x').count()).sum();
        assert_eq!(total_x, 100);
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let pieces = split_text(text, ChunkParams::new(3, 1));
        assert!(!pieces.is_empty());
        for p in &pieces {
            assert!(!p.is_empty());
        }
    }

    #[test]
    fn test_chunk_document_indices_and_hashes() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let source = PathBuf::from("/kb/local_kb/doc.txt");
        let chunks = chunk_document(&source, "doc.txt", &text, ChunkParams::new(10, 0));
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.source, source);
            assert_eq!(c.filename, "doc.txt");
            assert_eq!(c.hash, hash_text(&c.text));
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let params = ChunkParams::new(2, 0);
        assert_eq!(split_text(text, params), split_text(text, params));
    }
}
