//! Overlapping passage chunker with offsets back into the source text.
//!
//! Splitting and offset assignment are pure functions of the extracted text,
//! which is what makes the chunk stage safely re-runnable: the same input
//! always yields the same `chunks.json`.

pub mod hash;

pub use hash::{chunk_hash, normalize_line_endings};

use serde::{Deserialize, Serialize};

use crate::config::ChunkerSettings;

/// One chunk of an extracted document, as persisted in `chunks.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Identifier of the document this chunk was cut from.
    pub source_document: String,
    /// Zero-based position of the chunk within its document.
    pub chunk_index: usize,
    pub text: String,
    /// Byte offset of the chunk's first character in the extracted text.
    pub start_offset: usize,
    /// Byte offset one past the chunk's last character.
    pub end_offset: usize,
}

/// A chunk paired with its embedding vector, as persisted in
/// `embeddings.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkEmbedding {
    #[serde(flatten)]
    pub chunk: DocumentChunk,
    pub embedding: Vec<f32>,
}

/// Splits normalized text into overlapping word-boundary-snapped windows.
#[derive(Clone, Copy, Debug)]
pub struct TextChunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(ChunkerSettings::default())
    }
}

impl TextChunker {
    pub fn new(settings: ChunkerSettings) -> Self {
        let max_chars = settings.max_chars.max(1);
        Self {
            max_chars,
            // Overlap beyond half the window would stall the cursor.
            overlap_chars: settings.overlap_chars.min(max_chars / 2),
        }
    }

    /// Cut `text` into overlapping passages.
    ///
    /// Every returned passage is a trimmed substring of the input, so offset
    /// assignment can anchor it with a plain forward search. Windows prefer
    /// to break at whitespace; a window without any whitespace is cut hard at
    /// the size limit.
    pub fn split(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if text.len() <= self.max_chars {
            return vec![text.to_string()];
        }

        let len = text.len();
        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let mut end = (start + self.max_chars).min(len);
            while end < len && !text.is_char_boundary(end) {
                end -= 1;
            }
            if end < len {
                if let Some(ws) = text[start..end].rfind(char::is_whitespace) {
                    if ws > 0 {
                        end = start + ws;
                    }
                }
            }

            let piece = text[start..end].trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }
            if end >= len {
                break;
            }

            let mut next = end.saturating_sub(self.overlap_chars);
            while next > start && !text.is_char_boundary(next) {
                next -= 1;
            }
            // Start the overlap on a word boundary rather than mid-token.
            if let Some((idx, ch)) = text[next..end]
                .char_indices()
                .find(|(_, c)| c.is_whitespace())
            {
                next += idx + ch.len_utf8();
            }
            if next <= start {
                next = end;
            }
            start = next;
        }
        chunks
    }
}

/// Anchor each chunk to a byte range in its source text.
///
/// For chunk `i`, the start is the first occurrence of the chunk text at or
/// after the running cursor; when the text cannot be found (the chunker
/// trimmed or the source was pre-processed), the cursor position itself is
/// used. The cursor then advances to the chunk's end, which keeps overlapping
/// chunks anchored in document order.
pub fn assign_offsets(
    source_document: &str,
    source_text: &str,
    pieces: Vec<String>,
) -> Vec<DocumentChunk> {
    let mut cursor = 0usize;
    let mut out = Vec::with_capacity(pieces.len());
    for (chunk_index, text) in pieces.into_iter().enumerate() {
        let mut from = cursor.min(source_text.len());
        while from > 0 && !source_text.is_char_boundary(from) {
            from -= 1;
        }
        let start_offset = source_text[from..]
            .find(text.as_str())
            .map(|rel| from + rel)
            .unwrap_or(from);
        let end_offset = start_offset + text.len();
        cursor = end_offset;
        out.push(DocumentChunk {
            source_document: source_document.to_string(),
            chunk_index,
            text,
            start_offset,
            end_offset,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max: usize, overlap: usize) -> TextChunker {
        TextChunker::new(ChunkerSettings {
            max_chars: max,
            overlap_chars: overlap,
        })
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunker(100, 20).split("just one passage");
        assert_eq!(chunks, vec!["just one passage".to_string()]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunker(100, 20).split("   \n  ").is_empty());
    }

    #[test]
    fn windows_overlap_and_break_on_words() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = chunker(20, 8).split(text);
        assert!(chunks.len() > 2, "expected several windows: {chunks:?}");
        for chunk in &chunks {
            assert!(chunk.len() <= 20);
            assert!(!chunk.starts_with(' ') && !chunk.ends_with(' '));
            assert!(text.contains(chunk.as_str()), "not a substring: {chunk}");
        }
        // Consecutive windows share tail/head words.
        let first_tail = chunks[0].split_whitespace().last().unwrap();
        assert!(
            chunks[1].contains(first_tail),
            "no overlap between {:?} and {:?}",
            chunks[0],
            chunks[1]
        );
    }

    #[test]
    fn unbroken_text_is_cut_hard() {
        let text = "x".repeat(95);
        let chunks = chunker(40, 10).split(&text);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.len() <= 40));
    }

    #[test]
    fn split_is_deterministic() {
        let text = "one two three four five six seven eight nine ten ".repeat(8);
        let a = chunker(64, 16).split(&text);
        let b = chunker(64, 16).split(&text);
        assert_eq!(a, b);
    }

    #[test]
    fn offsets_anchor_disjoint_chunks_exactly() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let pieces = chunker(20, 0).split(text);
        let chunks = assign_offsets("doc", text, pieces);
        assert!(chunks.len() > 1);
        let mut cursor = 0;
        for chunk in &chunks {
            assert_eq!(&text[chunk.start_offset..chunk.end_offset], chunk.text);
            assert!(chunk.start_offset >= cursor);
            cursor = chunk.end_offset;
        }
        assert_eq!(chunks.last().unwrap().end_offset, text.len());
    }

    #[test]
    fn overlapping_chunk_falls_back_to_cursor() {
        // The second piece begins before the first piece's end, so the
        // forward search from the cursor cannot find it and the offset
        // degrades to the cursor position.
        let text = "alpha beta gamma";
        let pieces = vec!["alpha beta".to_string(), "beta gamma".to_string()];
        let chunks = assign_offsets("doc", text, pieces);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 10);
        assert_eq!(chunks[1].start_offset, 10);
        assert_eq!(chunks[1].end_offset, 20);
    }

    #[test]
    fn missing_piece_falls_back_to_cursor() {
        let chunks = assign_offsets(
            "doc",
            "the source text",
            vec!["not present anywhere".to_string()],
        );
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, "not present anywhere".len());
    }

    #[test]
    fn duplicate_pieces_advance_past_earlier_matches() {
        let text = "repeat repeat repeat";
        let pieces = vec!["repeat".to_string(), "repeat".to_string()];
        let chunks = assign_offsets("doc", text, pieces);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[1].start_offset, 7);
    }
}
