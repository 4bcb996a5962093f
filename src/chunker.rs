//! Sliding-window text chunker with stable offsets.
//!
//! Splits extracted document text into overlapping chunks addressed by
//! character offsets into the document's logical text, so every citation
//! produced downstream can be resolved back to the exact source span.
//! Window ends snap to sentence boundaries when possible, falling back to
//! paragraph breaks, then to a hard cut at the target position.
//!
//! Offsets are character offsets (not bytes) so that multi-byte input
//! never lands a cut inside a UTF-8 sequence.

use crate::models::PageSegment;

/// A chunk produced by the chunker, before persistence assigns row ids.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub chunk_index: usize,
    /// Sorted, deduplicated pages this chunk spans (empty for untagged input).
    pub page_numbers: Vec<i64>,
}

/// Chunks text with a configurable window size and overlap.
#[derive(Debug, Clone)]
pub struct Chunker {
    pub chunk_size: usize,
    pub overlap_size: usize,
    pub min_chunk_size: usize,
    pub respect_sentences: bool,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap_size: 200,
            min_chunk_size: 100,
            respect_sentences: true,
        }
    }
}

impl Chunker {
    pub fn new(
        chunk_size: usize,
        overlap_size: usize,
        min_chunk_size: usize,
        respect_sentences: bool,
    ) -> Self {
        Self {
            chunk_size,
            overlap_size,
            min_chunk_size,
            respect_sentences,
        }
    }

    /// Split `text` into overlapping chunks.
    ///
    /// The start offset of each chunk is strictly greater than the
    /// previous chunk's: when the overlap step fails to advance
    /// (`overlap_size >= chunk_size`), the window is forced forward by
    /// half a chunk so chunking always terminates.
    pub fn chunk_text(&self, text: &str) -> Vec<ChunkPiece> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();

        if len == 0 {
            return Vec::new();
        }
        if len < self.min_chunk_size {
            return vec![ChunkPiece {
                text: text.to_string(),
                start_offset: 0,
                end_offset: len,
                chunk_index: 0,
                page_numbers: Vec::new(),
            }];
        }

        let mut chunks = Vec::new();
        let mut chunk_index = 0usize;
        let mut start = 0usize;

        while start < len {
            let mut end = (start + self.chunk_size).min(len);

            if end < len && self.respect_sentences {
                end = self.find_boundary(&chars, start, end);
            }

            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();

            if trimmed.is_empty() {
                start = end;
                continue;
            }

            let trimmed_len = trimmed.chars().count();
            chunks.push(ChunkPiece {
                text: trimmed.to_string(),
                start_offset: start,
                end_offset: start + trimmed_len,
                chunk_index,
                page_numbers: Vec::new(),
            });
            chunk_index += 1;

            if end >= len {
                break;
            }

            let next_start = end.saturating_sub(self.overlap_size);
            // Hard forward-progress guarantee for overlap >= chunk size.
            start = if next_start <= start {
                start + (self.chunk_size / 2).max(1)
            } else {
                next_start
            };
        }

        chunks
    }

    /// Chunk text assembled from page-tagged segments, attaching to each
    /// chunk the sorted set of pages it spans.
    pub fn chunk_segments(&self, segments: &[PageSegment]) -> Vec<ChunkPiece> {
        if segments.is_empty() {
            return Vec::new();
        }

        let full_text: String = segments.iter().map(|s| s.text.as_str()).collect();

        // Offset -> page map over the concatenated text.
        let total: usize = segments.iter().map(|s| s.text.chars().count()).sum();
        let mut page_of = vec![None; total];
        let mut offset = 0usize;
        for segment in segments {
            let seg_len = segment.text.chars().count();
            for slot in page_of.iter_mut().skip(offset).take(seg_len) {
                *slot = Some(segment.page_number);
            }
            offset += seg_len;
        }

        let mut chunks = self.chunk_text(&full_text);
        for chunk in &mut chunks {
            let mut pages: Vec<i64> = page_of
                [chunk.start_offset..chunk.end_offset.min(page_of.len())]
                .iter()
                .flatten()
                .copied()
                .collect();
            pages.sort_unstable();
            pages.dedup();
            chunk.page_numbers = pages;
        }

        chunks
    }

    /// Fold chunks shorter than `min_chunk_size` into their predecessor,
    /// joining text with a space, unioning page numbers, and extending the
    /// end offset. Reindexes sequentially from 0. Idempotent on sequences
    /// that are already merged.
    pub fn merge_small_chunks(&self, chunks: Vec<ChunkPiece>) -> Vec<ChunkPiece> {
        let mut merged: Vec<ChunkPiece> = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let too_small = chunk.text.chars().count() < self.min_chunk_size;
            if too_small {
                if let Some(prev) = merged.last_mut() {
                    prev.text.push(' ');
                    prev.text.push_str(&chunk.text);
                    prev.end_offset = chunk.end_offset;
                    prev.page_numbers.extend(chunk.page_numbers);
                    prev.page_numbers.sort_unstable();
                    prev.page_numbers.dedup();
                    continue;
                }
            }
            merged.push(chunk);
        }

        for (i, chunk) in merged.iter_mut().enumerate() {
            chunk.chunk_index = i;
        }

        merged
    }

    /// Find the best cut position near `target`, searching
    /// `[target-200, target+100]` (clamped to the chunk interior) for the
    /// sentence ending closest to, but not far past, the target. Falls
    /// back to a paragraph break, then to `target` itself.
    fn find_boundary(&self, chars: &[char], start: usize, target: usize) -> usize {
        let search_start = (start + self.min_chunk_size).max(target.saturating_sub(200));
        let search_end = (target + 100).min(chars.len());
        if search_start >= search_end {
            return target;
        }

        let limit = target + 50;

        let mut best: Option<usize> = None;
        let mut best_distance = usize::MAX;
        for pos in sentence_endings(chars, search_start, search_end) {
            if pos > limit {
                continue;
            }
            let distance = pos.abs_diff(target);
            if distance < best_distance {
                best_distance = distance;
                best = Some(pos);
            }
        }
        if let Some(pos) = best {
            return pos;
        }

        for pos in paragraph_breaks(chars, search_start, search_end) {
            if pos <= limit {
                return pos;
            }
        }

        target
    }
}

/// Positions just past each sentence ending (`[.!?]+` followed by
/// whitespace) within `[from, to)`, including the trailing whitespace run.
fn sentence_endings(chars: &[char], from: usize, to: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut i = from;
    while i < to {
        if matches!(chars[i], '.' | '!' | '?') {
            let mut j = i + 1;
            while j < to && matches!(chars[j], '.' | '!' | '?') {
                j += 1;
            }
            let ws_start = j;
            while j < to && chars[j].is_whitespace() {
                j += 1;
            }
            if j > ws_start {
                out.push(j);
            }
            i = j.max(i + 1);
        } else {
            i += 1;
        }
    }
    out
}

/// Positions just past each paragraph break (newline, optional blank
/// space, newline) within `[from, to)`.
fn paragraph_breaks(chars: &[char], from: usize, to: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut i = from;
    while i < to {
        if chars[i] == '\n' {
            let mut j = i + 1;
            while j < to && chars[j].is_whitespace() && chars[j] != '\n' {
                j += 1;
            }
            if j < to && chars[j] == '\n' {
                out.push(j + 1);
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(chunk_size: usize, overlap: usize) -> Chunker {
        Chunker::new(chunk_size, overlap, 10, true)
    }

    fn sample_text(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("This is sentence number {} in the sample. ", i))
            .collect()
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunker(100, 20).chunk_text("").is_empty());
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunks = chunker(100, 20).chunk_text("tiny");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 4);
        assert_eq!(chunks[0].text, "tiny");
    }

    #[test]
    fn offsets_strictly_increase() {
        let text = sample_text(100);
        let chunks = chunker(200, 50).chunk_text(&text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(
                pair[1].start_offset > pair[0].start_offset,
                "start {} did not advance past {}",
                pair[1].start_offset,
                pair[0].start_offset
            );
        }
    }

    #[test]
    fn terminates_when_overlap_exceeds_chunk_size() {
        let text = sample_text(50);
        // Degenerate configuration: overlap >= chunk_size must still
        // terminate via the forced-progress step.
        let chunks = chunker(100, 150).chunk_text(&text);
        assert!(!chunks.is_empty());
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset > pair[0].start_offset);
        }
    }

    #[test]
    fn chunk_count_is_linear_in_text_length() {
        let text = sample_text(200);
        let len = text.chars().count();
        let chunks = chunker(200, 50).chunk_text(&text);
        // Effective stride is at least chunk_size/2 (forced progress), so
        // the chunk count is bounded by ~2 * len / chunk_size plus slack.
        assert!(chunks.len() <= 2 * len / 200 + 2);
    }

    #[test]
    fn ends_do_not_exceed_offsets() {
        let text = sample_text(40);
        for chunk in chunker(150, 30).chunk_text(&text) {
            assert!(chunk.end_offset > chunk.start_offset);
            assert_eq!(
                chunk.end_offset - chunk.start_offset,
                chunk.text.chars().count()
            );
        }
    }

    #[test]
    fn respects_sentence_boundaries() {
        let text = sample_text(30);
        let chunks = chunker(120, 20).chunk_text(&text);
        // Interior chunks should end at sentence punctuation once trailing
        // whitespace is trimmed.
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                chunk.text.ends_with('.'),
                "chunk did not end at a sentence boundary: {:?}",
                &chunk.text[chunk.text.len().saturating_sub(20)..]
            );
        }
    }

    #[test]
    fn hard_cut_without_sentences() {
        let text: String = "x".repeat(500);
        let chunks = Chunker::new(100, 0, 10, true).chunk_text(&text);
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].end_offset, 100);
    }

    #[test]
    fn segments_attach_sorted_unique_pages() {
        let segments = vec![
            PageSegment {
                page_number: 1,
                start_offset: 0,
                end_offset: 60,
                text: sample_text(2)[..60].to_string(),
            },
            PageSegment {
                page_number: 2,
                start_offset: 60,
                end_offset: 120,
                text: sample_text(2)[..60].to_string(),
            },
        ];
        let chunks = Chunker::new(200, 0, 10, false).chunk_segments(&segments);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_numbers, vec![1, 2]);
    }

    #[test]
    fn merge_folds_small_chunks_into_predecessor() {
        let chunks = vec![
            ChunkPiece {
                text: "a".repeat(50),
                start_offset: 0,
                end_offset: 50,
                chunk_index: 0,
                page_numbers: vec![1],
            },
            ChunkPiece {
                text: "tail".to_string(),
                start_offset: 50,
                end_offset: 54,
                chunk_index: 1,
                page_numbers: vec![2],
            },
        ];
        let merged = Chunker::new(100, 0, 10, true).merge_small_chunks(chunks);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].text.ends_with(" tail"));
        assert_eq!(merged[0].end_offset, 54);
        assert_eq!(merged[0].page_numbers, vec![1, 2]);
    }

    #[test]
    fn merge_is_idempotent() {
        let chunks = vec![
            ChunkPiece {
                text: "a".repeat(50),
                start_offset: 0,
                end_offset: 50,
                chunk_index: 0,
                page_numbers: vec![],
            },
            ChunkPiece {
                text: "b".to_string(),
                start_offset: 50,
                end_offset: 51,
                chunk_index: 1,
                page_numbers: vec![],
            },
            ChunkPiece {
                text: "c".repeat(40),
                start_offset: 51,
                end_offset: 91,
                chunk_index: 2,
                page_numbers: vec![],
            },
        ];
        let c = Chunker::new(100, 0, 10, true);
        let once = c.merge_small_chunks(chunks);
        let twice = c.merge_small_chunks(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_reindexes_from_zero() {
        let chunks: Vec<ChunkPiece> = (0..4)
            .map(|i| ChunkPiece {
                text: "long enough chunk text".to_string(),
                start_offset: i * 25,
                end_offset: i * 25 + 22,
                chunk_index: i + 7,
                page_numbers: vec![],
            })
            .collect();
        let merged = Chunker::new(100, 0, 10, true).merge_small_chunks(chunks);
        for (i, chunk) in merged.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn multibyte_text_does_not_split_characters() {
        let text = "åäö ".repeat(100);
        let chunks = chunker(50, 10).chunk_text(&text);
        assert!(!chunks.is_empty());
        for chunk in chunks {
            assert_eq!(
                chunk.end_offset - chunk.start_offset,
                chunk.text.chars().count()
            );
        }
    }
}
