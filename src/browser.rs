//! The retrieval tool: the only capability surface offered to the model.
//!
//! Three methods over the corpus store (`search`, `open`, and `find`),
//! each returning a structured, serializable result. Failures are encoded
//! as `status: "error"` payloads rather than `Err`, so the orchestration
//! loop can hand them back to the model and callers can always render a
//! graceful message.
//!
//! All offsets are character offsets into a document's logical text, the
//! same coordinates the chunker produced at ingestion; `open` resolves a
//! requested window back to stored chunk text exactly, which is what
//! makes downstream citations verifiable.

use regex::RegexBuilder;
use serde::Serialize;
use tracing::warn;

use crate::models::{Location, SearchHit};
use crate::store::CorpusStore;

const SNIPPET_LENGTH: usize = 200;
const FIND_CONTEXT: usize = 50;

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchResponse {
    Success {
        query: String,
        total_results: usize,
        results: Vec<SearchHit>,
    },
    Error {
        query: String,
        error: String,
        results: Vec<SearchHit>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenLocation {
    pub start_offset: i64,
    pub end_offset: i64,
    pub actual_start: i64,
    pub actual_end: i64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OpenResponse {
    Success {
        doc_id: String,
        doc_title: String,
        text: String,
        location: OpenLocation,
        chunk_count: usize,
    },
    Error {
        doc_id: String,
        error: String,
        text: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct FindMatch {
    pub text: String,
    pub context: String,
    pub location: Location,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FindResponse {
    Success {
        doc_id: String,
        doc_title: String,
        pattern: String,
        search_after: i64,
        matches: Vec<FindMatch>,
        total_matches: usize,
    },
    Error {
        doc_id: String,
        pattern: String,
        error: String,
        matches: Vec<FindMatch>,
    },
}

/// Document corpus browser backed by the store.
#[derive(Debug, Clone)]
pub struct BrowserTool {
    store: CorpusStore,
}

impl BrowserTool {
    pub fn new(store: CorpusStore) -> Self {
        Self { store }
    }

    /// Search the corpus. Zero matches is a normal success; only a
    /// storage fault produces an error payload.
    pub async fn search(&self, q: &str, k: i64) -> SearchResponse {
        match self.store.search(q, k).await {
            Ok(rows) => {
                let results: Vec<SearchHit> = rows
                    .iter()
                    .map(|row| SearchHit {
                        doc_id: row.doc_id.clone(),
                        doc_title: row.doc_title.clone(),
                        snippet: create_snippet(&row.text, q, SNIPPET_LENGTH),
                        location: Location {
                            start_offset: row.start_offset,
                            end_offset: row.end_offset,
                            page_number: row.page_number,
                        },
                        relevance_score: -row.rank,
                    })
                    .collect();
                SearchResponse::Success {
                    query: q.to_string(),
                    total_results: results.len(),
                    results,
                }
            }
            Err(e) => {
                warn!(query = q, error = %e, "search failed");
                SearchResponse::Error {
                    query: q.to_string(),
                    error: e.to_string(),
                    results: Vec::new(),
                }
            }
        }
    }

    /// Open a specific text window of a document by offsets. Resolves all
    /// chunks intersecting `[start, end)`, trims to the requested
    /// boundary, and stitches them in offset order with an explicit gap
    /// marker between non-adjacent chunks.
    pub async fn open(&self, doc_id: &str, start: i64, end: i64) -> OpenResponse {
        let error = |msg: String| OpenResponse::Error {
            doc_id: doc_id.to_string(),
            error: msg,
            text: String::new(),
        };

        let info = match self.store.document_info(doc_id).await {
            Ok(Some(info)) => info,
            Ok(None) => return error("document not found".to_string()),
            Err(e) => {
                warn!(doc_id, error = %e, "open failed");
                return error(e.to_string());
            }
        };

        let chunks = match self.store.chunks_in_range(doc_id, Some(start), Some(end)).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(doc_id, error = %e, "open failed");
                return error(e.to_string());
            }
        };

        // Chunks exactly touching the boundary contribute no text; they
        // must not defeat the empty-range check.
        let intersecting: Vec<_> = chunks
            .into_iter()
            .filter(|c| c.end_offset > start && c.start_offset < end)
            .collect();

        if intersecting.is_empty() {
            return error(format!("no content found for range {}-{}", start, end));
        }

        let text = combine_chunks(&intersecting, start, end);

        OpenResponse::Success {
            doc_id: doc_id.to_string(),
            doc_title: info.title,
            text,
            location: OpenLocation {
                start_offset: start,
                end_offset: end,
                actual_start: intersecting[0].start_offset,
                actual_end: intersecting[intersecting.len() - 1].end_offset,
            },
            chunk_count: intersecting.len(),
        }
    }

    /// Case-insensitive literal search across chunks at or after `after`.
    /// Zero matches is success with an empty list.
    pub async fn find(&self, doc_id: &str, pattern: &str, after: i64) -> FindResponse {
        let error = |msg: String| FindResponse::Error {
            doc_id: doc_id.to_string(),
            pattern: pattern.to_string(),
            error: msg,
            matches: Vec::new(),
        };

        let chunks = match self.store.chunks_in_range(doc_id, Some(after), None).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(doc_id, error = %e, "find failed");
                return error(e.to_string());
            }
        };

        let doc_title = match self.store.document_info(doc_id).await {
            Ok(Some(info)) => info.title,
            Ok(None) => "Unknown".to_string(),
            Err(e) => {
                warn!(doc_id, error = %e, "find failed");
                return error(e.to_string());
            }
        };

        let mut matches = Vec::new();
        for chunk in &chunks {
            find_in_text(
                &chunk.text,
                pattern,
                chunk.start_offset,
                after,
                chunk.page_number,
                &mut matches,
            );
        }
        matches.sort_by_key(|m| m.location.start_offset);

        FindResponse::Success {
            doc_id: doc_id.to_string(),
            doc_title,
            pattern: pattern.to_string(),
            search_after: after,
            matches: matches.clone(),
            total_matches: matches.len(),
        }
    }
}

/// Slice a string by character positions.
fn char_slice(s: &str, from: usize, to: usize) -> String {
    s.chars().skip(from).take(to.saturating_sub(from)).collect()
}

/// Lowercase with a strict one-to-one character mapping, so positions in
/// the lowered text line up with positions in the original.
fn lower_preserving_positions(s: &str) -> String {
    s.chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect()
}

/// Build a word-boundary-aligned excerpt of ~`max_length` chars centered
/// on the first occurrence of any query term, with ellipses marking
/// truncation on either side.
fn create_snippet(text: &str, query: &str, max_length: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let text_lower = lower_preserving_positions(text);
    let lower_chars: Vec<char> = text_lower.chars().collect();

    let mut best_pos = 0usize;
    for term in query.to_lowercase().split_whitespace() {
        let term_chars: Vec<char> = term.chars().collect();
        if let Some(pos) = find_char_subslice(&lower_chars, &term_chars, 0) {
            best_pos = pos;
            break;
        }
    }

    let mut snippet_start = best_pos.saturating_sub(max_length / 2);
    let mut snippet_end = (snippet_start + max_length).min(len);

    // Nudge both boundaries to whitespace so words are never cut.
    if snippet_start > 0 {
        while snippet_start < len && chars[snippet_start] != ' ' {
            snippet_start += 1;
        }
        snippet_start = (snippet_start + 1).min(len);
    }
    snippet_end = snippet_end.max(snippet_start);
    if snippet_end < len {
        while snippet_end > snippet_start && chars[snippet_end] != ' ' {
            snippet_end -= 1;
        }
    }

    let mut snippet: String = chars[snippet_start..snippet_end].iter().collect();
    if snippet_start > 0 {
        snippet = format!("...{}", snippet);
    }
    if snippet_end < len {
        snippet = format!("{}...", snippet);
    }
    snippet.trim().to_string()
}

/// First position of `needle` in `haystack` at or after `from`
/// (character positions).
fn find_char_subslice(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// Stitch intersecting chunks into one continuous text for `[start, end)`.
/// The first and last chunks are trimmed to the requested boundary;
/// overlap between adjacent chunks is emitted once; a ` [...] ` marker is
/// inserted where stitched chunks are not adjacent.
fn combine_chunks(chunks: &[crate::models::StoredChunk], start: i64, end: i64) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut last_end = 0i64;

    for chunk in chunks {
        if chunk.end_offset <= start {
            continue;
        }
        if chunk.start_offset >= end {
            break;
        }

        let mut emit_from = chunk.start_offset.max(start);
        if !parts.is_empty() {
            emit_from = emit_from.max(last_end);
        }
        let emit_to = chunk.end_offset.min(end);
        if emit_from >= emit_to {
            continue;
        }

        if chunk.start_offset > last_end && !parts.is_empty() {
            parts.push(" [...] ".to_string());
        }

        parts.push(char_slice(
            &chunk.text,
            (emit_from - chunk.start_offset) as usize,
            (emit_to - chunk.start_offset) as usize,
        ));
        last_end = emit_to;
    }

    parts.concat()
}

/// Collect case-insensitive literal matches of `pattern` in one chunk's
/// text into `out`. The pattern is regex-escaped and compiled as a
/// case-insensitive matcher; if compilation fails, a plain lowercase
/// substring scan takes over.
fn find_in_text(
    text: &str,
    pattern: &str,
    chunk_start: i64,
    after: i64,
    page_number: Option<i64>,
    out: &mut Vec<FindMatch>,
) {
    if pattern.is_empty() {
        return;
    }

    let chars: Vec<char> = text.chars().collect();
    let pattern_len = pattern.chars().count();

    let push_match = |out: &mut Vec<FindMatch>, char_pos: usize| {
        let match_start = chunk_start + char_pos as i64;
        let match_end = match_start + pattern_len as i64;
        if match_start < after {
            return;
        }
        let context_start = char_pos.saturating_sub(FIND_CONTEXT);
        let context_end = (char_pos + pattern_len + FIND_CONTEXT).min(chars.len());
        out.push(FindMatch {
            text: chars[char_pos..(char_pos + pattern_len).min(chars.len())]
                .iter()
                .collect(),
            context: chars[context_start..context_end].iter().collect(),
            location: Location {
                start_offset: match_start,
                end_offset: match_end,
                page_number,
            },
        });
    };

    let matcher = RegexBuilder::new(&regex::escape(pattern))
        .case_insensitive(true)
        .build();

    match matcher {
        Ok(re) => {
            for m in re.find_iter(text) {
                let char_pos = text[..m.start()].chars().count();
                push_match(out, char_pos);
            }
        }
        Err(e) => {
            warn!(pattern, error = %e, "pattern matcher failed, using substring scan");
            let lower: Vec<char> = lower_preserving_positions(text).chars().collect();
            let needle: Vec<char> = pattern.to_lowercase().chars().collect();
            let mut from = 0usize;
            while let Some(pos) = find_char_subslice(&lower, &needle, from) {
                push_match(out, pos);
                from = pos + 1;
            }
        }
    }
}
