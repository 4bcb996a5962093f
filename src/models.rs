//! Core data models used throughout Lantern.
//!
//! These types represent the documents, chunks, and search hits that flow
//! through the ingestion and retrieval pipeline.

use serde::Serialize;

/// Document metadata stored in SQLite. Immutable once created; removed
/// only by whole-document deletion, which cascades to all owned chunks.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub doc_id: String,
    pub title: String,
    pub path: String,
    pub created_at: i64,
}

/// A persisted chunk of a document's extracted text, addressed by a
/// half-open range `[start_offset, end_offset)` into the document's
/// logical text. Invariant: `end_offset > start_offset`.
#[derive(Debug, Clone, Serialize)]
#[allow(dead_code)]
pub struct StoredChunk {
    pub id: i64,
    pub doc_id: String,
    pub start_offset: i64,
    pub end_offset: i64,
    pub page_number: Option<i64>,
    pub text: String,
}

/// Offset location attached to search hits and find matches.
#[derive(Debug, Clone, Serialize)]
pub struct Location {
    pub start_offset: i64,
    pub end_offset: i64,
    pub page_number: Option<i64>,
}

/// A ranked full-text search hit, recomputed per query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub doc_title: String,
    pub snippet: String,
    pub location: Location,
    pub relevance_score: f64,
}

/// A page-tagged run of extracted text, produced by the extractor before
/// chunking. Offsets index into the concatenation of all segment texts.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct PageSegment {
    pub page_number: i64,
    pub start_offset: usize,
    pub end_offset: usize,
    pub text: String,
}

/// Raw row returned by the store's full-text query, before snippet
/// generation turns it into a [`SearchHit`].
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct SearchRow {
    pub chunk_id: i64,
    pub doc_id: String,
    pub doc_title: String,
    pub text: String,
    pub start_offset: i64,
    pub end_offset: i64,
    pub page_number: Option<i64>,
    pub rank: f64,
}
