//! Text extraction for corpus documents.
//!
//! PDF text comes out per page via `pdf-extract` so chunks can carry page
//! attribution; plain text and markdown are read as a single segment.
//! Extraction never panics: failures are returned as [`ExtractError`] and
//! the ingestion pipeline reports the file as failed.

use std::path::Path;

use crate::models::PageSegment;

/// Extraction error. Callers report and skip; nothing partial is stored.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFormat(String),
    Io(String),
    Pdf(String),
    NoText,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFormat(ext) => {
                write!(f, "unsupported document format: {}", ext)
            }
            ExtractError::Io(e) => write!(f, "failed to read document: {}", e),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::NoText => write!(f, "no text extracted"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract page-tagged text segments from a document on disk.
///
/// Segment offsets are character offsets into the concatenation of all
/// segment texts, the same logical-text coordinates the chunker and
/// every downstream citation use.
pub fn extract_segments(path: &Path) -> Result<Vec<PageSegment>, ExtractError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let segments = match ext.as_str() {
        "pdf" => extract_pdf(path)?,
        "txt" | "md" => extract_plain(path)?,
        other => return Err(ExtractError::UnsupportedFormat(other.to_string())),
    };

    if segments.is_empty() {
        return Err(ExtractError::NoText);
    }
    Ok(segments)
}

fn extract_pdf(path: &Path) -> Result<Vec<PageSegment>, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::Io(e.to_string()))?;
    let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let mut segments = Vec::new();
    let mut offset = 0usize;
    for (i, page_text) in pages.iter().enumerate() {
        if page_text.trim().is_empty() {
            continue;
        }
        let len = page_text.chars().count();
        segments.push(PageSegment {
            page_number: (i + 1) as i64,
            start_offset: offset,
            end_offset: offset + len,
            text: page_text.clone(),
        });
        offset += len;
    }
    Ok(segments)
}

fn extract_plain(path: &Path) -> Result<Vec<PageSegment>, ExtractError> {
    let text = std::fs::read_to_string(path).map_err(|e| ExtractError::Io(e.to_string()))?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let len = text.chars().count();
    Ok(vec![PageSegment {
        page_number: 1,
        start_offset: 0,
        end_offset: len,
        text,
    }])
}
