//! Document ingestion pipeline.
//!
//! Coordinates extraction → chunking → merge → storage for single files
//! or whole directories. A document and all of its chunks are written in
//! one transaction, so a failure mid-ingestion leaves no partial
//! document. Already-ingested doc ids are skipped.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::chunker::Chunker;
use crate::config::Config;
use crate::extract::extract_segments;
use crate::models::Document;
use crate::store::CorpusStore;

/// Outcome of ingesting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStatus {
    Success,
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub doc_id: String,
    pub path: String,
    pub status: IngestStatus,
    pub reason: Option<String>,
    pub chunks: u64,
}

/// Ingest a single file or every matching file under a directory.
pub async fn run_ingest(config: &Config, store: &CorpusStore, path: &Path) -> Result<()> {
    let reports = if path.is_dir() {
        ingest_directory(config, store, path).await?
    } else {
        vec![ingest_file(config, store, path, None, None).await]
    };

    let succeeded = reports
        .iter()
        .filter(|r| r.status == IngestStatus::Success)
        .count();
    let total_chunks: u64 = reports.iter().map(|r| r.chunks).sum();

    println!("ingest {}", path.display());
    for report in &reports {
        match report.status {
            IngestStatus::Success => {
                println!("  {} ({} chunks) ok", report.doc_id, report.chunks)
            }
            IngestStatus::Skipped => println!(
                "  {} skipped: {}",
                report.doc_id,
                report.reason.as_deref().unwrap_or("already exists")
            ),
            IngestStatus::Failed => println!(
                "  {} failed: {}",
                report.path,
                report.reason.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    println!("  ingested documents: {}/{}", succeeded, reports.len());
    println!("  chunks written: {}", total_chunks);
    println!("ok");

    Ok(())
}

async fn ingest_directory(
    config: &Config,
    store: &CorpusStore,
    dir: &Path,
) -> Result<Vec<IngestReport>> {
    let globs = document_globs()?;

    let mut reports = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        if !globs.is_match(rel) {
            continue;
        }
        reports.push(ingest_file(config, store, entry.path(), None, None).await);
    }

    Ok(reports)
}

fn document_globs() -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in ["**/*.pdf", "**/*.txt", "**/*.md"] {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Ingest one file. Never returns `Err`: every outcome is an
/// [`IngestReport`] so directory ingestion keeps going past bad files.
pub async fn ingest_file(
    config: &Config,
    store: &CorpusStore,
    path: &Path,
    doc_id: Option<String>,
    title: Option<String>,
) -> IngestReport {
    let doc_id = doc_id.unwrap_or_else(|| derive_doc_id(path));
    let title = title.unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .to_string()
    });

    let failed = |reason: String| IngestReport {
        doc_id: doc_id.clone(),
        path: path.display().to_string(),
        status: IngestStatus::Failed,
        reason: Some(reason),
        chunks: 0,
    };

    match store.document_exists(&doc_id).await {
        Ok(true) => {
            info!(doc_id = %doc_id, "document already ingested, skipping");
            return IngestReport {
                doc_id,
                path: path.display().to_string(),
                status: IngestStatus::Skipped,
                reason: Some("already exists".to_string()),
                chunks: 0,
            };
        }
        Ok(false) => {}
        Err(e) => return failed(e.to_string()),
    }

    let segments = match extract_segments(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(doc_id = %doc_id, error = %e, "extraction failed");
            return failed(e.to_string());
        }
    };

    let chunker = Chunker::new(
        config.chunking.chunk_size,
        config.chunking.overlap_size,
        config.chunking.min_chunk_size,
        config.chunking.respect_sentences,
    );
    let chunks = chunker.merge_small_chunks(chunker.chunk_segments(&segments));

    if chunks.is_empty() {
        return failed("no text extracted".to_string());
    }

    let doc = Document {
        doc_id: doc_id.clone(),
        title,
        path: path.display().to_string(),
        created_at: chrono::Utc::now().timestamp(),
    };

    match store.insert_document_with_chunks(&doc, &chunks).await {
        Ok(written) => {
            info!(doc_id = %doc_id, chunks = written, "ingested document");
            IngestReport {
                doc_id,
                path: path.display().to_string(),
                status: IngestStatus::Success,
                reason: None,
                chunks: written,
            }
        }
        Err(e) => failed(e.to_string()),
    }
}

/// Derive a stable document id from the file name plus a truncated hash
/// of the full path, so identically named files in different directories
/// stay distinct.
fn derive_doc_id(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");

    let mut hasher = Sha256::new();
    hasher.update(path.display().to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    format!("{}_{}", stem, &digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations;
    use crate::store::CorpusStore;

    fn test_config(db_path: &Path) -> Config {
        let toml = format!(
            r#"
[db]
path = "{}"

[chunking]
chunk_size = 120
overlap_size = 20
min_chunk_size = 10

[server]
bind = "127.0.0.1:0"
"#,
            db_path.display()
        );
        toml::from_str(&toml).unwrap()
    }

    async fn setup() -> (tempfile::TempDir, Config, CorpusStore) {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("corpus.sqlite");
        let config = test_config(&db_path);
        let pool = crate::db::connect(&db_path).await.unwrap();
        run_migrations(&pool).await.unwrap();
        (tmp, config, CorpusStore::new(pool))
    }

    #[test]
    fn doc_id_is_stable_and_path_sensitive() {
        let a = derive_doc_id(Path::new("/corpus/guide.pdf"));
        let b = derive_doc_id(Path::new("/corpus/guide.pdf"));
        let c = derive_doc_id(Path::new("/other/guide.pdf"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("guide_"));
    }

    #[tokio::test]
    async fn ingest_text_file_round_trips_through_store() {
        let (tmp, config, store) = setup().await;
        let file = tmp.path().join("aid.txt");
        std::fs::write(
            &file,
            "Check the scene for danger before approaching. Call for help early. \
             Apply firm pressure to any bleeding wound with a clean cloth.",
        )
        .unwrap();

        let report = ingest_file(&config, &store, &file, None, None).await;
        assert_eq!(report.status, IngestStatus::Success);
        assert!(report.chunks >= 1);

        let rows = store.search("bleeding wound", 5).await.unwrap();
        assert!(!rows.is_empty());
        assert_eq!(rows[0].doc_id, report.doc_id);
    }

    #[tokio::test]
    async fn reingest_is_skipped() {
        let (tmp, config, store) = setup().await;
        let file = tmp.path().join("aid.txt");
        std::fs::write(&file, "Cool a burn under running water for twenty minutes.").unwrap();

        let first = ingest_file(&config, &store, &file, None, None).await;
        assert_eq!(first.status, IngestStatus::Success);

        let second = ingest_file(&config, &store, &file, None, None).await;
        assert_eq!(second.status, IngestStatus::Skipped);
        assert_eq!(store.stats().await.unwrap().documents, 1);
    }

    #[tokio::test]
    async fn failed_extraction_leaves_no_partial_document() {
        let (tmp, config, store) = setup().await;
        let file = tmp.path().join("broken.pdf");
        std::fs::write(&file, b"not a pdf at all").unwrap();

        let report = ingest_file(&config, &store, &file, None, None).await;
        assert_eq!(report.status, IngestStatus::Failed);
        assert_eq!(store.stats().await.unwrap().documents, 0);
        assert_eq!(store.stats().await.unwrap().chunks, 0);
    }
}
