//! Corpus persistence: documents, offset-addressed chunks, and the FTS5
//! mirror kept transactionally in sync with chunk rows.
//!
//! The store exclusively owns document/chunk lifetime: rows are created
//! at ingestion and removed only by whole-document deletion, which takes
//! the chunks and index entries with it in one transaction.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::chunker::ChunkPiece;
use crate::models::{Document, SearchRow, StoredChunk};

#[derive(Debug, Clone)]
pub struct CorpusStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CorpusStats {
    pub documents: i64,
    pub chunks: i64,
}

impl CorpusStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn document_exists(&self, doc_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE doc_id = ?")
            .bind(doc_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Insert a document and all of its chunks (plus FTS mirror rows) in
    /// one transaction. Nothing is visible if any insert fails, so a
    /// failed ingestion leaves no partial document behind.
    pub async fn insert_document_with_chunks(
        &self,
        doc: &Document,
        chunks: &[ChunkPiece],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO documents (doc_id, title, path, created_at) VALUES (?, ?, ?, ?)")
            .bind(&doc.doc_id)
            .bind(&doc.title)
            .bind(&doc.path)
            .bind(doc.created_at)
            .execute(&mut *tx)
            .await?;

        let mut written = 0u64;
        for chunk in chunks {
            let page = chunk.page_numbers.first().copied();
            let result = sqlx::query(
                "INSERT INTO chunks (doc_id, start_offset, end_offset, page_number, text) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&doc.doc_id)
            .bind(chunk.start_offset as i64)
            .bind(chunk.end_offset as i64)
            .bind(page)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;

            let chunk_id = result.last_insert_rowid();
            sqlx::query("INSERT INTO chunks_fts (chunk_id, doc_id, text) VALUES (?, ?, ?)")
                .bind(chunk_id)
                .bind(&doc.doc_id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
            written += 1;
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Ranked full-text query over chunk text, joined with document
    /// metadata. Multi-word queries are OR-combined as individually
    /// quoted terms so any term may match. An empty sanitized query
    /// returns an empty list, never an error.
    pub async fn search(&self, query: &str, limit: i64) -> Result<Vec<SearchRow>> {
        let fts_query = match build_fts_query(query) {
            Some(q) => q,
            None => return Ok(Vec::new()),
        };

        let rows = sqlx::query(
            r#"
            SELECT
                c.id AS chunk_id,
                c.doc_id,
                c.text,
                c.start_offset,
                c.end_offset,
                c.page_number,
                d.title,
                rank
            FROM chunks_fts
            JOIN chunks c ON chunks_fts.chunk_id = c.id
            JOIN documents d ON c.doc_id = d.doc_id
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&fts_query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let results = rows
            .iter()
            .map(|row| SearchRow {
                chunk_id: row.get("chunk_id"),
                doc_id: row.get("doc_id"),
                doc_title: row.get("title"),
                text: row.get("text"),
                start_offset: row.get("start_offset"),
                end_offset: row.get("end_offset"),
                page_number: row.get("page_number"),
                rank: row.get("rank"),
            })
            .collect();

        Ok(results)
    }

    /// All chunks of a document intersecting `[start, end)`, ordered by
    /// start offset. `None` bounds are open-ended.
    pub async fn chunks_in_range(
        &self,
        doc_id: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<StoredChunk>> {
        let mut sql = String::from(
            "SELECT id, doc_id, start_offset, end_offset, page_number, text \
             FROM chunks WHERE doc_id = ?",
        );
        if start.is_some() {
            sql.push_str(" AND end_offset >= ?");
        }
        if end.is_some() {
            sql.push_str(" AND start_offset <= ?");
        }
        sql.push_str(" ORDER BY start_offset");

        let mut query = sqlx::query(&sql).bind(doc_id);
        if let Some(s) = start {
            query = query.bind(s);
        }
        if let Some(e) = end {
            query = query.bind(e);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let chunks = rows
            .iter()
            .map(|row| StoredChunk {
                id: row.get("id"),
                doc_id: row.get("doc_id"),
                start_offset: row.get("start_offset"),
                end_offset: row.get("end_offset"),
                page_number: row.get("page_number"),
                text: row.get("text"),
            })
            .collect();

        Ok(chunks)
    }

    pub async fn document_info(&self, doc_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT doc_id, title, path, created_at FROM documents WHERE doc_id = ?",
        )
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Document {
            doc_id: row.get("doc_id"),
            title: row.get("title"),
            path: row.get("path"),
            created_at: row.get("created_at"),
        }))
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows =
            sqlx::query("SELECT doc_id, title, path, created_at FROM documents ORDER BY title")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .iter()
            .map(|row| Document {
                doc_id: row.get("doc_id"),
                title: row.get("title"),
                path: row.get("path"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Delete a document, its chunks, and their FTS rows in one
    /// transaction. Returns whether a document row was removed.
    pub async fn delete_document(&self, doc_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks_fts WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM documents WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn stats(&self) -> Result<CorpusStats> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(CorpusStats { documents, chunks })
    }
}

/// Sanitize a user query for FTS5: punctuation becomes spaces, whitespace
/// collapses, and each remaining term is quoted. Multi-word queries are
/// OR-combined so any term may match, not only the exact phrase.
fn build_fts_query(query: &str) -> Option<String> {
    let sanitized: String = query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let terms: Vec<String> = sanitized
        .split_whitespace()
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
