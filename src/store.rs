//! Chunk store: documents, chunk trees, and the closure table.
//!
//! Persists whole documents at a time — the unit of mutation is a document,
//! never an individual chunk. Ancestor/descendant queries go through the
//! fully materialized `chunk_closure` table, so tree walks cost one indexed
//! lookup regardless of depth.
//!
//! All multi-row writes are transactional: a failed batch leaves the store
//! exactly as it was. Structural contradictions (missing parent, depth
//! mismatch, duplicate sibling path) surface as `InvariantViolation` and
//! are never silently corrected.

use std::collections::{HashMap, HashSet};

use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::{RagError, Result};
use crate::models::{Chunk, ChunkKind, Document, IndexingLayer};
use crate::path::HierarchyPath;

/// Document header as stored in the `documents` table.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: String,
    pub title: String,
    pub source_file: String,
    pub law_category: Option<String>,
    pub version: Option<String>,
    pub total_chars: i64,
    pub chunk_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone)]
pub struct ChunkStore {
    pool: SqlitePool,
}

impl ChunkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the document row, cascading-deleting any prior document with
    /// the same id first.
    pub async fn save_document(&self, doc: &Document) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_document_tx(&mut *tx, doc).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Inserts a document's chunks in one transaction after validating the
    /// tree invariants. Rejects the whole batch on the first violation.
    pub async fn save_chunks_batch(&self, chunks: &[Chunk]) -> Result<()> {
        validate_tree(chunks)?;
        let mut tx = self.pool.begin().await?;
        insert_chunks_tx(&mut *tx, chunks).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Rebuilds the closure table for one document. Idempotent: the prior
    /// edge set is replaced atomically.
    pub async fn build_closure(&self, document_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        build_closure_tx(&mut *tx, document_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Persists a full document — header, chunks, closure — in a single
    /// transaction so no query ever observes a partial write.
    pub async fn save_document_tree(&self, doc: &Document) -> Result<()> {
        validate_tree(&doc.chunks)?;
        let mut tx = self.pool.begin().await?;
        insert_document_tx(&mut *tx, doc).await?;
        insert_chunks_tx(&mut *tx, &doc.chunks).await?;
        build_closure_tx(&mut *tx, &doc.id).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn document_exists(&self, document_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT id, title, source_file, law_category, version, total_chars, chunk_count, \
             created_at, updated_at FROM documents WHERE id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| DocumentRecord {
            id: row.get("id"),
            title: row.get("title"),
            source_file: row.get("source_file"),
            law_category: row.get("law_category"),
            version: row.get("version"),
            total_chars: row.get("total_chars"),
            chunk_count: row.get("chunk_count"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT id, title, source_file, law_category, version, total_chars, chunk_count, \
             created_at, updated_at FROM documents ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DocumentRecord {
                id: row.get("id"),
                title: row.get("title"),
                source_file: row.get("source_file"),
                law_category: row.get("law_category"),
                version: row.get("version"),
                total_chars: row.get("total_chars"),
                chunk_count: row.get("chunk_count"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// All chunks of a document in pre-order, with `children_ids` populated.
    pub async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE document_id = ? ORDER BY position ASC",
            CHUNK_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let mut chunks = rows
            .iter()
            .map(row_to_chunk)
            .collect::<Result<Vec<Chunk>>>()?;

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for chunk in &chunks {
            if let Some(parent) = &chunk.parent_id {
                children
                    .entry(parent.clone())
                    .or_default()
                    .push(chunk.id.clone());
            }
        }
        for chunk in &mut chunks {
            if let Some(ids) = children.remove(&chunk.id) {
                chunk.children_ids = ids;
            }
        }
        Ok(chunks)
    }

    /// Fetches one chunk. `children_ids` is left empty; context queries use
    /// the closure table instead.
    pub async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE id = ?",
            CHUNK_COLUMNS
        ))
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_chunk(&r)).transpose()
    }

    /// Ancestors of a chunk ordered nearest-first (distance ascending).
    pub async fn get_ancestors(
        &self,
        chunk_id: &str,
        max_distance: Option<i64>,
    ) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunk_closure h JOIN chunks c ON h.ancestor_id = c.id \
             WHERE h.descendant_id = ? AND h.distance > 0 AND h.distance <= ? \
             ORDER BY h.distance ASC",
            prefixed_chunk_columns()
        ))
        .bind(chunk_id)
        .bind(max_distance.unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    /// Descendants ordered by ascending distance, then pre-order position.
    pub async fn get_descendants(
        &self,
        chunk_id: &str,
        max_distance: Option<i64>,
    ) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunk_closure h JOIN chunks c ON h.descendant_id = c.id \
             WHERE h.ancestor_id = ? AND h.distance > 0 AND h.distance <= ? \
             ORDER BY h.distance ASC, c.position ASC",
            prefixed_chunk_columns()
        ))
        .bind(chunk_id)
        .bind(max_distance.unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    /// Chunks sharing the same parent, excluding the chunk itself, in
    /// source order.
    pub async fn get_siblings(&self, chunk_id: &str) -> Result<Vec<Chunk>> {
        let parent_id: Option<Option<String>> =
            sqlx::query_scalar("SELECT parent_id FROM chunks WHERE id = ?")
                .bind(chunk_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(Some(parent_id)) = parent_id else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE parent_id = ? AND id != ? ORDER BY position ASC",
            CHUNK_COLUMNS
        ))
        .bind(&parent_id)
        .bind(chunk_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    /// Ids of every chunk in the subtree rooted at `chunk_id`, including the
    /// root itself (closure distance 0). Used to restrict detail searches.
    pub async fn descendant_ids(&self, chunk_id: &str) -> Result<HashSet<String>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT descendant_id FROM chunk_closure WHERE ancestor_id = ?")
                .bind(chunk_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    /// Number of closure rows for one document (diagnostics and tests).
    pub async fn closure_row_count(&self, document_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunk_closure WHERE descendant_id IN \
             (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Deletes a document, cascading to chunks, closure edges, and both
    /// embedding tables.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

const CHUNK_COLUMNS: &str = "id, document_id, parent_id, content, path, kind, indexing_layer, \
     source_file, page_number, article_number, chapter_number, position, metadata, created_at";

fn prefixed_chunk_columns() -> String {
    CHUNK_COLUMNS
        .split(", ")
        .map(|c| format!("c.{}", c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk> {
    let path = HierarchyPath::parse(&row.get::<String, _>("path"))?;
    let kind = ChunkKind::parse(&row.get::<String, _>("kind"))?;
    let indexing_layer = IndexingLayer::parse(&row.get::<String, _>("indexing_layer"))?;
    let metadata: serde_json::Value =
        serde_json::from_str(&row.get::<String, _>("metadata")).unwrap_or(serde_json::json!({}));

    Ok(Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        content: row.get("content"),
        path,
        kind,
        indexing_layer,
        parent_id: row.get("parent_id"),
        children_ids: Vec::new(),
        source_file: row.get("source_file"),
        page_number: row.get("page_number"),
        article_number: row.get("article_number"),
        chapter_number: row.get("chapter_number"),
        position: row.get("position"),
        metadata,
        created_at: row.get("created_at"),
    })
}

/// Structural validation of a whole-document chunk batch.
fn validate_tree(chunks: &[Chunk]) -> Result<()> {
    if chunks.is_empty() {
        return Err(RagError::InvariantViolation(
            "a document must contain at least one chunk".to_string(),
        ));
    }

    let document_id = &chunks[0].document_id;
    let by_id: HashMap<&str, &Chunk> = chunks.iter().map(|c| (c.id.as_str(), c)).collect();
    if by_id.len() != chunks.len() {
        return Err(RagError::InvariantViolation(
            "duplicate chunk ids in batch".to_string(),
        ));
    }

    let mut paths = HashSet::new();
    let mut roots = 0usize;

    for chunk in chunks {
        if &chunk.document_id != document_id {
            return Err(RagError::InvariantViolation(format!(
                "chunk {} belongs to document {} but the batch is for {}",
                chunk.id, chunk.document_id, document_id
            )));
        }
        if !paths.insert(chunk.path.to_string()) {
            return Err(RagError::InvariantViolation(format!(
                "duplicate sibling path {} in document {}",
                chunk.path, document_id
            )));
        }

        match &chunk.parent_id {
            None => {
                if chunk.depth() != 0 {
                    return Err(RagError::InvariantViolation(format!(
                        "chunk {} has no parent but depth {}",
                        chunk.id,
                        chunk.depth()
                    )));
                }
                roots += 1;
            }
            Some(parent_id) => {
                let parent = by_id.get(parent_id.as_str()).ok_or_else(|| {
                    RagError::InvariantViolation(format!(
                        "chunk {} references missing parent {}",
                        chunk.id, parent_id
                    ))
                })?;
                if parent.depth() + 1 != chunk.depth() {
                    return Err(RagError::InvariantViolation(format!(
                        "chunk {} at depth {} has parent at depth {}",
                        chunk.id,
                        chunk.depth(),
                        parent.depth()
                    )));
                }
                if chunk.path.parent().as_ref() != Some(&parent.path) {
                    return Err(RagError::InvariantViolation(format!(
                        "chunk {} path {} is not a child of parent path {}",
                        chunk.id, chunk.path, parent.path
                    )));
                }
            }
        }
    }

    if roots != 1 {
        return Err(RagError::InvariantViolation(format!(
            "document {} has {} root chunks, expected exactly 1",
            document_id, roots
        )));
    }

    Ok(())
}

async fn insert_document_tx(conn: &mut SqliteConnection, doc: &Document) -> Result<()> {
    // Reindexing is delete-then-insert: any prior tree (chunks, closure,
    // embeddings) goes away with the old document row.
    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(&doc.id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        "INSERT INTO documents (id, title, source_file, law_category, version, total_chars, \
         chunk_count, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&doc.id)
    .bind(&doc.title)
    .bind(&doc.source_file)
    .bind(&doc.law_category)
    .bind(&doc.version)
    .bind(doc.total_chars())
    .bind(doc.chunk_count())
    .bind(doc.created_at)
    .bind(doc.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_chunks_tx(conn: &mut SqliteConnection, chunks: &[Chunk]) -> Result<()> {
    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, parent_id, content, path, depth, kind, \
             indexing_layer, source_file, page_number, char_count, article_number, \
             chapter_number, position, metadata, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(&chunk.parent_id)
        .bind(&chunk.content)
        .bind(chunk.path.to_string())
        .bind(chunk.depth() as i64)
        .bind(chunk.kind.as_str())
        .bind(chunk.indexing_layer.as_str())
        .bind(&chunk.source_file)
        .bind(chunk.page_number)
        .bind(chunk.char_count())
        .bind(&chunk.article_number)
        .bind(&chunk.chapter_number)
        .bind(chunk.position)
        .bind(chunk.metadata.to_string())
        .bind(chunk.created_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Recomputes every (ancestor, descendant, distance) pair for one document
/// from the materialized paths, replacing the prior edge set.
async fn build_closure_tx(conn: &mut SqliteConnection, document_id: &str) -> Result<()> {
    sqlx::query(
        "DELETE FROM chunk_closure WHERE descendant_id IN \
         (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *conn)
    .await?;

    let rows = sqlx::query("SELECT id, path FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .fetch_all(&mut *conn)
        .await?;

    let mut id_by_path: HashMap<String, String> = HashMap::with_capacity(rows.len());
    let mut paths: Vec<(String, HierarchyPath)> = Vec::with_capacity(rows.len());
    for row in &rows {
        let id: String = row.get("id");
        let path = HierarchyPath::parse(&row.get::<String, _>("path"))?;
        id_by_path.insert(path.to_string(), id.clone());
        paths.push((id, path));
    }

    for (descendant_id, path) in &paths {
        let mut distance = 0i64;
        let mut cursor = Some(path.clone());
        while let Some(current) = cursor {
            let ancestor_id = id_by_path.get(&current.to_string()).ok_or_else(|| {
                RagError::InvariantViolation(format!(
                    "chunk {} has no stored ancestor at path {}",
                    descendant_id, current
                ))
            })?;
            sqlx::query(
                "INSERT INTO chunk_closure (ancestor_id, descendant_id, distance) VALUES (?, ?, ?)",
            )
            .bind(ancestor_id)
            .bind(descendant_id)
            .bind(distance)
            .execute(&mut *conn)
            .await?;
            distance += 1;
            cursor = current.parent();
        }
    }

    Ok(())
}
