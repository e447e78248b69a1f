//! Two-layer vector store.
//!
//! Embeddings live in two disjoint tables keyed by [`IndexingLayer`]:
//! `embeddings_summary` and `embeddings_detail`. A chunk indexed in both
//! layers contributes one row to each. Vectors are stored as little-endian
//! f32 BLOBs; nearest-neighbor search is a full sequential scan under
//! cosine similarity, which preserves correctness at any dimensionality
//! (the backing store has no bounded-dimension ANN index).
//!
//! Ties in similarity break deterministically on lexicographic chunk id.

use std::collections::HashSet;

use sqlx::{Row, SqlitePool};

use crate::error::{RagError, Result};
use crate::models::IndexingLayer;

/// Restricts a search to chunks whose document or chunk id is allowed.
/// `None` means unrestricted; an empty set matches nothing.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub document_ids: Option<HashSet<String>>,
    pub chunk_ids: Option<HashSet<String>>,
}

impl SearchFilter {
    fn admits(&self, document_id: &str, chunk_id: &str) -> bool {
        if let Some(docs) = &self.document_ids {
            if !docs.contains(document_id) {
                return false;
            }
        }
        if let Some(chunks) = &self.chunk_ids {
            if !chunks.contains(chunk_id) {
                return false;
            }
        }
        true
    }
}

#[derive(Clone)]
pub struct VectorStore {
    pool: SqlitePool,
    dims: usize,
}

impl VectorStore {
    /// `dims` is the system-wide embedding dimension; every write and query
    /// vector is asserted against it.
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    fn table(layer: IndexingLayer) -> Result<&'static str> {
        match layer {
            IndexingLayer::Summary => Ok("embeddings_summary"),
            IndexingLayer::Detail => Ok("embeddings_detail"),
            IndexingLayer::Both => Err(RagError::InvariantViolation(
                "embedding rows are written per concrete layer, not 'both'".to_string(),
            )),
        }
    }

    fn check_dims(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dims {
            return Err(RagError::InvariantViolation(format!(
                "vector has {} dimensions, store is configured for {}",
                vector.len(),
                self.dims
            )));
        }
        Ok(())
    }

    /// Inserts or replaces the row for `(chunk_id, layer)`.
    pub async fn upsert(
        &self,
        chunk_id: &str,
        vector: &[f32],
        layer: IndexingLayer,
    ) -> Result<()> {
        self.check_dims(vector)?;
        let table = Self::table(layer)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(&format!(
            "INSERT INTO {} (chunk_id, embedding, dims, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(chunk_id) DO UPDATE SET \
             embedding = excluded.embedding, dims = excluded.dims, \
             created_at = excluded.created_at",
            table
        ))
        .bind(chunk_id)
        .bind(vec_to_blob(vector))
        .bind(vector.len() as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Top-k nearest neighbors in one layer under cosine similarity,
    /// honoring the filter. Scores are in `[-1, 1]`, higher is closer.
    pub async fn search(
        &self,
        query: &[f32],
        layer: IndexingLayer,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(String, f32)>> {
        self.check_dims(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let table = Self::table(layer)?;

        let rows = sqlx::query(&format!(
            "SELECT e.chunk_id, e.embedding, c.document_id \
             FROM {} e JOIN chunks c ON e.chunk_id = c.id",
            table
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(String, f32)> = Vec::new();
        for row in &rows {
            let chunk_id: String = row.get("chunk_id");
            let document_id: String = row.get("document_id");
            if !filter.admits(&document_id, &chunk_id) {
                continue;
            }
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            let score = cosine_similarity(query, &vector);
            scored.push((chunk_id, score));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Removes all rows for a chunk across both layers.
    pub async fn delete_for_chunk(&self, chunk_id: &str) -> Result<()> {
        for table in ["embeddings_summary", "embeddings_detail"] {
            sqlx::query(&format!("DELETE FROM {} WHERE chunk_id = ?", table))
                .bind(chunk_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Row counts `(summary, detail)` for one document (diagnostics, tests).
    pub async fn layer_counts(&self, document_id: &str) -> Result<(i64, i64)> {
        let mut counts = [0i64; 2];
        for (i, table) in ["embeddings_summary", "embeddings_detail"].iter().enumerate() {
            counts[i] = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM {} e JOIN chunks c ON e.chunk_id = c.id \
                 WHERE c.document_id = ?",
                table
            ))
            .bind(document_id)
            .fetch_one(&self.pool)
            .await?;
        }
        Ok((counts[0], counts[1]))
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; 0.0 for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
