//! Core data models for the hierarchical retrieval engine.
//!
//! The data lifecycle is:
//!
//! ```text
//! statute text → chunker → Document { Chunk tree }
//!                               ↓
//!                     chunk store (+ closure table)
//!                               ↓
//!                     vector store (summary / detail layers)
//!                               ↓
//!                     retrieve() → ResultPack
//! ```
//!
//! A [`Chunk`] is one node of a document tree; relations are carried as ids
//! (arena style), never as owning references, so trees serialize and persist
//! without cycles.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::path::HierarchyPath;

/// Structural role of a chunk within a statute tree.
///
/// The kind determines the default indexing layer and how the chunk is
/// titled in provenance strings: chapters display their `chapter_number`,
/// articles their `article_number`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Document,
    Chapter,
    Article,
    Section,
    Detail,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Document => "document",
            ChunkKind::Chapter => "chapter",
            ChunkKind::Article => "article",
            ChunkKind::Section => "section",
            ChunkKind::Detail => "detail",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "document" => Ok(ChunkKind::Document),
            "chapter" => Ok(ChunkKind::Chapter),
            "article" => Ok(ChunkKind::Article),
            "section" => Ok(ChunkKind::Section),
            "detail" => Ok(ChunkKind::Detail),
            other => Err(RagError::InvariantViolation(format!(
                "unknown chunk kind: {}",
                other
            ))),
        }
    }
}

/// Which vector table(s) a chunk is embedded into.
///
/// Independent of [`ChunkKind`]: the chunker assigns defaults (documents and
/// chapters are summaries, articles land in both layers, sections and
/// details are detail-only), but the value travels with the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexingLayer {
    Summary,
    Detail,
    Both,
}

impl IndexingLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexingLayer::Summary => "summary",
            IndexingLayer::Detail => "detail",
            IndexingLayer::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "summary" => Ok(IndexingLayer::Summary),
            "detail" => Ok(IndexingLayer::Detail),
            "both" => Ok(IndexingLayer::Both),
            other => Err(RagError::InvariantViolation(format!(
                "unknown indexing layer: {}",
                other
            ))),
        }
    }

    /// Whether a chunk with this layer contributes a summary-table row.
    pub fn includes_summary(&self) -> bool {
        matches!(self, IndexingLayer::Summary | IndexingLayer::Both)
    }

    /// Whether a chunk with this layer contributes a detail-table row.
    pub fn includes_detail(&self) -> bool {
        matches!(self, IndexingLayer::Detail | IndexingLayer::Both)
    }
}

/// One node of a document's hierarchical tree; the unit of indexing and
/// retrieval.
///
/// | Field | Description |
/// |-------|-------------|
/// | `id` | Deterministic digest of `(document_id, path)` |
/// | `path` | Materialized ASCII-safe path from the document root |
/// | `kind` / `indexing_layer` | Structural role and vector layer(s) |
/// | `parent_id` / `children_ids` | Tree relations carried as ids |
/// | `article_number` | Set for articles only, e.g. `"第 7 條"` |
/// | `chapter_number` | Set on chapters, propagated read-only to descendants |
/// | `position` | Pre-order position within the document |
/// | `metadata` | JSON blob retaining raw (pre-digest) display labels |
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub path: HierarchyPath,
    pub kind: ChunkKind,
    pub indexing_layer: IndexingLayer,
    pub parent_id: Option<String>,
    pub children_ids: Vec<String>,
    pub source_file: String,
    pub page_number: i64,
    pub article_number: Option<String>,
    pub chapter_number: Option<String>,
    pub position: i64,
    pub metadata: serde_json::Value,
    pub created_at: i64,
}

impl Chunk {
    /// Depth of the chunk, derived from its path (0 for the document root).
    pub fn depth(&self) -> usize {
        self.path.depth()
    }

    /// Character count of the content. Always derived, never stored
    /// independently, so it cannot drift out of sync.
    pub fn char_count(&self) -> i64 {
        self.content.chars().count() as i64
    }

    /// Raw display label recorded by the chunker before digest substitution.
    pub fn raw_label(&self) -> Option<&str> {
        self.metadata.get("raw_label").and_then(|v| v.as_str())
    }
}

/// A parsed statute: the aggregate root owning one chunk tree.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub source_file: String,
    pub law_category: Option<String>,
    pub version: Option<String>,
    pub chunks: Vec<Chunk>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    /// Total characters across all chunks.
    pub fn total_chars(&self) -> i64 {
        self.chunks.iter().map(Chunk::char_count).sum()
    }

    pub fn chunk_count(&self) -> i64 {
        self.chunks.len() as i64
    }

    /// The depth-0 root chunk. Every well-formed document has exactly one.
    pub fn root(&self) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.depth() == 0)
    }
}
