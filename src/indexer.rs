//! Indexing orchestration.
//!
//! Composes the chunker, chunk store, vector store, and embedding client
//! into one atomic-per-document pipeline:
//!
//! 1. Resolve the document id (derived from the filename if absent).
//! 2. Acquire the per-document advisory lock; refuse with `AlreadyIndexed`
//!    unless `force` is set (force deletes the prior document first).
//! 3. Read and chunk the file.
//! 4. Persist header, chunks, and closure in a single transaction.
//! 5. Partition chunks by indexing layer and embed in batches, upserting
//!    into the matching vector table.
//!
//! The operation either fully succeeds or leaves the store unchanged: a
//! failure or deadline expiry after the store transaction deletes the
//! freshly written document again, so no orphan chunks or vectors survive.
//! Transient store errors retry up to [`STORE_RETRIES`] times with
//! exponential backoff; invariant violations never retry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::chunker::Chunker;
use crate::config::Config;
use crate::embedding::{embed_with_fallback, EmbeddingClient};
use crate::error::{check_deadline, RagError, Result};
use crate::models::{Chunk, Document, IndexingLayer};
use crate::path::document_id_from_filename;
use crate::store::ChunkStore;
use crate::vector::VectorStore;

/// Maximum retries for transient store failures.
const STORE_RETRIES: u32 = 3;

/// Options for [`Indexer::index_document`].
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Explicit document id; derived from the filename when absent.
    pub document_id: Option<String>,
    /// Reindex an existing document instead of refusing.
    pub force: bool,
    pub law_category: Option<String>,
    pub version: Option<String>,
    pub deadline: Option<Instant>,
}

/// Outcome of [`Indexer::index_many`].
#[derive(Debug, Default)]
pub struct IndexReport {
    pub indexed: Vec<IndexedDocument>,
    pub failures: Vec<IndexFailure>,
}

#[derive(Debug)]
pub struct IndexedDocument {
    pub path: PathBuf,
    pub document_id: String,
    pub chunk_count: i64,
}

#[derive(Debug)]
pub struct IndexFailure {
    pub path: PathBuf,
    pub kind: &'static str,
    pub message: String,
}

/// Per-document advisory locks: concurrent index attempts for the same
/// document serialize, so the second caller observes the first one's write.
#[derive(Default)]
struct IndexLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexLocks {
    fn for_document(&self, document_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(document_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

pub struct Indexer {
    store: ChunkStore,
    vectors: VectorStore,
    embedder: Arc<dyn EmbeddingClient>,
    chunker: Chunker,
    batch_size: usize,
    locks: IndexLocks,
}

impl Indexer {
    pub fn new(
        store: ChunkStore,
        vectors: VectorStore,
        embedder: Arc<dyn EmbeddingClient>,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            store,
            vectors,
            embedder,
            chunker: Chunker::new(&config.chunking)?,
            batch_size: config.embedding.batch_size.max(1),
            locks: IndexLocks::default(),
        })
    }

    /// Indexes one document end to end. Returns the persisted document.
    pub async fn index_document(&self, path: &Path, opts: &IndexOptions) -> Result<Document> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                RagError::InvalidInput(format!("path has no file name: {}", path.display()))
            })?;

        let document_id = match &opts.document_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            Some(_) => {
                return Err(RagError::InvalidInput(
                    "document id must not be empty".to_string(),
                ))
            }
            None => document_id_from_filename(&file_name)?,
        };

        let lock = self.locks.for_document(&document_id);
        let _guard = lock.lock().await;
        check_deadline(opts.deadline, "indexing")?;

        if self.store.document_exists(&document_id).await? {
            if !opts.force {
                return Err(RagError::AlreadyIndexed(document_id));
            }
            self.delete_with_retries(&document_id).await?;
        }

        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            RagError::InvalidInput(format!("cannot read {}: {}", path.display(), e))
        })?;
        check_deadline(opts.deadline, "indexing")?;

        let mut doc = self
            .chunker
            .chunk(&text, &path.to_string_lossy(), &document_id)?;
        doc.law_category = opts.law_category.clone();
        doc.version = opts.version.clone();

        self.save_tree_with_retries(&doc).await?;

        // The tree is committed; anything that fails from here on rolls the
        // document back so the store ends up exactly as it started.
        match self.embed_document(&doc, opts.deadline).await {
            Ok(()) => Ok(doc),
            Err(e) => {
                if let Err(cleanup_err) = self.store.delete_document(&doc.id).await {
                    eprintln!(
                        "Warning: rollback of {} failed: {}",
                        doc.id, cleanup_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Indexes many files. With `skip_errors`, per-document failures are
    /// collected into the report instead of aborting; cancellation always
    /// aborts.
    pub async fn index_many(
        &self,
        paths: &[PathBuf],
        opts: &IndexOptions,
        skip_errors: bool,
    ) -> Result<IndexReport> {
        let mut report = IndexReport::default();

        for path in paths {
            let per_doc = IndexOptions {
                document_id: None,
                ..opts.clone()
            };
            match self.index_document(path, &per_doc).await {
                Ok(doc) => report.indexed.push(IndexedDocument {
                    path: path.clone(),
                    document_id: doc.id.clone(),
                    chunk_count: doc.chunk_count(),
                }),
                Err(e @ RagError::Cancelled(_)) => return Err(e),
                Err(e) if skip_errors => report.failures.push(IndexFailure {
                    path: path.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                }),
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Embeds every chunk into its layer table(s), batched with per-item
    /// fallback.
    async fn embed_document(&self, doc: &Document, deadline: Option<Instant>) -> Result<()> {
        let summary_set: Vec<&Chunk> = doc
            .chunks
            .iter()
            .filter(|c| c.indexing_layer.includes_summary())
            .collect();
        let detail_set: Vec<&Chunk> = doc
            .chunks
            .iter()
            .filter(|c| c.indexing_layer.includes_detail())
            .collect();

        for (layer, set) in [
            (IndexingLayer::Summary, summary_set),
            (IndexingLayer::Detail, detail_set),
        ] {
            for batch in set.chunks(self.batch_size) {
                check_deadline(deadline, "indexing")?;

                let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
                let vectors = embed_with_fallback(self.embedder.as_ref(), &texts).await?;

                for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                    self.upsert_with_retries(&chunk.id, vector, layer).await?;
                }
            }
        }

        Ok(())
    }

    async fn save_tree_with_retries(&self, doc: &Document) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.store.save_document_tree(doc).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < STORE_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn delete_with_retries(&self, document_id: &str) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.store.delete_document(document_id).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < STORE_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn upsert_with_retries(
        &self,
        chunk_id: &str,
        vector: &[f32],
        layer: IndexingLayer,
    ) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.vectors.upsert(chunk_id, vector, layer).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < STORE_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(100 * (1 << (attempt - 1).min(4)))
}
