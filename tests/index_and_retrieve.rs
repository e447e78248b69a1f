//! End-to-end tests for the indexing and retrieval pipeline.
//!
//! These tests run against a real SQLite database in a temp directory and a
//! deterministic character-ngram embedding client, so the full pipeline —
//! chunk, persist, build closure, embed, search, expand — is exercised
//! without any network dependency.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::SqlitePool;

use statute_harness::config::{ChunkingConfig, Config, DbConfig, EmbeddingConfig, RetrievalConfig};
use statute_harness::embedding::EmbeddingClient;
use statute_harness::error::{RagError, Result};
use statute_harness::indexer::{IndexOptions, Indexer};
use statute_harness::models::{ChunkKind, IndexingLayer};
use statute_harness::retrieve::{RetrievalOptions, RetrievalStrategy, Retriever};
use statute_harness::{db, migrate, ChunkStore, VectorStore};

const DIMS: usize = 64;

/// Deterministic character-trigram embedder: texts sharing tokens (e.g.
/// "第 7 條") land near each other under cosine similarity.
struct NgramEmbedder;

#[async_trait]
impl EmbeddingClient for NgramEmbedder {
    fn model_name(&self) -> &str {
        "ngram-test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| ngram_vector(t)).collect())
    }
}

fn ngram_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0f32; DIMS];
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    if chars.is_empty() {
        return vector;
    }
    for window in chars.windows(3) {
        let token: String = window.iter().collect();
        let mut hash = 1469598103934665603u64;
        for byte in token.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        vector[(hash % DIMS as u64) as usize] += 1.0;
    }
    let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for v in &mut vector {
            *v /= magnitude;
        }
    }
    vector
}

/// An embedder whose batch calls always fail, to exercise the per-item
/// fallback path.
struct BatchFailingEmbedder;

#[async_trait]
impl EmbeddingClient for BatchFailingEmbedder {
    fn model_name(&self) -> &str {
        "batch-failing"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.len() > 1 {
            return Err(RagError::EmbeddingFailure("batch refused".to_string()));
        }
        Ok(texts.iter().map(|t| ngram_vector(t)).collect())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    pool: SqlitePool,
    store: ChunkStore,
    vectors: VectorStore,
    indexer: Indexer,
    retriever: Retriever,
}

fn test_config(dir: &tempfile::TempDir) -> Config {
    Config {
        db: DbConfig {
            path: dir.path().join("lex.db"),
        },
        chunking: ChunkingConfig::default(),
        retrieval: RetrievalConfig::default(),
        embedding: EmbeddingConfig {
            batch_size: 8,
            ..EmbeddingConfig::default()
        },
    }
}

async fn harness_with(embedder: Arc<dyn EmbeddingClient>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);

    let pool = db::connect(&config.db.path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let store = ChunkStore::new(pool.clone());
    let vectors = VectorStore::new(pool.clone(), DIMS);
    let indexer = Indexer::new(
        store.clone(),
        vectors.clone(),
        embedder.clone(),
        &config,
    )
    .unwrap();
    let retriever = Retriever::new(store.clone(), vectors.clone(), embedder);

    Harness {
        _dir: dir,
        pool,
        store,
        vectors,
        indexer,
        retriever,
    }
}

async fn harness() -> Harness {
    harness_with(Arc::new(NgramEmbedder)).await
}

const STATUTE: &str = "\
陸海空軍懲罰法

## 第一章 總則

本法規範陸海空軍現役軍人之懲罰事項。

### 第 1 條

陸海空軍現役軍人之懲罰，依本法行之。

### 第 2 條

本法所稱現役軍人，指依兵役法或其他法律服現役之軍官、士官、士兵。

## 第二章 懲罰種類

### 第 7 條

現役軍人違失行為之懲罰如下：
一、降階。
二、降級。
三、記過。

### 第 8 條

懲罰之執行，由權責單位依程序為之。

## 第三章 附則

### 第 9 條

本法自公布日施行。
";

fn write_statute(dir: &std::path::Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

#[tokio::test]
async fn index_persists_tree_closure_and_embeddings() {
    let h = harness().await;
    let path = write_statute(h._dir.path(), "law.md", STATUTE);

    let doc = h
        .indexer
        .index_document(&path, &IndexOptions::default())
        .await
        .unwrap();

    // Exactly one document row with derived counters.
    let record = h.store.get_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(record.chunk_count, doc.chunk_count());
    assert_eq!(record.total_chars, doc.total_chars());

    // Closure rows: one per (chunk, ancestor-or-self) pair.
    let expected_closure: i64 = doc.chunks.iter().map(|c| c.depth() as i64 + 1).sum();
    let closure = h.store.closure_row_count(&doc.id).await.unwrap();
    assert_eq!(closure, expected_closure);

    // Layer/table correspondence: summary ∈ {summary, both}, detail ∈
    // {detail, both}, one row each.
    let expected_summary = doc
        .chunks
        .iter()
        .filter(|c| c.indexing_layer.includes_summary())
        .count() as i64;
    let expected_detail = doc
        .chunks
        .iter()
        .filter(|c| c.indexing_layer.includes_detail())
        .count() as i64;
    let (summary_rows, detail_rows) = h.vectors.layer_counts(&doc.id).await.unwrap();
    assert_eq!(summary_rows, expected_summary);
    assert_eq!(detail_rows, expected_detail);

    // The tree has the expected statute shape.
    let chapters = doc
        .chunks
        .iter()
        .filter(|c| c.kind == ChunkKind::Chapter)
        .count();
    let articles = doc
        .chunks
        .iter()
        .filter(|c| c.kind == ChunkKind::Article)
        .count();
    assert_eq!(chapters, 3);
    assert_eq!(articles, 5);
}

#[tokio::test]
async fn ancestors_descendants_and_siblings_are_ordered() {
    let h = harness().await;
    let path = write_statute(h._dir.path(), "law.md", STATUTE);
    let doc = h
        .indexer
        .index_document(&path, &IndexOptions::default())
        .await
        .unwrap();

    let section = doc
        .chunks
        .iter()
        .find(|c| c.kind == ChunkKind::Section)
        .unwrap();

    // Nearest first: article, chapter, then document root.
    let ancestors = h.store.get_ancestors(&section.id, None).await.unwrap();
    assert_eq!(ancestors.len(), 3);
    assert_eq!(ancestors[0].kind, ChunkKind::Article);
    assert_eq!(ancestors[1].kind, ChunkKind::Chapter);
    assert_eq!(ancestors[2].kind, ChunkKind::Document);

    // Bounded distance.
    let near = h.store.get_ancestors(&section.id, Some(1)).await.unwrap();
    assert_eq!(near.len(), 1);
    assert_eq!(near[0].kind, ChunkKind::Article);

    // Root descendants cover every other chunk, distance then pre-order.
    let root = doc.root().unwrap();
    let descendants = h.store.get_descendants(&root.id, None).await.unwrap();
    assert_eq!(descendants.len(), doc.chunks.len() - 1);
    let mut last_distance = 0;
    for d in &descendants {
        assert!(d.depth() >= last_distance);
        last_distance = last_distance.max(d.depth());
    }

    // Siblings preserve source order and exclude self.
    let article7 = doc
        .chunks
        .iter()
        .find(|c| c.article_number.as_deref() == Some("第 7 條"))
        .unwrap();
    let siblings = h.store.get_siblings(&article7.id).await.unwrap();
    assert_eq!(siblings.len(), 1);
    assert_eq!(siblings[0].article_number.as_deref(), Some("第 8 條"));
}

#[tokio::test]
async fn reindex_requires_force_and_is_idempotent() {
    let h = harness().await;
    let path = write_statute(h._dir.path(), "law.md", STATUTE);

    let doc = h
        .indexer
        .index_document(&path, &IndexOptions::default())
        .await
        .unwrap();

    // Second non-forcing index refuses.
    let err = h
        .indexer
        .index_document(&path, &IndexOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "already_indexed");

    // Forced reindex of identical content leaves identical state.
    let force = IndexOptions {
        force: true,
        ..IndexOptions::default()
    };
    let doc2 = h.indexer.index_document(&path, &force).await.unwrap();
    assert_eq!(doc.id, doc2.id);
    let ids1: Vec<&String> = doc.chunks.iter().map(|c| &c.id).collect();
    let ids2: Vec<&String> = doc2.chunks.iter().map(|c| &c.id).collect();
    assert_eq!(ids1, ids2);
    assert_eq!(
        h.store.closure_row_count(&doc.id).await.unwrap(),
        doc.chunks.iter().map(|c| c.depth() as i64 + 1).sum::<i64>()
    );
}

#[tokio::test]
async fn force_reindex_of_modified_file_leaves_no_orphans() {
    let h = harness().await;
    let path = write_statute(h._dir.path(), "law.md", STATUTE);
    let doc = h
        .indexer
        .index_document(&path, &IndexOptions::default())
        .await
        .unwrap();
    let old_record = h.store.get_document(&doc.id).await.unwrap().unwrap();

    // Drop chapter three from the statute and reindex.
    let modified = STATUTE
        .replace("## 第三章 附則\n\n### 第 9 條\n\n本法自公布日施行。\n", "");
    write_statute(h._dir.path(), "law.md", &modified);

    let force = IndexOptions {
        force: true,
        ..IndexOptions::default()
    };
    let doc2 = h.indexer.index_document(&path, &force).await.unwrap();

    let record = h.store.get_document(&doc2.id).await.unwrap().unwrap();
    assert!(record.total_chars < old_record.total_chars);

    // Chunk ids for the removed chapter are gone.
    let removed: Vec<&statute_harness::Chunk> = doc
        .chunks
        .iter()
        .filter(|c| {
            c.chapter_number.as_deref() == Some("第三章")
                || c.article_number.as_deref() == Some("第 9 條")
        })
        .collect();
    assert!(!removed.is_empty());
    for chunk in removed {
        assert!(h.store.get_chunk(&chunk.id).await.unwrap().is_none());
    }

    // No orphan rows in either embedding table.
    for table in ["embeddings_summary", "embeddings_detail"] {
        let orphans: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE chunk_id NOT IN (SELECT id FROM chunks)",
            table
        ))
        .fetch_one(&h.pool)
        .await
        .unwrap();
        assert_eq!(orphans, 0, "orphans in {}", table);
    }
    let (summary_rows, detail_rows) = h.vectors.layer_counts(&doc2.id).await.unwrap();
    let expected_summary = doc2
        .chunks
        .iter()
        .filter(|c| c.indexing_layer.includes_summary())
        .count() as i64;
    let expected_detail = doc2
        .chunks
        .iter()
        .filter(|c| c.indexing_layer.includes_detail())
        .count() as i64;
    assert_eq!(summary_rows, expected_summary);
    assert_eq!(detail_rows, expected_detail);
}

#[tokio::test]
async fn delete_document_cascades_everywhere() {
    let h = harness().await;
    let path = write_statute(h._dir.path(), "law.md", STATUTE);
    let doc = h
        .indexer
        .index_document(&path, &IndexOptions::default())
        .await
        .unwrap();

    h.store.delete_document(&doc.id).await.unwrap();

    assert!(h.store.get_document(&doc.id).await.unwrap().is_none());
    assert!(h
        .store
        .get_document_chunks(&doc.id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(h.store.closure_row_count(&doc.id).await.unwrap(), 0);
    let (summary_rows, detail_rows) = h.vectors.layer_counts(&doc.id).await.unwrap();
    assert_eq!((summary_rows, detail_rows), (0, 0));
}

#[tokio::test]
async fn summary_first_finds_article_with_chapter_ancestor() {
    let h = harness().await;
    let path = write_statute(h._dir.path(), "陸海空軍懲罰法.md", STATUTE);
    h.indexer
        .index_document(&path, &IndexOptions::default())
        .await
        .unwrap();

    let opts = RetrievalOptions {
        summary_k: 3,
        details_per_summary: 3,
        ..RetrievalOptions::default()
    };
    let pack = h
        .retriever
        .retrieve("第 7 條 懲罰種類 降階 記過", &opts, None)
        .await
        .unwrap();

    assert_eq!(pack.strategy, RetrievalStrategy::SummaryFirst);
    assert!(!pack.groups.is_empty());

    // The top group resolves to 第 7 條's subtree with full provenance.
    let top = &pack.groups[0];
    assert!(
        top.primary.path_display.contains("第 7 條"),
        "top hit was {}",
        top.primary.path_display
    );
    assert!(top.primary.path_display.contains("第二章"));
    assert!(!top.ancestors.is_empty());
    assert!(top
        .ancestors
        .iter()
        .any(|a| a.kind == ChunkKind::Chapter && a.path_display.contains("第二章")));
    assert!(pack.total_char_count > 0);

    // No duplicate primaries across groups.
    let mut seen = std::collections::HashSet::new();
    for group in &pack.groups {
        assert!(seen.insert(group.primary.chunk_id.clone()));
    }
}

#[tokio::test]
async fn direct_strategy_and_sibling_expansion() {
    let h = harness().await;
    let path = write_statute(h._dir.path(), "law.md", STATUTE);
    h.indexer
        .index_document(&path, &IndexOptions::default())
        .await
        .unwrap();

    let opts = RetrievalOptions {
        strategy: RetrievalStrategy::Direct,
        include_siblings: true,
        ..RetrievalOptions::default()
    };
    let pack = h
        .retriever
        .retrieve("現役軍人 懲罰", &opts, None)
        .await
        .unwrap();

    assert_eq!(pack.strategy, RetrievalStrategy::Direct);
    assert!(!pack.groups.is_empty());
    for group in &pack.groups {
        assert!(group.primary.score.is_some());
    }
}

#[tokio::test]
async fn summary_k_zero_degrades_to_direct() {
    let h = harness().await;
    let path = write_statute(h._dir.path(), "law.md", STATUTE);
    h.indexer
        .index_document(&path, &IndexOptions::default())
        .await
        .unwrap();

    let opts = RetrievalOptions {
        top_k: 1,
        summary_k: 0,
        ..RetrievalOptions::default()
    };
    let pack = h.retriever.retrieve("懲罰", &opts, None).await.unwrap();
    assert_eq!(pack.strategy, RetrievalStrategy::Direct);
    assert_eq!(pack.groups.len(), 1);
}

#[tokio::test]
async fn empty_document_filter_returns_zero_groups() {
    let h = harness().await;
    let path = write_statute(h._dir.path(), "law.md", STATUTE);
    h.indexer
        .index_document(&path, &IndexOptions::default())
        .await
        .unwrap();

    let opts = RetrievalOptions {
        document_filter: Some(Vec::new()),
        ..RetrievalOptions::default()
    };
    let pack = h.retriever.retrieve("懲罰", &opts, None).await.unwrap();
    assert!(pack.groups.is_empty());
    assert_eq!(pack.total_char_count, 0);
}

#[tokio::test]
async fn document_filter_restricts_results() {
    let h = harness().await;
    let law = write_statute(h._dir.path(), "law.md", STATUTE);
    let other = write_statute(
        h._dir.path(),
        "other.md",
        "### 第 1 條\n\n另一部法規的條文內容。\n",
    );
    let doc1 = h
        .indexer
        .index_document(&law, &IndexOptions::default())
        .await
        .unwrap();
    h.indexer
        .index_document(&other, &IndexOptions::default())
        .await
        .unwrap();

    let opts = RetrievalOptions {
        document_filter: Some(vec![doc1.id.clone()]),
        ..RetrievalOptions::default()
    };
    let pack = h.retriever.retrieve("條文", &opts, None).await.unwrap();
    for group in &pack.groups {
        let chunk = h
            .store
            .get_chunk(&group.primary.chunk_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk.document_id, doc1.id);
    }
}

#[tokio::test]
async fn retrieval_on_empty_store_returns_zero_groups() {
    let h = harness().await;

    for strategy in [RetrievalStrategy::SummaryFirst, RetrievalStrategy::Direct] {
        let opts = RetrievalOptions {
            strategy,
            ..RetrievalOptions::default()
        };
        let pack = h.retriever.retrieve("懲罰", &opts, None).await.unwrap();
        assert!(pack.groups.is_empty());
    }
}

#[tokio::test]
async fn cancelled_index_leaves_store_unchanged() {
    let h = harness().await;
    let path = write_statute(h._dir.path(), "law.md", STATUTE);

    let opts = IndexOptions {
        deadline: Some(Instant::now() - Duration::from_secs(1)),
        ..IndexOptions::default()
    };
    let err = h.indexer.index_document(&path, &opts).await.unwrap_err();
    assert_eq!(err.kind(), "cancelled");

    let docs = h.store.list_documents().await.unwrap();
    assert!(docs.is_empty());
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(chunks, 0);
    for table in ["embeddings_summary", "embeddings_detail", "chunk_closure"] {
        let rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&h.pool)
            .await
            .unwrap();
        assert_eq!(rows, 0, "rows left in {}", table);
    }
}

#[tokio::test]
async fn concurrent_indexing_serializes_on_the_document_lock() {
    let h = harness().await;
    let path = write_statute(h._dir.path(), "law.md", STATUTE);

    let indexer = Arc::new(h.indexer);
    let opts = IndexOptions::default();
    let (a, b) = tokio::join!(
        indexer.index_document(&path, &opts),
        indexer.index_document(&path, &opts),
    );

    let outcomes = [a, b];
    let ok_count = outcomes.iter().filter(|r| r.is_ok()).count();
    let already = outcomes
        .iter()
        .filter(|r| matches!(r, Err(e) if e.kind() == "already_indexed"))
        .count();
    assert_eq!(ok_count, 1);
    assert_eq!(already, 1);
}

#[tokio::test]
async fn batch_failure_falls_back_to_per_item_embedding() {
    let h = harness_with(Arc::new(BatchFailingEmbedder)).await;
    let path = write_statute(h._dir.path(), "law.md", STATUTE);

    let doc = h
        .indexer
        .index_document(&path, &IndexOptions::default())
        .await
        .unwrap();

    let (summary_rows, detail_rows) = h.vectors.layer_counts(&doc.id).await.unwrap();
    assert!(summary_rows > 0);
    assert!(detail_rows > 0);
}

#[tokio::test]
async fn invalid_batches_are_rejected_as_invariant_violations() {
    let h = harness().await;
    let path = write_statute(h._dir.path(), "law.md", STATUTE);
    let doc = h
        .indexer
        .index_document(&path, &IndexOptions::default())
        .await
        .unwrap();

    // A chunk pointing at a parent that is not in the batch.
    let mut orphan = doc.chunks[1].clone();
    orphan.document_id = "other_doc".to_string();
    orphan.parent_id = Some("missing".to_string());
    let err = h.store.save_chunks_batch(&[orphan]).await.unwrap_err();
    assert_eq!(err.kind(), "invariant_violation");

    // Vector dimension mismatches are invariant violations too.
    let err = h
        .vectors
        .upsert(&doc.chunks[0].id, &vec![0.0f32; DIMS + 1], IndexingLayer::Summary)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invariant_violation");
}

#[tokio::test]
async fn store_primitives_compose_and_closure_rebuild_is_idempotent() {
    let h = harness().await;
    let chunker =
        statute_harness::Chunker::new(&ChunkingConfig::default()).unwrap();
    let doc = chunker.chunk(STATUTE, "law.md", "law").unwrap();

    // The individual operations compose to the same state the indexer's
    // single-transaction path produces.
    h.store.save_document(&doc).await.unwrap();
    h.store.save_chunks_batch(&doc.chunks).await.unwrap();
    h.store.build_closure(&doc.id).await.unwrap();

    let expected: i64 = doc.chunks.iter().map(|c| c.depth() as i64 + 1).sum();
    assert_eq!(h.store.closure_row_count(&doc.id).await.unwrap(), expected);

    // Rebuilding replaces the edge set rather than duplicating it.
    h.store.build_closure(&doc.id).await.unwrap();
    assert_eq!(h.store.closure_row_count(&doc.id).await.unwrap(), expected);

    // delete_for_chunk clears both layers for a single chunk.
    let article = doc
        .chunks
        .iter()
        .find(|c| c.indexing_layer == IndexingLayer::Both)
        .unwrap();
    h.vectors
        .upsert(&article.id, &ngram_vector(&article.content), IndexingLayer::Summary)
        .await
        .unwrap();
    h.vectors
        .upsert(&article.id, &ngram_vector(&article.content), IndexingLayer::Detail)
        .await
        .unwrap();
    let (summary_rows, detail_rows) = h.vectors.layer_counts(&doc.id).await.unwrap();
    assert_eq!((summary_rows, detail_rows), (1, 1));

    h.vectors.delete_for_chunk(&article.id).await.unwrap();
    let (summary_rows, detail_rows) = h.vectors.layer_counts(&doc.id).await.unwrap();
    assert_eq!((summary_rows, detail_rows), (0, 0));
}

#[tokio::test]
async fn index_many_reports_per_document_failures() {
    let h = harness().await;
    let good = write_statute(h._dir.path(), "good.md", STATUTE);
    let missing = h._dir.path().join("missing.md");

    let report = h
        .indexer
        .index_many(
            &[good.clone(), missing.clone()],
            &IndexOptions::default(),
            true,
        )
        .await
        .unwrap();

    assert_eq!(report.indexed.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, "invalid_input");

    // With skip_errors = false the same input aborts.
    let err = h
        .indexer
        .index_many(
            &[missing],
            &IndexOptions {
                force: true,
                ..IndexOptions::default()
            },
            false,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_input");
}
