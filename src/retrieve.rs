//! Retrieval orchestration: summary-first and direct strategies.
//!
//! Summary-first runs two phases. Phase 1 searches the summary layer to
//! localize the query to a thematic region (a chapter or article); phase 2
//! searches the detail layer restricted — through the closure table — to
//! the descendants of each summary hit. Groups are ranked on their best
//! detail score and expanded with ancestor context, so every result carries
//! its provenance back to the statute root.
//!
//! Edge policies:
//! - Phase 1 returning nothing falls through to the direct strategy, as
//!   does `summary_k = 0`.
//! - A summary hit with no detail descendants is emitted as its own group.
//! - Duplicate chunk ids across groups keep the earliest (best-ranked)
//!   group.
//! - An explicitly empty document filter matches nothing and returns an
//!   empty pack.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_with_fallback, EmbeddingClient};
use crate::error::{check_deadline, RagError, Result};
use crate::models::{Chunk, ChunkKind};
use crate::store::ChunkStore;
use crate::vector::{SearchFilter, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    SummaryFirst,
    Direct,
}

impl RetrievalStrategy {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "summary_first" => Ok(RetrievalStrategy::SummaryFirst),
            "direct" => Ok(RetrievalStrategy::Direct),
            other => Err(RagError::InvalidInput(format!(
                "unknown retrieval strategy: {} (summary_first, direct)",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::SummaryFirst => "summary_first",
            RetrievalStrategy::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub strategy: RetrievalStrategy,
    /// Restrict the search to these document ids. `Some` with an empty set
    /// matches nothing.
    pub document_filter: Option<Vec<String>>,
    /// Final number of result groups (1–50).
    pub top_k: usize,
    /// Phase-1 breadth for summary-first.
    pub summary_k: usize,
    /// Phase-2 depth per summary hit.
    pub details_per_summary: usize,
    /// Per-chunk character cap for returned content (100–2000).
    pub content_max_length: usize,
    pub include_ancestors: bool,
    pub include_siblings: bool,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            strategy: RetrievalStrategy::SummaryFirst,
            document_filter: None,
            top_k: 5,
            summary_k: 3,
            details_per_summary: 3,
            content_max_length: 800,
            include_ancestors: true,
            include_siblings: false,
        }
    }
}

impl RetrievalOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            summary_k: config.summary_k,
            details_per_summary: config.details_per_summary,
            content_max_length: config.content_max_length,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=50).contains(&self.top_k) {
            return Err(RagError::InvalidInput(format!(
                "top_k must be in 1..=50, got {}",
                self.top_k
            )));
        }
        if !(100..=2000).contains(&self.content_max_length) {
            return Err(RagError::InvalidInput(format!(
                "content_max_length must be in 100..=2000, got {}",
                self.content_max_length
            )));
        }
        Ok(())
    }
}

/// One chunk as returned to the caller: digest paths never leak, the
/// display path is rebuilt from chapter/article metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkView {
    pub chunk_id: String,
    pub path_display: String,
    pub kind: ChunkKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultGroup {
    pub primary: ChunkView,
    pub ancestors: Vec<ChunkView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub siblings: Vec<ChunkView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultPack {
    pub query: String,
    /// The strategy that actually ran (summary-first degrades to direct
    /// when phase 1 finds nothing).
    pub strategy: RetrievalStrategy,
    pub groups: Vec<ResultGroup>,
    pub total_char_count: i64,
}

/// A ranked candidate group before context assembly.
struct Candidate {
    primary: Chunk,
    score: f32,
}

pub struct Retriever {
    store: ChunkStore,
    vectors: VectorStore,
    embedder: Arc<dyn EmbeddingClient>,
}

impl Retriever {
    pub fn new(store: ChunkStore, vectors: VectorStore, embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            store,
            vectors,
            embedder,
        }
    }

    /// Runs a retrieval and assembles the formatted result pack.
    pub async fn retrieve(
        &self,
        query: &str,
        opts: &RetrievalOptions,
        deadline: Option<Instant>,
    ) -> Result<ResultPack> {
        opts.validate()?;
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".to_string()));
        }

        let doc_filter: Option<HashSet<String>> = opts
            .document_filter
            .as_ref()
            .map(|ids| ids.iter().cloned().collect());

        // An explicitly empty filter matches nothing.
        if matches!(&doc_filter, Some(set) if set.is_empty()) {
            return Ok(ResultPack {
                query: query.to_string(),
                strategy: opts.strategy,
                groups: Vec::new(),
                total_char_count: 0,
            });
        }

        let query_vector = embed_with_fallback(
            self.embedder.as_ref(),
            std::slice::from_ref(&query.to_string()),
        )
        .await?
        .pop()
        .ok_or_else(|| RagError::EmbeddingFailure("empty query embedding".to_string()))?;
        check_deadline(deadline, "retrieval")?;

        let base_filter = SearchFilter {
            document_ids: doc_filter.clone(),
            chunk_ids: None,
        };

        let (candidates, used_strategy) = match opts.strategy {
            RetrievalStrategy::SummaryFirst if opts.summary_k > 0 => {
                let summary_candidates = self
                    .summary_first_candidates(&query_vector, opts, &doc_filter, deadline)
                    .await?;
                if summary_candidates.is_empty() {
                    let direct = self
                        .direct_candidates(&query_vector, opts, &base_filter)
                        .await?;
                    (direct, RetrievalStrategy::Direct)
                } else {
                    (summary_candidates, RetrievalStrategy::SummaryFirst)
                }
            }
            _ => {
                let direct = self
                    .direct_candidates(&query_vector, opts, &base_filter)
                    .await?;
                (direct, RetrievalStrategy::Direct)
            }
        };

        self.assemble_pack(query, used_strategy, candidates, opts, deadline)
            .await
    }

    /// Phase 1 + phase 2 of summary-first: rank summary hits, expand each
    /// into its best detail descendants, dedup across groups, keep `top_k`.
    async fn summary_first_candidates(
        &self,
        query_vector: &[f32],
        opts: &RetrievalOptions,
        doc_filter: &Option<HashSet<String>>,
        deadline: Option<Instant>,
    ) -> Result<Vec<Candidate>> {
        use crate::models::IndexingLayer;

        let base_filter = SearchFilter {
            document_ids: doc_filter.clone(),
            chunk_ids: None,
        };
        let summary_hits = self
            .vectors
            .search(query_vector, IndexingLayer::Summary, opts.summary_k, &base_filter)
            .await?;
        if summary_hits.is_empty() {
            return Ok(Vec::new());
        }

        struct RawGroup {
            summary: Chunk,
            summary_score: f32,
            details: Vec<(String, f32)>,
        }

        let mut raw_groups = Vec::with_capacity(summary_hits.len());
        for (summary_id, summary_score) in summary_hits {
            check_deadline(deadline, "retrieval")?;
            let Some(summary) = self.store.get_chunk(&summary_id).await? else {
                continue;
            };

            // Restrict phase 2 to the summary's subtree (self included, so
            // an article indexed in both layers can be its own best detail).
            let descendant_ids = self.store.descendant_ids(&summary_id).await?;
            let detail_filter = SearchFilter {
                document_ids: doc_filter.clone(),
                chunk_ids: Some(descendant_ids),
            };
            let details = self
                .vectors
                .search(
                    query_vector,
                    IndexingLayer::Detail,
                    opts.details_per_summary,
                    &detail_filter,
                )
                .await?;

            raw_groups.push(RawGroup {
                summary,
                summary_score,
                details,
            });
        }

        // Rank groups on best detail score; detail-less groups rank on the
        // summary score itself. Ties break on summary score, then chunk id.
        raw_groups.sort_by(|a, b| {
            let a_best = a.details.first().map(|d| d.1).unwrap_or(a.summary_score);
            let b_best = b.details.first().map(|d| d.1).unwrap_or(b.summary_score);
            b_best
                .partial_cmp(&a_best)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.summary_score
                        .partial_cmp(&a.summary_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.summary.id.cmp(&b.summary.id))
        });

        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates = Vec::new();

        for group in raw_groups {
            if candidates.len() >= opts.top_k {
                break;
            }

            let mut primary: Option<(String, f32)> = None;
            for (detail_id, detail_score) in &group.details {
                if !seen.contains(detail_id) {
                    primary = Some((detail_id.clone(), *detail_score));
                    break;
                }
            }
            // No fresh detail hit: the summary itself is the group's primary.
            if primary.is_none() && !seen.contains(&group.summary.id) {
                primary = Some((group.summary.id.clone(), group.summary_score));
            }

            let Some((primary_id, score)) = primary else {
                continue;
            };
            seen.insert(primary_id.clone());

            let chunk = if primary_id == group.summary.id {
                Some(group.summary)
            } else {
                self.store.get_chunk(&primary_id).await?
            };
            if let Some(chunk) = chunk {
                candidates.push(Candidate {
                    primary: chunk,
                    score,
                });
            }
        }

        Ok(candidates)
    }

    /// Direct strategy: top-k from the detail layer, one group per hit.
    async fn direct_candidates(
        &self,
        query_vector: &[f32],
        opts: &RetrievalOptions,
        filter: &SearchFilter,
    ) -> Result<Vec<Candidate>> {
        use crate::models::IndexingLayer;

        let hits = self
            .vectors
            .search(query_vector, IndexingLayer::Detail, opts.top_k, filter)
            .await?;

        let mut candidates = Vec::with_capacity(hits.len());
        for (chunk_id, score) in hits {
            if let Some(chunk) = self.store.get_chunk(&chunk_id).await? {
                candidates.push(Candidate {
                    primary: chunk,
                    score,
                });
            }
        }
        Ok(candidates)
    }

    /// Fetches ancestor/sibling context for each candidate and formats the
    /// final pack. On deadline expiry, completed groups are returned as a
    /// partial result; with no completed group the retrieval is cancelled.
    async fn assemble_pack(
        &self,
        query: &str,
        strategy: RetrievalStrategy,
        candidates: Vec<Candidate>,
        opts: &RetrievalOptions,
        deadline: Option<Instant>,
    ) -> Result<ResultPack> {
        let mut groups = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            if let Err(cancelled) = check_deadline(deadline, "retrieval") {
                if groups.is_empty() {
                    return Err(cancelled);
                }
                eprintln!("Warning: retrieval deadline hit, returning partial results");
                break;
            }

            let primary = candidate.primary;
            let ancestors = self
                .store
                .get_ancestors(&primary.id, Some(primary.depth() as i64))
                .await?;
            let path_display = display_path(&primary, &ancestors);

            let ancestor_views: Vec<ChunkView> = if opts.include_ancestors {
                ancestors
                    .iter()
                    .map(|a| self.context_view(a, opts.content_max_length))
                    .collect()
            } else {
                Vec::new()
            };

            let sibling_views: Vec<ChunkView> = if opts.include_siblings {
                self.store
                    .get_siblings(&primary.id)
                    .await?
                    .iter()
                    .map(|s| self.context_view(s, opts.content_max_length))
                    .collect()
            } else {
                Vec::new()
            };

            groups.push(ResultGroup {
                primary: ChunkView {
                    chunk_id: primary.id.clone(),
                    path_display,
                    kind: primary.kind,
                    content: truncate_chars(&primary.content, opts.content_max_length),
                    score: Some(candidate.score),
                },
                ancestors: ancestor_views,
                siblings: sibling_views,
            });
        }

        let total_char_count = groups
            .iter()
            .map(|g| {
                let mut chars = g.primary.content.chars().count() as i64;
                chars += g
                    .ancestors
                    .iter()
                    .map(|a| a.content.chars().count() as i64)
                    .sum::<i64>();
                chars += g
                    .siblings
                    .iter()
                    .map(|s| s.content.chars().count() as i64)
                    .sum::<i64>();
                chars
            })
            .sum();

        Ok(ResultPack {
            query: query.to_string(),
            strategy,
            groups,
            total_char_count,
        })
    }

    fn context_view(&self, chunk: &Chunk, max_chars: usize) -> ChunkView {
        ChunkView {
            chunk_id: chunk.id.clone(),
            path_display: display_title(chunk),
            kind: chunk.kind,
            content: truncate_chars(&chunk.content, max_chars),
            score: None,
        }
    }
}

/// Human-readable title for one chunk, built from its structural metadata
/// (never from the digest-encoded internal path).
fn display_title(chunk: &Chunk) -> String {
    match chunk.kind {
        ChunkKind::Document => chunk
            .raw_label()
            .map(|l| l.to_string())
            .unwrap_or_else(|| chunk.source_file.clone()),
        ChunkKind::Chapter => chunk
            .chapter_number
            .clone()
            .or_else(|| chunk.raw_label().map(|l| l.to_string()))
            .unwrap_or_else(|| chunk.path.leaf_label().to_string()),
        ChunkKind::Article => chunk
            .article_number
            .clone()
            .or_else(|| chunk.raw_label().map(|l| l.to_string()))
            .unwrap_or_else(|| chunk.path.leaf_label().to_string()),
        ChunkKind::Section | ChunkKind::Detail => chunk
            .raw_label()
            .map(|l| l.to_string())
            .unwrap_or_else(|| chunk.path.leaf_label().to_string()),
    }
}

/// Root-to-chunk display path, e.g. `陸海空軍懲罰法 > 第二章 > 第 7 條`.
fn display_path(chunk: &Chunk, ancestors_nearest_first: &[Chunk]) -> String {
    let mut parts: Vec<String> = ancestors_nearest_first
        .iter()
        .rev()
        .map(display_title)
        .collect();
    parts.push(display_title(chunk));
    parts.join(" > ")
}

/// Caps a string at `max` characters on a char boundary.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
