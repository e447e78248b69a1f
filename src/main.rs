//! # Statute Harness CLI (`lex`)
//!
//! The `lex` binary is the operator interface for the hierarchical statute
//! retrieval engine: database initialization, document indexing, retrieval,
//! inspection, and cleanup.
//!
//! ## Usage
//!
//! ```bash
//! lex --config ./config/lex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lex init` | Create the SQLite database and run schema migrations |
//! | `lex index <path>` | Chunk, persist, and embed a statute (or a directory) |
//! | `lex query "<text>"` | Retrieve with summary-first or direct strategy |
//! | `lex get <doc-id>` | Print a document header and its chunk tree |
//! | `lex delete <doc-id>` | Remove a document and all derived rows |
//! | `lex stats` | Show document, chunk, and embedding counts |
//!
//! ## Exit codes
//!
//! `0` success · `2` invariant violation · `3` input/store/embedding error ·
//! `4` cancelled (deadline expired).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use statute_harness::config::{self, Config};
use statute_harness::error::{RagError, Result};
use statute_harness::indexer::{IndexOptions, Indexer};
use statute_harness::retrieve::{RetrievalOptions, RetrievalStrategy, Retriever};
use statute_harness::{db, embedding, get, migrate, stats};
use statute_harness::{ChunkStore, VectorStore};

#[derive(Parser)]
#[command(
    name = "lex",
    about = "Hierarchical indexing and retrieval for structured legal corpora",
    version,
    long_about = "Statute Harness parses statutes into chapter/article/section trees, \
    persists them with path-addressable identifiers and a closure table, embeds each node \
    at the matching semantic layer, and answers queries summary-first with ancestor context."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// chunks, chunk_closure, embeddings_summary, embeddings_detail).
    /// Idempotent — running it multiple times is safe.
    Init,

    /// Index one statute file, or every .md/.txt file in a directory.
    ///
    /// Parses the document into a hierarchical chunk tree, persists it with
    /// its closure table in one transaction, then embeds each chunk into
    /// the summary and/or detail layer. Refuses documents that are already
    /// indexed unless `--force` is given.
    Index {
        /// Statute file or directory of statutes.
        path: PathBuf,

        /// Recurse into subdirectories when `path` is a directory.
        #[arg(long, short = 'r')]
        recursive: bool,

        /// Reindex documents that already exist (delete-then-insert).
        #[arg(long)]
        force: bool,

        /// Explicit document id (single-file indexing only; defaults to a
        /// sanitized form of the filename).
        #[arg(long)]
        document_id: Option<String>,

        /// Legal category recorded on the document row (e.g. 軍事法規).
        #[arg(long)]
        category: Option<String>,

        /// Statute version or amendment date recorded on the document row.
        #[arg(long)]
        law_version: Option<String>,

        /// Abort (with rollback) if indexing takes longer than this.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Abort on the first per-document failure when indexing a
        /// directory (the default is to record failures and continue).
        #[arg(long)]
        fail_fast: bool,
    },

    /// Retrieve chunks relevant to a query.
    Query {
        /// The query text, e.g. "第7條" or a free-form question.
        query: String,

        /// Retrieval strategy: `summary_first` (two-phase) or `direct`.
        #[arg(long, default_value = "summary_first")]
        strategy: String,

        /// Number of result groups to return (1-50).
        #[arg(long)]
        top_k: Option<usize>,

        /// Phase-1 breadth: number of summary chunks to localize against.
        #[arg(long)]
        summary_k: Option<usize>,

        /// Phase-2 depth: detail chunks examined per summary hit.
        #[arg(long)]
        details: Option<usize>,

        /// Restrict the search to these document ids (repeatable).
        #[arg(long = "document")]
        documents: Vec<String>,

        /// Per-chunk character cap for returned content (100-2000).
        #[arg(long)]
        max_content: Option<usize>,

        /// Include immediate siblings of each primary chunk.
        #[arg(long)]
        siblings: bool,

        /// Skip ancestor context in the output.
        #[arg(long)]
        no_ancestors: bool,

        /// Emit the raw result pack as JSON instead of formatted text.
        #[arg(long)]
        json: bool,

        /// Abort with partial results if retrieval exceeds this.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Print a document header and its chunk tree.
    Get {
        /// Document id.
        id: String,
    },

    /// Delete a document, cascading to chunks, closure, and embeddings.
    Delete {
        /// Document id.
        id: String,
    },

    /// Show database statistics.
    Stats,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error ({}): {}", e.kind(), e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_config(&cli.config)?;
    let pool = db::connect(&cfg.db.path).await?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&pool).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Index {
            path,
            recursive,
            force,
            document_id,
            category,
            law_version,
            timeout_secs,
            fail_fast,
        } => {
            let (store, vectors, embedder) = build_components(&cfg, &pool)?;
            let indexer = Indexer::new(store, vectors, embedder, &cfg)?;
            let opts = IndexOptions {
                document_id,
                force,
                law_category: category,
                version: law_version,
                deadline: deadline_from(timeout_secs),
            };

            if path.is_dir() {
                if opts.document_id.is_some() {
                    return Err(RagError::InvalidInput(
                        "--document-id is only valid when indexing a single file".to_string(),
                    ));
                }
                let files = collect_files(&path, recursive)?;
                if files.is_empty() {
                    return Err(RagError::InvalidInput(format!(
                        "no .md or .txt files under {}",
                        path.display()
                    )));
                }
                let report = indexer.index_many(&files, &opts, !fail_fast).await?;

                println!("index {}", path.display());
                println!("  indexed: {} documents", report.indexed.len());
                for doc in &report.indexed {
                    println!("    {} ({} chunks)", doc.document_id, doc.chunk_count);
                }
                if !report.failures.is_empty() {
                    println!("  failed: {} documents", report.failures.len());
                    for failure in &report.failures {
                        println!(
                            "    {} [{}]: {}",
                            failure.path.display(),
                            failure.kind,
                            failure.message
                        );
                    }
                }
            } else {
                let doc = indexer.index_document(&path, &opts).await?;
                let summary_rows = doc
                    .chunks
                    .iter()
                    .filter(|c| c.indexing_layer.includes_summary())
                    .count();
                let detail_rows = doc
                    .chunks
                    .iter()
                    .filter(|c| c.indexing_layer.includes_detail())
                    .count();

                println!("index {}", path.display());
                println!("  document: {}", doc.id);
                println!("  chunks: {}", doc.chunk_count());
                println!("  total chars: {}", doc.total_chars());
                println!("  summary embeddings: {}", summary_rows);
                println!("  detail embeddings: {}", detail_rows);
            }
            println!("ok");
        }
        Commands::Query {
            query,
            strategy,
            top_k,
            summary_k,
            details,
            documents,
            max_content,
            siblings,
            no_ancestors,
            json,
            timeout_secs,
        } => {
            let (store, vectors, embedder) = build_components(&cfg, &pool)?;
            let retriever = Retriever::new(store, vectors, embedder);

            let mut opts = RetrievalOptions::from_config(&cfg.retrieval);
            opts.strategy = RetrievalStrategy::parse(&strategy)?;
            if let Some(k) = top_k {
                opts.top_k = k;
            }
            if let Some(k) = summary_k {
                opts.summary_k = k;
            }
            if let Some(d) = details {
                opts.details_per_summary = d;
            }
            if let Some(m) = max_content {
                opts.content_max_length = m;
            }
            if !documents.is_empty() {
                opts.document_filter = Some(documents);
            }
            opts.include_siblings = siblings;
            opts.include_ancestors = !no_ancestors;

            let pack = retriever
                .retrieve(&query, &opts, deadline_from(timeout_secs))
                .await?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&pack).map_err(|e| {
                        RagError::InvalidInput(format!("result serialization failed: {}", e))
                    })?
                );
            } else {
                print_pack(&pack);
            }
        }
        Commands::Get { id } => {
            let store = ChunkStore::new(pool.clone());
            get::run_get(&store, &id).await?;
        }
        Commands::Delete { id } => {
            let store = ChunkStore::new(pool.clone());
            if !store.document_exists(&id).await? {
                return Err(RagError::InvalidInput(format!("document not found: {}", id)));
            }
            store.delete_document(&id).await?;
            println!("deleted {}", id);
        }
        Commands::Stats => {
            stats::run_stats(&pool, &cfg.db.path).await?;
        }
    }

    pool.close().await;
    Ok(())
}

/// Builds the store/vector/embedder triple shared by index and query.
fn build_components(
    cfg: &Config,
    pool: &sqlx::SqlitePool,
) -> Result<(ChunkStore, VectorStore, Arc<dyn embedding::EmbeddingClient>)> {
    if !cfg.embedding.is_enabled() {
        return Err(RagError::InvalidInput(
            "embedding provider is disabled; set [embedding] in the config".to_string(),
        ));
    }
    let dims = cfg.embedding.dims.ok_or_else(|| {
        RagError::InvalidInput("embedding.dims must be configured".to_string())
    })?;

    let store = ChunkStore::new(pool.clone());
    let vectors = VectorStore::new(pool.clone(), dims);
    let embedder: Arc<dyn embedding::EmbeddingClient> =
        Arc::from(embedding::create_client(&cfg.embedding)?);
    Ok((store, vectors, embedder))
}

fn deadline_from(timeout_secs: Option<u64>) -> Option<Instant> {
    timeout_secs.map(|secs| Instant::now() + Duration::from_secs(secs))
}

/// Collects .md/.txt files from a directory, sorted for determinism.
fn collect_files(dir: &std::path::Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| {
        RagError::InvalidInput(format!("cannot read directory {}: {}", dir.display(), e))
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| {
            RagError::InvalidInput(format!("cannot read directory entry: {}", e))
        })?;
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                files.extend(collect_files(&path, true)?);
            }
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("md") | Some("txt") => files.push(path),
            _ => {}
        }
    }

    files.sort();
    Ok(files)
}

fn print_pack(pack: &statute_harness::retrieve::ResultPack) {
    if pack.groups.is_empty() {
        println!("No results.");
        return;
    }

    println!(
        "{} results ({}, {} chars)",
        pack.groups.len(),
        pack.strategy.as_str(),
        pack.total_char_count
    );
    println!();

    for (i, group) in pack.groups.iter().enumerate() {
        let score = group.primary.score.unwrap_or(0.0);
        println!(
            "{}. [{:.3}] {} ({})",
            i + 1,
            score,
            group.primary.path_display,
            group.primary.kind.as_str()
        );
        println!("   id: {}", group.primary.chunk_id);
        for line in group.primary.content.lines() {
            println!("   {}", line);
        }
        if !group.ancestors.is_empty() {
            println!("   -- context --");
            for ancestor in &group.ancestors {
                println!(
                    "   [{}] {}",
                    ancestor.kind.as_str(),
                    first_line(&ancestor.content)
                );
            }
        }
        if !group.siblings.is_empty() {
            println!("   -- siblings --");
            for sibling in &group.siblings {
                println!(
                    "   [{}] {}",
                    sibling.kind.as_str(),
                    first_line(&sibling.content)
                );
            }
        }
        println!();
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}
