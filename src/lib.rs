//! # Statute Harness
//!
//! **A hierarchical indexing and retrieval engine for structured legal
//! corpora (Traditional Chinese statutes and regulations).**
//!
//! Statute Harness parses a statute into a typed tree (document → chapter →
//! article → section/detail), persists that tree with path-addressable
//! identifiers and a materialized closure table, indexes each node at the
//! semantic layer appropriate to its granularity, and answers queries by
//! first locating relevant high-level nodes and then expanding into their
//! descendants with bounded context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────────────┐
//! │ statute  │──▶│   chunker     │──▶│  SQLite              │
//! │ markdown │   │ tree + layers │   │ chunks + closure     │
//! └──────────┘   └───────┬───────┘   │ summary/detail vecs  │
//!                        │           └──────────┬───────────┘
//!                 ┌──────▼───────┐              │
//!                 │  embedding   │       ┌──────▼───────┐
//!                 │  client      │──────▶│  retrieve()  │
//!                 └──────────────┘       │  ResultPack  │
//!                                        └──────────────┘
//! ```
//!
//! ## Data flow
//!
//! 1. The **chunker** ([`chunker`]) recognizes statutory structure
//!    (`第X章` chapters, `第N條` articles, numbered items) and emits a
//!    [`models::Document`] whose chunks carry materialized
//!    [`path::HierarchyPath`]s and indexing layers.
//! 2. The **chunk store** ([`store`]) persists the tree transactionally and
//!    materializes the closure table for O(1) ancestor/descendant queries.
//! 3. The **vector store** ([`vector`]) keeps summary-layer and detail-layer
//!    embeddings in disjoint tables, linked back to chunks by id.
//! 4. The **indexer** ([`indexer`]) composes chunker, stores, and the
//!    batch **embedding client** ([`embedding`]) atomically per document.
//! 5. The **retriever** ([`retrieve`]) runs summary-first or direct search
//!    and assembles a [`retrieve::ResultPack`] with ancestor provenance.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Typed error kinds with stable machine-readable names |
//! | [`path`] | ASCII-safe hierarchical paths and deterministic ids |
//! | [`models`] | Core data types: `Document`, `Chunk`, kinds, layers |
//! | [`chunker`] | Structural statute parser producing chunk trees |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Schema migrations (idempotent) |
//! | [`store`] | Chunk persistence and closure-table queries |
//! | [`vector`] | Two-layer vector store with cosine search |
//! | [`embedding`] | Batch embedding client contract and providers |
//! | [`indexer`] | Atomic per-document indexing orchestration |
//! | [`retrieve`] | Summary-first / direct retrieval strategies |
//! | [`get`] | Document inspection for the CLI |
//! | [`stats`] | Database statistics overview |

pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod get;
pub mod indexer;
pub mod migrate;
pub mod models;
pub mod path;
pub mod retrieve;
pub mod stats;
pub mod store;
pub mod vector;

pub use chunker::Chunker;
pub use error::{RagError, Result};
pub use indexer::{IndexOptions, Indexer};
pub use models::{Chunk, ChunkKind, Document, IndexingLayer};
pub use path::HierarchyPath;
pub use retrieve::{RetrievalOptions, RetrievalStrategy, Retriever};
pub use store::ChunkStore;
pub use vector::VectorStore;
