//! Database schema migrations.
//!
//! Creates all required tables and ensures idempotent execution.
//! Designed to be run via `lex init`.
//!
//! # Schema
//!
//! ```text
//! ┌──────────────┐      ┌────────────────────┐      ┌─────────────────────┐
//! │  documents   │──┐   │      chunks        │──┬──▶│    chunk_closure    │
//! │              │  │   │                    │  │   │                     │
//! │ id (PK)      │  │   │ id (PK)            │  │   │ ancestor_id         │
//! │ title        │  └──▶│ document_id        │  │   │ descendant_id       │
//! │ source_file  │      │ parent_id          │  │   │ distance            │
//! │ law_category │      │ content            │  │   └─────────────────────┘
//! │ version      │      │ path (materialized)│  │
//! │ total_chars  │      │ depth / kind       │  │   ┌─────────────────────┐
//! │ chunk_count  │      │ indexing_layer     │  ├──▶│ embeddings_summary  │
//! │ created_at   │      │ article_number     │  │   │ chunk_id (PK)       │
//! │ updated_at   │      │ chapter_number     │  │   │ embedding / dims    │
//! └──────────────┘      │ position / metadata│  │   └─────────────────────┘
//!                       └────────────────────┘  │   ┌─────────────────────┐
//!                                               └──▶│ embeddings_detail   │
//!                                                   │ chunk_id (PK)       │
//!                                                   │ embedding / dims    │
//!                                                   └─────────────────────┘
//! ```
//!
//! # Tables
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `documents` | One row per indexed statute |
//! | `chunks` | Tree nodes with materialized hierarchical paths |
//! | `chunk_closure` | Transitive ancestor/descendant edges with distance |
//! | `embeddings_summary` | Summary-layer vectors as little-endian f32 BLOBs |
//! | `embeddings_detail` | Detail-layer vectors as little-endian f32 BLOBs |
//!
//! # Idempotency
//!
//! All statements use `CREATE TABLE IF NOT EXISTS` / `CREATE INDEX IF NOT
//! EXISTS`. Running `lex init` multiple times is safe.

use sqlx::SqlitePool;

use crate::error::Result;

/// Run all database migrations. Safe to call repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            source_file TEXT NOT NULL,
            law_category TEXT,
            version TEXT,
            total_chars INTEGER NOT NULL DEFAULT 0,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            parent_id TEXT REFERENCES chunks(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            path TEXT NOT NULL,
            depth INTEGER NOT NULL,
            kind TEXT NOT NULL
                CHECK (kind IN ('document', 'chapter', 'article', 'section', 'detail')),
            indexing_layer TEXT NOT NULL
                CHECK (indexing_layer IN ('summary', 'detail', 'both')),
            source_file TEXT NOT NULL,
            page_number INTEGER NOT NULL DEFAULT 1,
            char_count INTEGER NOT NULL,
            article_number TEXT,
            chapter_number TEXT,
            position INTEGER NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            CHECK ((depth = 0 AND parent_id IS NULL) OR depth > 0),
            UNIQUE (document_id, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_closure (
            ancestor_id TEXT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
            descendant_id TEXT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
            distance INTEGER NOT NULL CHECK (distance >= 0),
            PRIMARY KEY (ancestor_id, descendant_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for table in ["embeddings_summary", "embeddings_detail"] {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                chunk_id TEXT PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
                embedding BLOB NOT NULL,
                dims INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            table
        ))
        .execute(pool)
        .await?;
    }

    // Indexes for common query patterns: tree walks, path containment
    // scans, and closure lookups from either end.
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_parent_id ON chunks(parent_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_depth ON chunks(document_id, depth)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_closure_descendant ON chunk_closure(descendant_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_closure_ancestor_distance ON chunk_closure(ancestor_id, distance)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
