//! Database statistics and health overview.
//!
//! Provides a quick summary of what's indexed: document counts, chunk and
//! closure counts, and embedding coverage per layer. Used by `lex stats` to
//! give confidence that indexing runs are doing what they should.

use sqlx::{Row, SqlitePool};

use crate::error::Result;

struct DocumentStats {
    id: String,
    title: String,
    chunk_count: i64,
    summary_rows: i64,
    detail_rows: i64,
    total_chars: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(pool: &SqlitePool, db_path: &std::path::Path) -> Result<()> {
    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let total_closure: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_closure")
        .fetch_one(pool)
        .await?;
    let total_summary: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings_summary")
        .fetch_one(pool)
        .await?;
    let total_detail: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings_detail")
        .fetch_one(pool)
        .await?;

    let db_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

    println!("Statute Harness — Database Stats");
    println!("================================");
    println!();
    println!("  Database:           {}", db_path.display());
    println!("  Size:               {}", format_bytes(db_size));
    println!();
    println!("  Documents:          {}", total_docs);
    println!("  Chunks:             {}", total_chunks);
    println!("  Closure edges:      {}", total_closure);
    println!("  Summary embeddings: {}", total_summary);
    println!("  Detail embeddings:  {}", total_detail);

    let rows = sqlx::query(
        r#"
        SELECT
            d.id,
            d.title,
            d.chunk_count,
            d.total_chars,
            (SELECT COUNT(*) FROM embeddings_summary es
               JOIN chunks c ON es.chunk_id = c.id WHERE c.document_id = d.id) AS summary_rows,
            (SELECT COUNT(*) FROM embeddings_detail ed
               JOIN chunks c ON ed.chunk_id = c.id WHERE c.document_id = d.id) AS detail_rows
        FROM documents d
        ORDER BY d.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let docs: Vec<DocumentStats> = rows
        .iter()
        .map(|row| DocumentStats {
            id: row.get("id"),
            title: row.get("title"),
            chunk_count: row.get("chunk_count"),
            summary_rows: row.get("summary_rows"),
            detail_rows: row.get("detail_rows"),
            total_chars: row.get("total_chars"),
        })
        .collect();

    if !docs.is_empty() {
        println!();
        println!("  By document:");
        println!(
            "  {:<20} {:>7} {:>8} {:>8} {:>10}   {}",
            "ID", "CHUNKS", "SUMMARY", "DETAIL", "CHARS", "TITLE"
        );
        println!("  {}", "-".repeat(76));
        for doc in &docs {
            println!(
                "  {:<20} {:>7} {:>8} {:>8} {:>10}   {}",
                clip(&doc.id, 20),
                doc.chunk_count,
                doc.summary_rows,
                doc.detail_rows,
                doc.total_chars,
                doc.title
            );
        }
    }

    println!();
    Ok(())
}

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max - 1).collect::<String>() + "…"
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
