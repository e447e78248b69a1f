//! Document inspection by id.
//!
//! Fetches a document header and its full chunk tree for display. Used by
//! `lex get <document-id>`.

use crate::error::{RagError, Result};
use crate::store::ChunkStore;

/// CLI entry point — prints the document header and its chunk tree.
pub async fn run_get(store: &ChunkStore, document_id: &str) -> Result<()> {
    let record = store
        .get_document(document_id)
        .await?
        .ok_or_else(|| RagError::InvalidInput(format!("document not found: {}", document_id)))?;

    println!("--- Document ---");
    println!("id:           {}", record.id);
    println!("title:        {}", record.title);
    println!("source_file:  {}", record.source_file);
    if let Some(category) = &record.law_category {
        println!("law_category: {}", category);
    }
    if let Some(version) = &record.version {
        println!("version:      {}", version);
    }
    println!("total_chars:  {}", record.total_chars);
    println!("chunk_count:  {}", record.chunk_count);
    println!("created_at:   {}", format_ts_iso(record.created_at));
    println!("updated_at:   {}", format_ts_iso(record.updated_at));
    println!();

    let chunks = store.get_document_chunks(document_id).await?;
    println!("--- Chunks ({}) ---", chunks.len());
    for chunk in &chunks {
        let indent = "  ".repeat(chunk.depth());
        let chapter_label = if chunk.kind == crate::models::ChunkKind::Chapter {
            chunk.chapter_number.as_deref()
        } else {
            None
        };
        let label = chunk
            .article_number
            .as_deref()
            .or(chapter_label)
            .or(chunk.raw_label())
            .unwrap_or("(untitled)");
        println!(
            "{}{} [{}/{}] {} chars",
            indent,
            label,
            chunk.kind.as_str(),
            chunk.indexing_layer.as_str(),
            chunk.char_count()
        );
    }

    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
