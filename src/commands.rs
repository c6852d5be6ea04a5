//! CLI command implementations.
//!
//! Every command builds the full [`AppState`], which indexes the document
//! library on startup, then prints a human-readable result to stdout.

use std::path::Path;

use anyhow::{Context, Result};
use refchat_core::models::SearchMode;
use refchat_core::prompt::format_snippet;
use refchat_core::retriever::SearchRequest;

use crate::config::Config;
use crate::ingest;
use crate::state::AppState;

/// `refchat search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    mode: SearchMode,
    top_k: Option<usize>,
    offset: usize,
) -> Result<()> {
    let request = SearchRequest {
        query: query.to_string(),
        mode,
        top_k: config.retrieval.resolve_top_k(top_k)?,
        offset,
    };
    let state = AppState::build(config).await?;
    let page = state.retriever.search(&request).await?;
    state.shutdown();

    if page.hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in page.hits.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} (chunk {})",
            offset + i + 1,
            hit.score,
            hit.chunk.filename,
            hit.chunk.chunk_index
        );
        println!(
            "    excerpt: \"{}\"",
            format_snippet(&hit.chunk.text, config.retrieval.snippet_chars)
        );
        println!("    chunk_id: {}", hit.chunk.chunk_id);
        println!();
    }
    println!(
        "Showing {} of {} matches ({} mode).",
        page.hits.len(),
        page.total_matches,
        mode
    );
    Ok(())
}

/// `refchat ask`.
pub async fn run_ask(config: &Config, question: &str, top_k: Option<usize>) -> Result<()> {
    let top_k = config.retrieval.resolve_top_k(top_k)?;
    let state = AppState::build(config).await?;
    let answer = state.retriever.answer(question, top_k).await;
    state.shutdown();
    let answer = answer?;

    println!("{}", answer.answer);
    if !answer.context.is_empty() {
        println!();
        println!("Sources:");
        for hit in &answer.context {
            println!(
                "  - {} (chunk {}) [{:.2}]",
                hit.chunk.filename, hit.chunk.chunk_index, hit.score
            );
        }
    }
    Ok(())
}

/// `refchat upload`: copy a local file into the library and index it.
pub async fn run_upload(config: &Config, path: &Path) -> Result<()> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("Not a file path: {}", path.display()))?;
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let state = AppState::build(config).await?;
    let outcome = ingest::upload_document(&state, &filename, bytes).await;
    state.shutdown();
    let outcome = outcome?;

    println!(
        "{} {} ({}, {} chunks)",
        if outcome.replaced { "Replaced" } else { "Uploaded" },
        outcome.filename,
        format_bytes(outcome.file_size),
        outcome.meta.chunks_count
    );
    Ok(())
}

/// `refchat delete`.
pub async fn run_delete(config: &Config, filename: &str) -> Result<()> {
    let state = AppState::build(config).await?;
    let removed = ingest::delete_document(&state, filename).await;
    state.shutdown();
    println!("Deleted {} ({} chunks removed)", filename, removed?);
    Ok(())
}

/// `refchat documents`.
pub async fn run_documents(config: &Config) -> Result<()> {
    let state = AppState::build(config).await?;
    let documents = state.retriever.index().list_documents();
    state.shutdown();

    if documents.is_empty() {
        println!("No documents in {}.", config.library.docs_dir.display());
        return Ok(());
    }

    println!(
        "  {:<40} {:>5} {:>10} {:>7}   {}",
        "FILENAME", "TYPE", "SIZE", "CHUNKS", "UPLOADED"
    );
    println!("  {}", "-".repeat(84));
    for doc in &documents {
        println!(
            "  {:<40} {:>5} {:>10} {:>7}   {}",
            doc.filename,
            doc.file_type,
            format_bytes(doc.file_size),
            doc.chunks_count,
            doc.upload_date.format("%Y-%m-%d %H:%M")
        );
    }
    println!();
    println!("  {} documents", documents.len());
    Ok(())
}

/// `refchat reindex`.
pub async fn run_reindex(config: &Config) -> Result<()> {
    let state = AppState::build(config).await?;
    // Startup already indexed the library; run again so the command reports
    // its own outcome.
    let report = ingest::reindex_library(&state).await;
    state.shutdown();
    let report = report?;

    println!(
        "Reindexed {} documents into {} chunks.",
        report.documents_processed, report.chunks_created
    );
    for skipped in &report.skipped {
        println!("  skipped: {}", skipped);
    }
    Ok(())
}

/// `refchat stats`.
pub async fn run_stats(config: &Config) -> Result<()> {
    let state = AppState::build(config).await?;
    let stats = state.retriever.index().stats();
    let llm_available = state.llm.health().await;
    state.shutdown();

    println!("refchat - Index Stats");
    println!("=====================");
    println!();
    println!("  Library:     {}", config.library.docs_dir.display());
    println!("  Documents:   {}", stats.total_documents);
    println!("  Chunks:      {}", stats.total_chunks);
    println!(
        "  Embeddings:  {} ({} dims)",
        state.retriever.embedder().model_name(),
        stats.index_dimension
    );
    println!(
        "  LLM:         {} at {} ({})",
        config.llm.model,
        state.llm.url(),
        if llm_available { "available" } else { "unreachable" }
    );
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
