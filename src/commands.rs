//! `kb` subcommand implementations.
//!
//! Each command opens the knowledge base (which reconciles it with the
//! documents folder), performs one operation, prints a summary to stdout,
//! and closes the knowledge base.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use localkb_core::models::{FileFilter, RebuildReport};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::knowledge_base::KnowledgeBase;

async fn open_kb(config: &Config) -> Result<KnowledgeBase> {
    let embedder = create_embedder(&config.embedding)?;
    KnowledgeBase::open(config, embedder).await.with_context(|| {
        format!(
            "Failed to open knowledge base at {}",
            config.kb.data_dir.display()
        )
    })
}

fn print_skipped(report: &RebuildReport) {
    for skipped in &report.skipped {
        println!("  skipped {}: {}", skipped.path.display(), skipped.reason);
    }
}

pub async fn run_init(config: &Config) -> Result<()> {
    let kb = open_kb(config).await?;
    let stats = kb.stats().await;
    kb.close().await?;

    println!(
        "Knowledge base ready at {} ({} documents, {} chunks).",
        config.kb.paths().documents_dir.display(),
        stats.documents,
        stats.chunks
    );
    Ok(())
}

pub async fn run_add(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let kb = open_kb(config).await?;
    let added = kb.add_files(paths).await?;

    for doc in &added {
        println!("Added {}", doc.display_label());
    }
    if let Some(report) = kb.last_rebuild().await {
        println!(
            "Indexed {} chunks from {} documents.",
            report.chunks, report.documents_indexed
        );
        print_skipped(&report);
    }
    kb.close().await?;
    Ok(())
}

pub async fn run_remove(config: &Config, path: &Path) -> Result<()> {
    let kb = open_kb(config).await?;
    if kb.remove_file(path).await? {
        println!("Removed {} from the knowledge base.", path.display());
    } else {
        println!("{} is not in the knowledge base.", path.display());
    }
    kb.close().await?;
    Ok(())
}

pub async fn run_scan(config: &Config) -> Result<()> {
    let kb = open_kb(config).await?;

    // Opening already registers dropped-in files.
    let mut found = kb.registered_new_files_on_load().await;
    if found && kb.last_rebuild().await.is_none() {
        kb.rebuild_index().await?;
    }
    found |= kb.scan_and_update().await?;

    if found {
        println!("New files found and indexed.");
    } else {
        println!("No new files found.");
    }
    kb.close().await?;
    Ok(())
}

pub async fn run_rebuild(config: &Config) -> Result<()> {
    let kb = open_kb(config).await?;
    let report = kb.rebuild_index().await?;
    println!(
        "Rebuilt index: {} chunks from {} documents.",
        report.chunks, report.documents_indexed
    );
    print_skipped(&report);
    kb.close().await?;
    Ok(())
}

pub async fn run_list(config: &Config) -> Result<()> {
    let kb = open_kb(config).await?;
    let documents = kb.documents().await;
    kb.close().await?;

    if documents.is_empty() {
        println!("No documents in the knowledge base.");
        return Ok(());
    }
    for doc in documents {
        println!("{}", doc.display_label());
    }
    Ok(())
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let kb = open_kb(config).await?;
    let stats = kb.stats().await;
    let model = kb.embedder().model_name().to_string();
    kb.close().await?;

    let paths = config.kb.paths();
    println!("Local Knowledge Base Stats");
    println!("==========================");
    println!();
    println!("  Documents dir: {}", paths.documents_dir.display());
    println!("  Index file:    {}", paths.index_file.display());
    println!("  Embedder:      {} ({} dims)", model, stats.dims);
    println!();
    println!("  Documents:     {}", stats.documents);
    println!("  Chunks:        {}", stats.chunks);
    println!("  Vectors:       {}", stats.indexed_vectors);
    if !stats.skipped.is_empty() {
        println!();
        println!("  Skipped on last rebuild:");
        for skipped in &stats.skipped {
            println!("    {}: {}", skipped.path.display(), skipped.reason);
        }
    }
    Ok(())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    files: Vec<String>,
    debug: bool,
) -> Result<()> {
    let kb = open_kb(config).await?;
    kb.set_file_filter(FileFilter::from_selection(Some(files)));

    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let result = kb.search_kb(query, top_k).await?;
    kb.close().await?;

    if debug {
        println!("{}", result.debug_info);
        println!();
    }
    if result.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in result.hits.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, hit.distance, hit.filename);
        println!("   {}", hit.text.trim().replace('\n', "\n   "));
    }
    Ok(())
}
