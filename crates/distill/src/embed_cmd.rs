//! `distill embed pending|rebuild`.
//!
//! `pending` embeds chunks and learnings whose vector is missing, was made
//! by another model, or was computed from different text. `rebuild` drops
//! every stored vector first, which is required after switching models or
//! dimensions.

use anyhow::{bail, Context, Result};

use distill_core::embed::{check_stored_vectors, embed_pending, EmbedStats, EmbedTarget};
use distill_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let embedder = embedding::create_embedder(&config.embedding)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    check_stored_vectors(&store, embedder.as_ref())
        .await
        .context("Stored embeddings do not match the configured model; run `distill embed rebuild`")?;

    if dry_run {
        let model = embedder.model_name();
        println!("embed pending (dry-run)");
        println!(
            "  chunks needing embeddings: {}",
            store.pending_chunks(model, limit).await?.len()
        );
        println!(
            "  learnings needing embeddings: {}",
            store.pending_learnings(model, limit).await?.len()
        );
        pool.close().await;
        return Ok(());
    }

    let chunks = embed_pending(&store, embedder.as_ref(), EmbedTarget::Chunks, batch_size, limit).await?;
    let learnings =
        embed_pending(&store, embedder.as_ref(), EmbedTarget::Learnings, batch_size, limit).await?;

    println!("embed pending");
    print_stats("chunks", &chunks);
    print_stats("learnings", &learnings);

    pool.close().await;
    Ok(())
}

pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let embedder = embedding::create_embedder(&config.embedding)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    store.purge_embeddings().await?;
    println!("embed rebuild: cleared existing embeddings");

    let chunks = embed_pending(&store, embedder.as_ref(), EmbedTarget::Chunks, batch_size, None).await?;
    let learnings =
        embed_pending(&store, embedder.as_ref(), EmbedTarget::Learnings, batch_size, None).await?;

    print_stats("chunks", &chunks);
    print_stats("learnings", &learnings);

    pool.close().await;
    Ok(())
}

fn print_stats(label: &str, stats: &EmbedStats) {
    if stats.pending == 0 {
        println!("  {}: all up to date", label);
        return;
    }
    println!(
        "  {}: {} pending, {} embedded, {} failed",
        label, stats.pending, stats.embedded, stats.failed
    );
}
