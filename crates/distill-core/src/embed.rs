//! Embedding backfill for chunks and learnings.
//!
//! Finds entities whose embedding is missing or stale for the embedder's
//! model, embeds them in batches, and persists the vectors. A failed batch
//! is counted and skipped; a batch whose vectors have the wrong shape is a
//! validation error and aborts the run.
//!
//! Before anything is embedded, [`check_stored_vectors`] rejects a store
//! that already holds vectors from another model or dimensionality. Those
//! must be purged first, or the store would end up with mixed vectors.

use anyhow::Result;
use tracing::{info, warn};

use crate::embedding::{check_batch, Embedder};
use crate::error::ConfigError;
use crate::store::{PendingEmbedding, Store};

/// Default texts per embedder call.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// What to backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTarget {
    Chunks,
    Learnings,
}

impl EmbedTarget {
    fn label(&self) -> &'static str {
        match self {
            EmbedTarget::Chunks => "chunks",
            EmbedTarget::Learnings => "learnings",
        }
    }
}

/// Counts from one backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedStats {
    pub pending: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Fail with a [`ConfigError`] if any persisted vector was produced by a
/// model other than `embedder`'s or has a different dimensionality.
pub async fn check_stored_vectors<S: Store + ?Sized>(
    store: &S,
    embedder: &dyn Embedder,
) -> Result<()> {
    for shape in store.vector_shapes().await? {
        if shape.model != embedder.model_name() {
            return Err(ConfigError::ModelMismatch {
                stored: shape.model,
                configured: embedder.model_name().to_string(),
            }
            .into());
        }
        if shape.dims != embedder.dims() {
            return Err(ConfigError::DimensionMismatch {
                existing: shape.dims,
                requested: embedder.dims(),
            }
            .into());
        }
    }
    Ok(())
}

/// Embed everything pending for `target`.
pub async fn embed_pending<S: Store + ?Sized>(
    store: &S,
    embedder: &dyn Embedder,
    target: EmbedTarget,
    batch_size: usize,
    limit: Option<usize>,
) -> Result<EmbedStats> {
    check_stored_vectors(store, embedder).await?;

    let model = embedder.model_name().to_string();
    let pending = match target {
        EmbedTarget::Chunks => store.pending_chunks(&model, limit).await?,
        EmbedTarget::Learnings => store.pending_learnings(&model, limit).await?,
    };

    let mut stats = EmbedStats {
        pending: pending.len(),
        ..EmbedStats::default()
    };

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

        let vectors = match embedder.embed_batch(&texts).await {
            Ok(v) => v,
            Err(e) => {
                warn!(kind = target.label(), size = batch.len(), error = %e, "Embedding batch failed");
                stats.failed += batch.len();
                continue;
            }
        };
        check_batch(batch.len(), embedder.dims(), &vectors)?;

        store_batch(store, target, batch, &vectors, &model).await?;
        stats.embedded += batch.len();
    }

    info!(
        kind = target.label(),
        pending = stats.pending,
        embedded = stats.embedded,
        failed = stats.failed,
        "Embedding backfill finished"
    );
    Ok(stats)
}

async fn store_batch<S: Store + ?Sized>(
    store: &S,
    target: EmbedTarget,
    batch: &[PendingEmbedding],
    vectors: &[Vec<f32>],
    model: &str,
) -> Result<()> {
    for (item, vector) in batch.iter().zip(vectors) {
        match target {
            EmbedTarget::Chunks => {
                store
                    .upsert_chunk_embedding(&item.id, vector, model, &item.hash)
                    .await?
            }
            EmbedTarget::Learnings => {
                store
                    .upsert_learning_embedding(&item.id, vector, model, &item.hash)
                    .await?
            }
        }
    }
    Ok(())
}
