//! Semantic search with conversation context.
//!
//! The [`SearchEngine`] owns two [`VectorStore`] indices, one over chunk
//! embeddings and one over learning embeddings, both initialized with the
//! embedder's dimensionality. Metadata comes from the [`Store`].
//!
//! # Chunk search
//!
//! 1. Embed the query.
//! 2. Take the top `limit` chunks from the vector index.
//! 3. Drop hits whose span fails the filters (date range, role, source).
//!    Filtering runs *after* the vector search, so `limit` bounds the
//!    candidates and aggressive filters can return fewer than `limit`
//!    results.
//! 4. Resolve chunk → span → source and fetch `context_before` preceding
//!    and `context_after` following spans.
//!
//! Results keep the vector order (score descending, ties in insertion
//! order). Hits whose chunk, span, or source no longer resolve are skipped.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::embedding::Embedder;
use crate::error::ConfigError;
use crate::models::{LearningSearchResult, SearchResult, SourceSummary, TextSpan};
use crate::store::{Store, StoredVector};
use crate::vector_store::VectorStore;

/// Default number of vector candidates.
pub const DEFAULT_LIMIT: usize = 20;
/// Default number of preceding spans attached to each result.
pub const DEFAULT_CONTEXT_BEFORE: usize = 2;
/// Default number of following spans attached to each result.
pub const DEFAULT_CONTEXT_AFTER: usize = 1;

/// Filters and context window for [`SearchEngine::search`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    /// Maximum vector candidates (not final results).
    pub limit: usize,
    /// Keep spans created at or after this Unix time.
    pub since: Option<i64>,
    /// Keep spans created at or before this Unix time.
    pub until: Option<i64>,
    /// Keep spans whose role is in this list (case-insensitive). Empty keeps all.
    pub roles: Vec<String>,
    /// Keep spans whose source is in this list. Empty keeps all.
    pub source_ids: Vec<String>,
    pub context_before: usize,
    pub context_after: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            since: None,
            until: None,
            roles: Vec::new(),
            source_ids: Vec::new(),
            context_before: DEFAULT_CONTEXT_BEFORE,
            context_after: DEFAULT_CONTEXT_AFTER,
        }
    }
}

impl SearchOptions {
    /// Whether `span` passes every configured filter.
    pub fn admits(&self, span: &TextSpan) -> bool {
        if self.since.is_some_and(|since| span.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| span.created_at > until) {
            return false;
        }
        if !self.roles.is_empty() && !self.roles.iter().any(|r| r.eq_ignore_ascii_case(&span.role)) {
            return false;
        }
        if !self.source_ids.is_empty() && !self.source_ids.contains(&span.source_id) {
            return false;
        }
        true
    }
}

/// Build a vector index from persisted vectors.
///
/// Fails with a [`ConfigError`] if any vector was produced by a different
/// model or has a different dimensionality than `dims`: the old vectors
/// must be purged before the index can be rebuilt.
pub fn build_index(vectors: Vec<StoredVector>, dims: usize, model: &str) -> Result<VectorStore> {
    let mut index = VectorStore::with_dimensions(dims)?;
    for stored in vectors {
        if stored.model != model {
            return Err(ConfigError::ModelMismatch {
                stored: stored.model,
                configured: model.to_string(),
            }
            .into());
        }
        if stored.vector.len() != dims {
            return Err(ConfigError::DimensionMismatch {
                existing: stored.vector.len(),
                requested: dims,
            }
            .into());
        }
        index.insert(&stored.id, stored.vector)?;
    }
    Ok(index)
}

/// Embeds queries and searches the chunk and learning indices.
pub struct SearchEngine<S: Store + ?Sized> {
    store: Arc<S>,
    embedder: Arc<dyn Embedder>,
    chunks: VectorStore,
    learnings: VectorStore,
}

impl<S: Store + ?Sized> SearchEngine<S> {
    /// Create an engine with empty indices sized to the embedder.
    pub fn new(store: Arc<S>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let dims = embedder.dims();
        Ok(Self {
            store,
            embedder,
            chunks: VectorStore::with_dimensions(dims)?,
            learnings: VectorStore::with_dimensions(dims)?,
        })
    }

    /// Create an engine whose indices hold every persisted vector.
    pub async fn load(store: Arc<S>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let dims = embedder.dims();
        let model = embedder.model_name().to_string();
        let chunks = build_index(store.chunk_embeddings().await?, dims, &model)?;
        let learnings = build_index(store.learning_embeddings().await?, dims, &model)?;
        debug!(
            chunks = chunks.len(),
            learnings = learnings.len(),
            dims,
            "Loaded search indices"
        );
        Ok(Self {
            store,
            embedder,
            chunks,
            learnings,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn chunk_index(&self) -> &VectorStore {
        &self.chunks
    }

    pub fn learning_index(&self) -> &VectorStore {
        &self.learnings
    }

    /// Add or replace a chunk vector in the index (not in storage).
    pub fn index_chunk(&mut self, chunk_id: &str, vector: Vec<f32>) -> Result<()> {
        Ok(self.chunks.insert(chunk_id, vector)?)
    }

    /// Add or replace a learning vector in the index (not in storage).
    pub fn index_learning(&mut self, learning_id: &str, vector: Vec<f32>) -> Result<()> {
        Ok(self.learnings.insert(learning_id, vector)?)
    }

    /// Drop a learning from the index, e.g. after an overwrite deleted it.
    pub fn forget_learning(&mut self, learning_id: &str) -> bool {
        self.learnings.remove(learning_id)
    }

    /// Chunk-level search; see the module docs for the algorithm.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed(query).await?;
        let hits = self.chunks.search(&query_vec, options.limit)?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(chunk) = self.store.get_chunk(&hit.id).await? else {
                debug!(chunk_id = %hit.id, "Skipping hit: chunk not found");
                continue;
            };
            let Some(span) = self.store.get_span(&chunk.span_id).await? else {
                debug!(span_id = %chunk.span_id, "Skipping hit: span not found");
                continue;
            };
            if !options.admits(&span) {
                continue;
            }
            let Some(source) = self.store.get_source(&span.source_id).await? else {
                debug!(source_id = %span.source_id, "Skipping hit: source not found");
                continue;
            };

            let (before, after) = self
                .store
                .context_spans(
                    &span.source_id,
                    span.position,
                    options.context_before,
                    options.context_after,
                )
                .await?;

            results.push(SearchResult {
                chunk_id: chunk.id,
                score: hit.score,
                snippet: chunk.text,
                span,
                source: SourceSummary::from(&source),
                before,
                after,
            });
        }

        Ok(results)
    }

    /// Learning-level search. Each result carries its resolved source, or
    /// `None` when the source has been deleted.
    pub async fn search_learnings(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<LearningSearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed(query).await?;
        let hits = self.learnings.search(&query_vec, limit)?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(learning) = self.store.get_learning(&hit.id).await? else {
                debug!(learning_id = %hit.id, "Skipping hit: learning not found");
                continue;
            };
            let source = self.store.resolve_source(&learning.source).await?;
            results.push(LearningSearchResult {
                learning,
                score: hit.score,
                source,
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::VectorStoreError;

    fn span(role: &str, source_id: &str, created_at: i64) -> TextSpan {
        TextSpan {
            id: "s".into(),
            source_id: source_id.into(),
            position: 0,
            role: role.into(),
            text: String::new(),
            created_at,
        }
    }

    fn stored(id: &str, model: &str, vector: Vec<f32>) -> StoredVector {
        StoredVector {
            id: id.into(),
            model: model.into(),
            vector,
        }
    }

    #[test]
    fn default_options_admit_everything() {
        assert!(SearchOptions::default().admits(&span("tool", "x", 0)));
    }

    #[test]
    fn date_range_is_inclusive() {
        let opts = SearchOptions {
            since: Some(10),
            until: Some(20),
            ..SearchOptions::default()
        };
        assert!(opts.admits(&span("user", "c", 10)));
        assert!(opts.admits(&span("user", "c", 20)));
        assert!(!opts.admits(&span("user", "c", 9)));
        assert!(!opts.admits(&span("user", "c", 21)));
    }

    #[test]
    fn role_and_source_filters() {
        let opts = SearchOptions {
            roles: vec!["User".into()],
            source_ids: vec!["c1".into()],
            ..SearchOptions::default()
        };
        assert!(opts.admits(&span("user", "c1", 0)));
        assert!(!opts.admits(&span("assistant", "c1", 0)));
        assert!(!opts.admits(&span("user", "c2", 0)));
    }

    #[test]
    fn build_index_preserves_order() {
        let index = build_index(
            vec![stored("a", "m", vec![1.0, 0.0]), stored("b", "m", vec![1.0, 0.0])],
            2,
            "m",
        )
        .unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "b");
    }

    #[test]
    fn build_index_rejects_old_dimensions() {
        let err = build_index(vec![stored("a", "m", vec![1.0, 0.0, 0.0])], 2, "m").unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::DimensionMismatch {
                existing: 3,
                requested: 2
            })
        );
    }

    #[test]
    fn build_index_rejects_other_model() {
        let err = build_index(vec![stored("a", "old", vec![1.0, 0.0])], 2, "new").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ModelMismatch { .. })
        ));
    }

    #[test]
    fn build_index_rejects_zero_dims() {
        let err = build_index(Vec::new(), 0, "m").unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::ZeroDimensions)
        );
        assert!(err.downcast_ref::<VectorStoreError>().is_none());
    }
}
