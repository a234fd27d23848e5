//! Storage abstraction for the archive.
//!
//! The [`Store`] trait defines every storage operation the pipeline needs:
//! sources and their spans, chunks, learnings, and the persisted embedding
//! vectors from which the in-memory [`VectorStore`](crate::vector_store::VectorStore)
//! is rebuilt. Backends: [`memory::InMemoryStore`] here, `SqliteStore` in
//! the app crate.
//!
//! Learnings reference their source through the unenforced [`Source`]
//! tag; no backend checks that the source exists. Lookups go through
//! [`Store::resolve_source`], which returns `None` for orphans.
//!
//! Implementations must be `Send + Sync` and serialize their own writes
//! (single writer at a time).

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Chunk, Learning, Source, SourceKind, SourceSummary, SourceUnit, TextSpan};

/// Order for [`Store::list_learnings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearningOrder {
    /// Newest first.
    Recent,
    /// Uniformly shuffled.
    Random,
}

/// A persisted embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVector {
    /// Chunk or learning id.
    pub id: String,
    /// Model that produced the vector.
    pub model: String,
    pub vector: Vec<f32>,
}

/// A distinct model and dimensionality among persisted vectors.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VectorShape {
    pub model: String,
    pub dims: usize,
}

/// An entity whose embedding is missing or stale for a given model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEmbedding {
    /// Chunk or learning id.
    pub id: String,
    pub text: String,
    /// SHA-256 of `text`; stored alongside the vector.
    pub hash: String,
}

/// Row counts across the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub sources: i64,
    pub spans: i64,
    pub chunks: i64,
    pub embedded_chunks: i64,
    pub learnings: i64,
    pub embedded_learnings: i64,
}

/// Abstract storage backend.
///
/// | Group | Methods |
/// |-------|---------|
/// | Sources | [`upsert_source`](Store::upsert_source), [`get_source`](Store::get_source), [`list_sources`](Store::list_sources), [`resolve_source`](Store::resolve_source) |
/// | Spans | [`insert_spans`](Store::insert_spans), [`get_span`](Store::get_span), [`list_spans`](Store::list_spans), [`context_spans`](Store::context_spans) |
/// | Chunks | [`replace_chunks`](Store::replace_chunks), [`get_chunk`](Store::get_chunk), [`upsert_chunk_embedding`](Store::upsert_chunk_embedding), [`chunk_embeddings`](Store::chunk_embeddings), [`pending_chunks`](Store::pending_chunks) |
/// | Learnings | [`insert_learnings`](Store::insert_learnings), [`learnings_for_source`](Store::learnings_for_source), [`delete_learnings_for_source`](Store::delete_learnings_for_source), [`get_learning`](Store::get_learning), [`list_learnings`](Store::list_learnings), [`count_learnings`](Store::count_learnings), [`upsert_learning_embedding`](Store::upsert_learning_embedding), [`learning_embeddings`](Store::learning_embeddings), [`pending_learnings`](Store::pending_learnings) |
/// | Maintenance | [`vector_shapes`](Store::vector_shapes), [`purge_embeddings`](Store::purge_embeddings), [`stats`](Store::stats) |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a source, or update its metadata if the id exists.
    /// `span_count` is maintained by the store and ignored here.
    async fn upsert_source(&self, source: &SourceUnit) -> Result<()>;

    async fn get_source(&self, id: &str) -> Result<Option<SourceUnit>>;

    /// All sources, optionally of one kind, newest first.
    async fn list_sources(&self, kind: Option<SourceKind>) -> Result<Vec<SourceUnit>>;

    /// Resolve a learning's source reference. Returns `None` if the source
    /// is gone or has a different kind.
    async fn resolve_source(&self, source: &Source) -> Result<Option<SourceSummary>> {
        Ok(self
            .get_source(source.id())
            .await?
            .filter(|unit| unit.kind == source.kind())
            .map(|unit| SourceSummary::from(&unit)))
    }

    /// Append spans to a source and bump its `span_count`.
    async fn insert_spans(&self, source_id: &str, spans: &[TextSpan]) -> Result<()>;

    async fn get_span(&self, id: &str) -> Result<Option<TextSpan>>;

    /// All spans of a source ordered by position.
    async fn list_spans(&self, source_id: &str) -> Result<Vec<TextSpan>>;

    /// Up to `before` spans preceding and `after` spans following
    /// `position` within a source, each ordered by position ascending.
    async fn context_spans(
        &self,
        source_id: &str,
        position: i64,
        before: usize,
        after: usize,
    ) -> Result<(Vec<TextSpan>, Vec<TextSpan>)>;

    /// Replace all chunks (and their embeddings) for a span.
    async fn replace_chunks(&self, span_id: &str, chunks: &[Chunk]) -> Result<()>;

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;

    /// Store or replace the embedding vector for a chunk.
    async fn upsert_chunk_embedding(
        &self,
        chunk_id: &str,
        vector: &[f32],
        model: &str,
        content_hash: &str,
    ) -> Result<()>;

    /// Every persisted chunk vector, in insertion order.
    async fn chunk_embeddings(&self) -> Result<Vec<StoredVector>>;

    /// Chunks with no embedding for `model`, or a stale one.
    async fn pending_chunks(&self, model: &str, limit: Option<usize>)
        -> Result<Vec<PendingEmbedding>>;

    /// Insert learnings atomically.
    async fn insert_learnings(&self, learnings: &[Learning]) -> Result<()>;

    async fn learnings_for_source(&self, source: &Source) -> Result<Vec<Learning>>;

    /// Delete every learning (and its embedding) for a source. Returns the
    /// number of learnings removed.
    async fn delete_learnings_for_source(&self, source: &Source) -> Result<usize>;

    async fn get_learning(&self, id: &str) -> Result<Option<Learning>>;

    async fn list_learnings(&self, order: LearningOrder, limit: usize) -> Result<Vec<Learning>>;

    async fn count_learnings(&self) -> Result<i64>;

    /// Store or replace the embedding vector for a learning.
    async fn upsert_learning_embedding(
        &self,
        learning_id: &str,
        vector: &[f32],
        model: &str,
        content_hash: &str,
    ) -> Result<()>;

    /// Every persisted learning vector, in insertion order.
    async fn learning_embeddings(&self) -> Result<Vec<StoredVector>>;

    /// Learnings with no embedding for `model`, or a stale one.
    async fn pending_learnings(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PendingEmbedding>>;

    /// Every distinct model and dimensionality across chunk and learning
    /// vectors, sorted.
    async fn vector_shapes(&self) -> Result<Vec<VectorShape>>;

    /// Delete every persisted vector. Required before switching models.
    async fn purge_embeddings(&self) -> Result<()>;

    async fn stats(&self) -> Result<StoreStats>;
}
