//! In-memory [`Store`] implementation for tests and embedding hosts.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Each method takes
//! the locks it needs for its whole duration, so writes are serialized per
//! table. Learnings are not checked against their sources.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::chunk::hash_text;
use crate::models::{Chunk, Learning, Source, SourceKind, SourceUnit, TextSpan};

use super::{LearningOrder, PendingEmbedding, Store, StoreStats, StoredVector, VectorShape};

struct VectorRow {
    id: String,
    model: String,
    hash: String,
    vector: Vec<f32>,
}

/// In-memory store.
pub struct InMemoryStore {
    sources: RwLock<HashMap<String, SourceUnit>>,
    spans: RwLock<Vec<TextSpan>>,
    chunks: RwLock<Vec<Chunk>>,
    chunk_vectors: RwLock<Vec<VectorRow>>,
    learnings: RwLock<Vec<Learning>>,
    learning_vectors: RwLock<Vec<VectorRow>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            spans: RwLock::new(Vec::new()),
            chunks: RwLock::new(Vec::new()),
            chunk_vectors: RwLock::new(Vec::new()),
            learnings: RwLock::new(Vec::new()),
            learning_vectors: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

fn upsert_vector(rows: &mut Vec<VectorRow>, id: &str, vector: &[f32], model: &str, hash: &str) {
    match rows.iter_mut().find(|r| r.id == id) {
        Some(row) => {
            row.model = model.to_string();
            row.hash = hash.to_string();
            row.vector = vector.to_vec();
        }
        None => rows.push(VectorRow {
            id: id.to_string(),
            model: model.to_string(),
            hash: hash.to_string(),
            vector: vector.to_vec(),
        }),
    }
}

fn is_current(rows: &[VectorRow], id: &str, model: &str, hash: &str) -> bool {
    rows.iter()
        .any(|r| r.id == id && r.model == model && r.hash == hash)
}

fn to_stored(rows: &[VectorRow]) -> Vec<StoredVector> {
    rows.iter()
        .map(|r| StoredVector {
            id: r.id.clone(),
            model: r.model.clone(),
            vector: r.vector.clone(),
        })
        .collect()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_source(&self, source: &SourceUnit) -> Result<()> {
        let mut sources = self.sources.write().map_err(poisoned)?;
        let span_count = sources.get(&source.id).map(|s| s.span_count).unwrap_or(0);
        sources.insert(
            source.id.clone(),
            SourceUnit {
                span_count,
                ..source.clone()
            },
        );
        Ok(())
    }

    async fn get_source(&self, id: &str) -> Result<Option<SourceUnit>> {
        let sources = self.sources.read().map_err(poisoned)?;
        Ok(sources.get(id).cloned())
    }

    async fn list_sources(&self, kind: Option<SourceKind>) -> Result<Vec<SourceUnit>> {
        let sources = self.sources.read().map_err(poisoned)?;
        let mut out: Vec<SourceUnit> = sources
            .values()
            .filter(|s| kind.map_or(true, |k| s.kind == k))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn insert_spans(&self, source_id: &str, spans: &[TextSpan]) -> Result<()> {
        let mut sources = self.sources.write().map_err(poisoned)?;
        let source = match sources.get_mut(source_id) {
            Some(s) => s,
            None => bail!("Cannot insert spans: unknown source '{}'", source_id),
        };
        let mut stored = self.spans.write().map_err(poisoned)?;
        for (i, span) in spans.iter().enumerate() {
            if span.source_id != source_id {
                bail!(
                    "Span '{}' belongs to '{}', not '{}'",
                    span.id,
                    span.source_id,
                    source_id
                );
            }
            let taken = stored
                .iter()
                .chain(&spans[..i])
                .any(|s| s.source_id == source_id && s.position == span.position);
            if taken {
                bail!(
                    "Duplicate span position {} in source '{}'",
                    span.position,
                    source_id
                );
            }
        }
        stored.extend(spans.iter().cloned());
        source.span_count += spans.len() as i64;
        Ok(())
    }

    async fn get_span(&self, id: &str) -> Result<Option<TextSpan>> {
        let spans = self.spans.read().map_err(poisoned)?;
        Ok(spans.iter().find(|s| s.id == id).cloned())
    }

    async fn list_spans(&self, source_id: &str) -> Result<Vec<TextSpan>> {
        let spans = self.spans.read().map_err(poisoned)?;
        let mut out: Vec<TextSpan> = spans
            .iter()
            .filter(|s| s.source_id == source_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.position);
        Ok(out)
    }

    async fn context_spans(
        &self,
        source_id: &str,
        position: i64,
        before: usize,
        after: usize,
    ) -> Result<(Vec<TextSpan>, Vec<TextSpan>)> {
        let all = self.list_spans(source_id).await?;

        let preceding: Vec<TextSpan> = all
            .iter()
            .filter(|s| s.position < position)
            .cloned()
            .collect();
        let skip = preceding.len().saturating_sub(before);
        let preceding = preceding.into_iter().skip(skip).collect();

        let following = all
            .into_iter()
            .filter(|s| s.position > position)
            .take(after)
            .collect();

        Ok((preceding, following))
    }

    async fn replace_chunks(&self, span_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        let mut vectors = self.chunk_vectors.write().map_err(poisoned)?;
        let old: Vec<String> = stored
            .iter()
            .filter(|c| c.span_id == span_id)
            .map(|c| c.id.clone())
            .collect();
        vectors.retain(|v| !old.contains(&v.id));
        stored.retain(|c| c.span_id != span_id);
        stored.extend(chunks.iter().cloned());
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        Ok(chunks.iter().find(|c| c.id == id).cloned())
    }

    async fn upsert_chunk_embedding(
        &self,
        chunk_id: &str,
        vector: &[f32],
        model: &str,
        content_hash: &str,
    ) -> Result<()> {
        let mut vectors = self.chunk_vectors.write().map_err(poisoned)?;
        upsert_vector(&mut vectors, chunk_id, vector, model, content_hash);
        Ok(())
    }

    async fn chunk_embeddings(&self) -> Result<Vec<StoredVector>> {
        let vectors = self.chunk_vectors.read().map_err(poisoned)?;
        Ok(to_stored(&vectors))
    }

    async fn pending_chunks(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PendingEmbedding>> {
        let chunks = self.chunks.read().map_err(poisoned)?;
        let vectors = self.chunk_vectors.read().map_err(poisoned)?;
        Ok(chunks
            .iter()
            .filter(|c| !is_current(&vectors, &c.id, model, &c.hash))
            .take(limit.unwrap_or(usize::MAX))
            .map(|c| PendingEmbedding {
                id: c.id.clone(),
                text: c.text.clone(),
                hash: c.hash.clone(),
            })
            .collect())
    }

    async fn insert_learnings(&self, learnings: &[Learning]) -> Result<()> {
        let mut stored = self.learnings.write().map_err(poisoned)?;
        if let Some(dup) = learnings
            .iter()
            .find(|l| stored.iter().any(|s| s.id == l.id))
        {
            bail!("Duplicate learning id '{}'", dup.id);
        }
        stored.extend(learnings.iter().cloned());
        Ok(())
    }

    async fn learnings_for_source(&self, source: &Source) -> Result<Vec<Learning>> {
        let stored = self.learnings.read().map_err(poisoned)?;
        Ok(stored
            .iter()
            .filter(|l| &l.source == source)
            .cloned()
            .collect())
    }

    async fn delete_learnings_for_source(&self, source: &Source) -> Result<usize> {
        let mut stored = self.learnings.write().map_err(poisoned)?;
        let mut vectors = self.learning_vectors.write().map_err(poisoned)?;
        let doomed: Vec<String> = stored
            .iter()
            .filter(|l| &l.source == source)
            .map(|l| l.id.clone())
            .collect();
        vectors.retain(|v| !doomed.contains(&v.id));
        stored.retain(|l| &l.source != source);
        Ok(doomed.len())
    }

    async fn get_learning(&self, id: &str) -> Result<Option<Learning>> {
        let stored = self.learnings.read().map_err(poisoned)?;
        Ok(stored.iter().find(|l| l.id == id).cloned())
    }

    async fn list_learnings(&self, order: LearningOrder, limit: usize) -> Result<Vec<Learning>> {
        let mut out: Vec<Learning> = self.learnings.read().map_err(poisoned)?.clone();
        match order {
            LearningOrder::Recent => out.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            LearningOrder::Random => out.shuffle(&mut rand::rng()),
        }
        out.truncate(limit);
        Ok(out)
    }

    async fn count_learnings(&self) -> Result<i64> {
        Ok(self.learnings.read().map_err(poisoned)?.len() as i64)
    }

    async fn upsert_learning_embedding(
        &self,
        learning_id: &str,
        vector: &[f32],
        model: &str,
        content_hash: &str,
    ) -> Result<()> {
        let mut vectors = self.learning_vectors.write().map_err(poisoned)?;
        upsert_vector(&mut vectors, learning_id, vector, model, content_hash);
        Ok(())
    }

    async fn learning_embeddings(&self) -> Result<Vec<StoredVector>> {
        let vectors = self.learning_vectors.read().map_err(poisoned)?;
        Ok(to_stored(&vectors))
    }

    async fn pending_learnings(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PendingEmbedding>> {
        let learnings = self.learnings.read().map_err(poisoned)?;
        let vectors = self.learning_vectors.read().map_err(poisoned)?;
        Ok(learnings
            .iter()
            .filter_map(|l| {
                let text = l.embedding_text();
                let hash = hash_text(&text);
                if is_current(&vectors, &l.id, model, &hash) {
                    None
                } else {
                    Some(PendingEmbedding {
                        id: l.id.clone(),
                        text,
                        hash,
                    })
                }
            })
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn vector_shapes(&self) -> Result<Vec<VectorShape>> {
        let chunks = self.chunk_vectors.read().map_err(poisoned)?;
        let learnings = self.learning_vectors.read().map_err(poisoned)?;
        let shapes: BTreeSet<VectorShape> = chunks
            .iter()
            .chain(learnings.iter())
            .map(|r| VectorShape {
                model: r.model.clone(),
                dims: r.vector.len(),
            })
            .collect();
        Ok(shapes.into_iter().collect())
    }

    async fn purge_embeddings(&self) -> Result<()> {
        self.chunk_vectors.write().map_err(poisoned)?.clear();
        self.learning_vectors.write().map_err(poisoned)?.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            sources: self.sources.read().map_err(poisoned)?.len() as i64,
            spans: self.spans.read().map_err(poisoned)?.len() as i64,
            chunks: self.chunks.read().map_err(poisoned)?.len() as i64,
            embedded_chunks: self.chunk_vectors.read().map_err(poisoned)?.len() as i64,
            learnings: self.learnings.read().map_err(poisoned)?.len() as i64,
            embedded_learnings: self.learning_vectors.read().map_err(poisoned)?.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str, kind: SourceKind) -> SourceUnit {
        SourceUnit {
            id: id.to_string(),
            kind,
            title: Some(format!("Title {}", id)),
            platform: "test".to_string(),
            created_at: 100,
            updated_at: 100,
            span_count: 0,
        }
    }

    fn span(source_id: &str, position: i64) -> TextSpan {
        TextSpan {
            id: format!("{}-{}", source_id, position),
            source_id: source_id.to_string(),
            position,
            role: if position % 2 == 0 { "user" } else { "assistant" }.to_string(),
            text: format!("message {}", position),
            created_at: 100 + position,
        }
    }

    fn learning(id: &str, source: Source, created_at: i64) -> Learning {
        Learning {
            id: id.to_string(),
            source,
            title: format!("Learning {}", id),
            problem: "p".to_string(),
            insight: "i".to_string(),
            blocks: vec![],
            tags: vec![],
            created_at,
        }
    }

    #[tokio::test]
    async fn spans_bump_count_and_reject_duplicates() {
        let store = InMemoryStore::new();
        store
            .upsert_source(&source("c1", SourceKind::Conversation))
            .await
            .unwrap();
        store
            .insert_spans("c1", &[span("c1", 0), span("c1", 1)])
            .await
            .unwrap();
        assert_eq!(store.get_source("c1").await.unwrap().unwrap().span_count, 2);
        assert!(store.insert_spans("c1", &[span("c1", 1)]).await.is_err());
        assert!(store.insert_spans("missing", &[span("missing", 0)]).await.is_err());
    }

    #[tokio::test]
    async fn context_window_is_ordered_and_bounded() {
        let store = InMemoryStore::new();
        store
            .upsert_source(&source("c1", SourceKind::Conversation))
            .await
            .unwrap();
        let spans: Vec<TextSpan> = (0..6).map(|p| span("c1", p)).collect();
        store.insert_spans("c1", &spans).await.unwrap();

        let (before, after) = store.context_spans("c1", 3, 2, 1).await.unwrap();
        let b: Vec<i64> = before.iter().map(|s| s.position).collect();
        let a: Vec<i64> = after.iter().map(|s| s.position).collect();
        assert_eq!(b, vec![1, 2]);
        assert_eq!(a, vec![4]);

        let (before, after) = store.context_spans("c1", 0, 2, 1).await.unwrap();
        assert!(before.is_empty());
        assert_eq!(after.len(), 1);
    }

    #[tokio::test]
    async fn resolve_source_handles_orphans_and_kind() {
        let store = InMemoryStore::new();
        store
            .upsert_source(&source("t1", SourceKind::Topic))
            .await
            .unwrap();
        assert!(store
            .resolve_source(&Source::Topic("t1".into()))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .resolve_source(&Source::Conversation("t1".into()))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .resolve_source(&Source::Topic("gone".into()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_learnings_removes_vectors() {
        let store = InMemoryStore::new();
        let src = Source::Conversation("c1".into());
        store
            .insert_learnings(&[
                learning("l1", src.clone(), 1),
                learning("l2", src.clone(), 2),
                learning("l3", Source::Topic("t1".into()), 3),
            ])
            .await
            .unwrap();
        store
            .upsert_learning_embedding("l1", &[1.0], "m", "h")
            .await
            .unwrap();

        assert_eq!(store.delete_learnings_for_source(&src).await.unwrap(), 2);
        assert_eq!(store.count_learnings().await.unwrap(), 1);
        assert!(store.learning_embeddings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recent_order_is_newest_first() {
        let store = InMemoryStore::new();
        let src = Source::Topic("t".into());
        store
            .insert_learnings(&[
                learning("old", src.clone(), 1),
                learning("new", src.clone(), 9),
                learning("mid", src, 5),
            ])
            .await
            .unwrap();
        let ids: Vec<String> = store
            .list_learnings(LearningOrder::Recent, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid"]);
        assert_eq!(
            store
                .list_learnings(LearningOrder::Random, 10)
                .await
                .unwrap()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn pending_chunks_tracks_model_and_hash() {
        let store = InMemoryStore::new();
        let chunk = Chunk {
            id: "k1".into(),
            span_id: "s1".into(),
            chunk_index: 0,
            text: "hello".into(),
            hash: hash_text("hello"),
        };
        store.replace_chunks("s1", &[chunk.clone()]).await.unwrap();
        assert_eq!(store.pending_chunks("m", None).await.unwrap().len(), 1);

        store
            .upsert_chunk_embedding("k1", &[0.5, 0.5], "m", &chunk.hash)
            .await
            .unwrap();
        assert!(store.pending_chunks("m", None).await.unwrap().is_empty());
        assert_eq!(store.pending_chunks("other", None).await.unwrap().len(), 1);

        store.replace_chunks("s1", &[]).await.unwrap();
        assert!(store.chunk_embeddings().await.unwrap().is_empty());
    }
}
