//! Ingestion: source → spans → chunks.
//!
//! Appends spans to a source, assigning positions after the ones already
//! stored, and chunks every span so that each owns at least one chunk.
//! Embedding happens separately (see [`crate::embed`]), so ingestion never
//! fails because an embedding provider is down.

use anyhow::{Context, Result};
use serde::Deserialize;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::models::{SourceUnit, TextSpan};
use crate::store::Store;

/// A span to ingest, before it has an id or position.
#[derive(Debug, Clone, Deserialize)]
pub struct SpanInput {
    pub role: String,
    pub text: String,
    /// Unix seconds; defaults to the source's `created_at`.
    #[serde(default)]
    pub created_at: Option<i64>,
}

/// Counts from one [`ingest_source`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub spans: usize,
    pub chunks: usize,
}

/// Deterministic span id for `(source_id, position)`.
pub fn span_id(source_id: &str, position: i64) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("span:{}:{}", source_id, position).as_bytes(),
    )
    .to_string()
}

/// Upsert `source`, append `spans` to it, and chunk each new span.
pub async fn ingest_source<S: Store + ?Sized>(
    store: &S,
    source: &SourceUnit,
    spans: &[SpanInput],
    max_chars: usize,
) -> Result<IngestStats> {
    store.upsert_source(source).await?;

    let first_position = store
        .get_source(&source.id)
        .await?
        .map(|s| s.span_count)
        .unwrap_or(0);

    let text_spans: Vec<TextSpan> = spans
        .iter()
        .enumerate()
        .map(|(i, input)| {
            let position = first_position + i as i64;
            TextSpan {
                id: span_id(&source.id, position),
                source_id: source.id.clone(),
                position,
                role: input.role.clone(),
                text: input.text.clone(),
                created_at: input.created_at.unwrap_or(source.created_at),
            }
        })
        .collect();

    // Chunk everything before writing so a bad threshold leaves no spans behind.
    let mut chunked = Vec::with_capacity(text_spans.len());
    for span in &text_spans {
        let chunks = chunk_text(&span.id, &span.text, max_chars)
            .with_context(|| format!("chunking span {} of {}", span.position, source.id))?;
        chunked.push(chunks);
    }

    store.insert_spans(&source.id, &text_spans).await?;

    let mut stats = IngestStats {
        spans: text_spans.len(),
        chunks: 0,
    };
    for (span, chunks) in text_spans.iter().zip(chunked) {
        stats.chunks += chunks.len();
        store.replace_chunks(&span.id, &chunks).await?;
    }

    Ok(stats)
}
