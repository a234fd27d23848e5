//! `distill import`: load exported conversations from a JSON file.
//!
//! The file holds one conversation object or an array of them:
//!
//! ```json
//! [{
//!   "id": "conv-1",
//!   "title": "Borrow checker",
//!   "platform": "chatgpt",
//!   "kind": "conversation",
//!   "created_at": "2024-05-01T10:00:00Z",
//!   "messages": [
//!     {"role": "user", "text": "Why does this not compile?"},
//!     {"role": "assistant", "content": "Because ...", "created_at": 1714557700}
//!   ]
//! }]
//! ```
//!
//! Timestamps are Unix seconds or RFC 3339 strings. Re-importing a source
//! appends only the messages beyond those already stored, so a grown
//! export can be imported again.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use distill_core::ingest::{ingest_source, SpanInput};
use distill_core::models::{SourceKind, SourceUnit};
use distill_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ImportFile {
    Many(Vec<ImportedSource>),
    One(ImportedSource),
}

#[derive(Debug, Deserialize)]
struct ImportedSource {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default = "default_platform")]
    platform: String,
    #[serde(default)]
    kind: Option<SourceKind>,
    #[serde(default)]
    created_at: Option<Timestamp>,
    #[serde(default)]
    updated_at: Option<Timestamp>,
    #[serde(default)]
    messages: Vec<ImportedMessage>,
}

#[derive(Debug, Deserialize)]
struct ImportedMessage {
    role: String,
    #[serde(alias = "content")]
    text: String,
    #[serde(default)]
    created_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Unix(i64),
    Text(String),
}

impl Timestamp {
    fn to_unix(&self) -> Result<i64> {
        match self {
            Timestamp::Unix(secs) => Ok(*secs),
            Timestamp::Text(text) => Ok(DateTime::parse_from_rfc3339(text)
                .with_context(|| format!("Invalid timestamp: {}", text))?
                .timestamp()),
        }
    }
}

fn default_platform() -> String {
    "import".to_string()
}

/// Totals from one import.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub sources: usize,
    pub unchanged: usize,
    pub spans: usize,
    pub chunks: usize,
}

/// Parse an export file into source units and their span inputs.
fn parse_file(content: &str) -> Result<Vec<(SourceUnit, Vec<SpanInput>)>> {
    let file: ImportFile =
        serde_json::from_str(content).context("Failed to parse import file as JSON")?;
    let imported = match file {
        ImportFile::Many(sources) => sources,
        ImportFile::One(source) => vec![source],
    };

    let now = Utc::now().timestamp();
    let mut parsed = Vec::with_capacity(imported.len());
    for source in imported {
        if source.id.trim().is_empty() {
            bail!("Imported source has an empty id");
        }
        let created_at = match &source.created_at {
            Some(ts) => ts.to_unix()?,
            None => now,
        };
        let updated_at = match &source.updated_at {
            Some(ts) => ts.to_unix()?,
            None => created_at,
        };

        let mut spans = Vec::with_capacity(source.messages.len());
        for message in &source.messages {
            spans.push(SpanInput {
                role: message.role.clone(),
                text: message.text.clone(),
                created_at: message.created_at.as_ref().map(|t| t.to_unix()).transpose()?,
            });
        }

        let unit = SourceUnit {
            id: source.id,
            kind: source.kind.unwrap_or(SourceKind::Conversation),
            title: source.title,
            platform: source.platform,
            created_at,
            updated_at,
            span_count: 0,
        };
        parsed.push((unit, spans));
    }
    Ok(parsed)
}

/// Import every source in `content` into `store`.
pub async fn import_json<S: Store + ?Sized>(
    store: &S,
    content: &str,
    max_chars: usize,
) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    for (unit, spans) in parse_file(content)? {
        let stored = store
            .get_source(&unit.id)
            .await?
            .map(|s| s.span_count as usize)
            .unwrap_or(0);

        let new_spans = spans.get(stored..).unwrap_or_default();
        if stored > 0 && new_spans.is_empty() {
            debug!(source = %unit.id, "Source already imported");
            stats.unchanged += 1;
            continue;
        }

        let ingested = ingest_source(store, &unit, new_spans, max_chars)
            .await
            .with_context(|| format!("Failed to import source {}", unit.id))?;
        stats.sources += 1;
        stats.spans += ingested.spans;
        stats.chunks += ingested.chunks;
    }

    info!(
        sources = stats.sources,
        unchanged = stats.unchanged,
        spans = stats.spans,
        chunks = stats.chunks,
        "Import finished"
    );
    Ok(stats)
}

pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let stats = import_json(&store, &content, config.chunking.max_chars).await?;

    println!("import {}", path.display());
    println!("  sources imported: {}", stats.sources);
    println!("  sources unchanged: {}", stats.unchanged);
    println!("  spans added: {}", stats.spans);
    println!("  chunks written: {}", stats.chunks);

    pool.close().await;
    Ok(())
}
