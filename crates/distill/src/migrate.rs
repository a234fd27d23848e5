//! Database schema migrations.
//!
//! Every statement is `IF NOT EXISTS`, so `distill init` can run any number
//! of times. Learnings reference their source by `(source_type, source_id)`
//! without a foreign key: a source may disappear and leave orphans, which
//! readers handle through `Store::resolve_source`.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        title TEXT,
        platform TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        span_count INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS spans (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        role TEXT NOT NULL,
        text TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(source_id, position),
        FOREIGN KEY (source_id) REFERENCES sources(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        span_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        text TEXT NOT NULL,
        hash TEXT NOT NULL,
        UNIQUE(span_id, chunk_index),
        FOREIGN KEY (span_id) REFERENCES spans(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_vectors (
        chunk_id TEXT PRIMARY KEY,
        model TEXT NOT NULL,
        dims INTEGER NOT NULL,
        hash TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        embedding BLOB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS learnings (
        id TEXT PRIMARY KEY,
        source_type TEXT NOT NULL,
        source_id TEXT NOT NULL,
        title TEXT NOT NULL,
        problem TEXT NOT NULL,
        insight TEXT NOT NULL,
        blocks_json TEXT NOT NULL DEFAULT '[]',
        tags_json TEXT NOT NULL DEFAULT '[]',
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS learning_vectors (
        learning_id TEXT PRIMARY KEY,
        model TEXT NOT NULL,
        dims INTEGER NOT NULL,
        hash TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        embedding BLOB NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_spans_source ON spans(source_id, position)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_span ON chunks(span_id)",
    "CREATE INDEX IF NOT EXISTS idx_sources_created_at ON sources(created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_learnings_source ON learnings(source_type, source_id)",
    "CREATE INDEX IF NOT EXISTS idx_learnings_created_at ON learnings(created_at DESC)",
];

/// Apply the schema to an open pool.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Connect to the configured database and apply the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}
