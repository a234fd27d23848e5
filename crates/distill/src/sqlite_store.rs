//! SQLite-backed [`Store`] implementation.
//!
//! Typed rows cross this boundary in both directions: learning blocks and
//! tags are JSON columns here and nowhere else, and embedding vectors are
//! little-endian `f32` BLOBs decoded with [`blob_to_vec`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use distill_core::chunk::hash_text;
use distill_core::embedding::{blob_to_vec, vec_to_blob};
use distill_core::models::{Chunk, Learning, Source, SourceKind, SourceUnit, TextSpan};
use distill_core::store::{
    LearningOrder, PendingEmbedding, Store, StoreStats, StoredVector, VectorShape,
};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_vectors(&self, sql: &str) -> Result<Vec<StoredVector>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<StoredVector> {
                let blob: Vec<u8> = row.get("embedding");
                Ok(StoredVector {
                    id: row.get("id"),
                    model: row.get("model"),
                    vector: blob_to_vec(&blob)?,
                })
            })
            .collect()
    }
}

/// SQLite reads `LIMIT -1` as "no limit".
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|l| l as i64).unwrap_or(-1)
}

const SOURCE_COLUMNS: &str = "id, kind, title, platform, created_at, updated_at, span_count";
const SPAN_COLUMNS: &str = "id, source_id, position, role, text, created_at";
const LEARNING_COLUMNS: &str =
    "id, source_type, source_id, title, problem, insight, blocks_json, tags_json, created_at";

fn source_from_row(row: &SqliteRow) -> Result<SourceUnit> {
    let kind: String = row.get("kind");
    Ok(SourceUnit {
        id: row.get("id"),
        kind: kind.parse()?,
        title: row.get("title"),
        platform: row.get("platform"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        span_count: row.get("span_count"),
    })
}

fn span_from_row(row: &SqliteRow) -> TextSpan {
    TextSpan {
        id: row.get("id"),
        source_id: row.get("source_id"),
        position: row.get("position"),
        role: row.get("role"),
        text: row.get("text"),
        created_at: row.get("created_at"),
    }
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    Chunk {
        id: row.get("id"),
        span_id: row.get("span_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        hash: row.get("hash"),
    }
}

fn learning_from_row(row: &SqliteRow) -> Result<Learning> {
    let id: String = row.get("id");
    let source_type: String = row.get("source_type");
    let kind: SourceKind = source_type.parse()?;
    let blocks_json: String = row.get("blocks_json");
    let tags_json: String = row.get("tags_json");

    Ok(Learning {
        source: Source::new(kind, row.get::<String, _>("source_id")),
        title: row.get("title"),
        problem: row.get("problem"),
        insight: row.get("insight"),
        blocks: serde_json::from_str(&blocks_json)
            .with_context(|| format!("Invalid blocks_json for learning {}", id))?,
        tags: serde_json::from_str(&tags_json)
            .with_context(|| format!("Invalid tags_json for learning {}", id))?,
        created_at: row.get("created_at"),
        id,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_source(&self, source: &SourceUnit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, kind, title, platform, created_at, updated_at, span_count)
            VALUES (?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                title = excluded.title,
                platform = excluded.platform,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&source.id)
        .bind(source.kind.as_str())
        .bind(&source.title)
        .bind(&source.platform)
        .bind(source.created_at)
        .bind(source.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_source(&self, id: &str) -> Result<Option<SourceUnit>> {
        let row = sqlx::query(&format!("SELECT {} FROM sources WHERE id = ?", SOURCE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    async fn list_sources(&self, kind: Option<SourceKind>) -> Result<Vec<SourceUnit>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sources WHERE (?1 IS NULL OR kind = ?1) ORDER BY created_at DESC, id ASC",
            SOURCE_COLUMNS
        ))
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(source_from_row).collect()
    }

    async fn insert_spans(&self, source_id: &str, spans: &[TextSpan]) -> Result<()> {
        if let Some(stray) = spans.iter().find(|s| s.source_id != source_id) {
            bail!(
                "Span '{}' belongs to '{}', not '{}'",
                stray.id,
                stray.source_id,
                source_id
            );
        }

        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sources WHERE id = ?")
            .bind(source_id)
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            bail!("Cannot insert spans: unknown source '{}'", source_id);
        }

        for span in spans {
            sqlx::query(
                "INSERT INTO spans (id, source_id, position, role, text, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&span.id)
            .bind(&span.source_id)
            .bind(span.position)
            .bind(&span.role)
            .bind(&span.text)
            .bind(span.created_at)
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!(
                    "Failed to insert span {} of source '{}'",
                    span.position, source_id
                )
            })?;
        }

        sqlx::query("UPDATE sources SET span_count = span_count + ? WHERE id = ?")
            .bind(spans.len() as i64)
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_span(&self, id: &str) -> Result<Option<TextSpan>> {
        let row = sqlx::query(&format!("SELECT {} FROM spans WHERE id = ?", SPAN_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(span_from_row))
    }

    async fn list_spans(&self, source_id: &str) -> Result<Vec<TextSpan>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM spans WHERE source_id = ? ORDER BY position ASC",
            SPAN_COLUMNS
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(span_from_row).collect())
    }

    async fn context_spans(
        &self,
        source_id: &str,
        position: i64,
        before: usize,
        after: usize,
    ) -> Result<(Vec<TextSpan>, Vec<TextSpan>)> {
        let before_rows = sqlx::query(&format!(
            "SELECT {} FROM spans WHERE source_id = ? AND position < ? ORDER BY position DESC LIMIT ?",
            SPAN_COLUMNS
        ))
        .bind(source_id)
        .bind(position)
        .bind(before as i64)
        .fetch_all(&self.pool)
        .await?;

        let after_rows = sqlx::query(&format!(
            "SELECT {} FROM spans WHERE source_id = ? AND position > ? ORDER BY position ASC LIMIT ?",
            SPAN_COLUMNS
        ))
        .bind(source_id)
        .bind(position)
        .bind(after as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut preceding: Vec<TextSpan> = before_rows.iter().map(span_from_row).collect();
        preceding.reverse();
        let following = after_rows.iter().map(span_from_row).collect();
        Ok((preceding, following))
    }

    async fn replace_chunks(&self, span_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE span_id = ?)",
        )
        .bind(span_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE span_id = ?")
            .bind(span_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, span_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.span_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query("SELECT id, span_id, chunk_index, text, hash FROM chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(chunk_from_row))
    }

    async fn upsert_chunk_embedding(
        &self,
        chunk_id: &str,
        vector: &[f32],
        model: &str,
        content_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, model, dims, hash, created_at, embedding)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                hash = excluded.hash,
                created_at = excluded.created_at,
                embedding = excluded.embedding
            "#,
        )
        .bind(chunk_id)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(content_hash)
        .bind(chrono::Utc::now().timestamp())
        .bind(vec_to_blob(vector))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn chunk_embeddings(&self) -> Result<Vec<StoredVector>> {
        self.fetch_vectors(
            "SELECT chunk_id AS id, model, embedding FROM chunk_vectors ORDER BY rowid ASC",
        )
        .await
    }

    async fn pending_chunks(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PendingEmbedding>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.text, c.hash
            FROM chunks c
            LEFT JOIN chunk_vectors cv
                ON cv.chunk_id = c.id AND cv.model = ? AND cv.hash = c.hash
            WHERE cv.chunk_id IS NULL
            ORDER BY c.rowid ASC
            LIMIT ?
            "#,
        )
        .bind(model)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PendingEmbedding {
                id: row.get("id"),
                text: row.get("text"),
                hash: row.get("hash"),
            })
            .collect())
    }

    async fn insert_learnings(&self, learnings: &[Learning]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for learning in learnings {
            sqlx::query(
                r#"
                INSERT INTO learnings (id, source_type, source_id, title, problem, insight,
                                       blocks_json, tags_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&learning.id)
            .bind(learning.source.kind().as_str())
            .bind(learning.source.id())
            .bind(&learning.title)
            .bind(&learning.problem)
            .bind(&learning.insight)
            .bind(serde_json::to_string(&learning.blocks)?)
            .bind(serde_json::to_string(&learning.tags)?)
            .bind(learning.created_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert learning '{}'", learning.id))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn learnings_for_source(&self, source: &Source) -> Result<Vec<Learning>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM learnings WHERE source_type = ? AND source_id = ? ORDER BY created_at ASC, rowid ASC",
            LEARNING_COLUMNS
        ))
        .bind(source.kind().as_str())
        .bind(source.id())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(learning_from_row).collect()
    }

    async fn delete_learnings_for_source(&self, source: &Source) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM learning_vectors WHERE learning_id IN
                (SELECT id FROM learnings WHERE source_type = ? AND source_id = ?)
            "#,
        )
        .bind(source.kind().as_str())
        .bind(source.id())
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM learnings WHERE source_type = ? AND source_id = ?")
            .bind(source.kind().as_str())
            .bind(source.id())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted as usize)
    }

    async fn get_learning(&self, id: &str) -> Result<Option<Learning>> {
        let row = sqlx::query(&format!("SELECT {} FROM learnings WHERE id = ?", LEARNING_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(learning_from_row).transpose()
    }

    async fn list_learnings(&self, order: LearningOrder, limit: usize) -> Result<Vec<Learning>> {
        let order_by = match order {
            LearningOrder::Recent => "created_at DESC, rowid DESC",
            LearningOrder::Random => "RANDOM()",
        };
        let rows = sqlx::query(&format!(
            "SELECT {} FROM learnings ORDER BY {} LIMIT ?",
            LEARNING_COLUMNS, order_by
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(learning_from_row).collect()
    }

    async fn count_learnings(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM learnings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn upsert_learning_embedding(
        &self,
        learning_id: &str,
        vector: &[f32],
        model: &str,
        content_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO learning_vectors (learning_id, model, dims, hash, created_at, embedding)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(learning_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                hash = excluded.hash,
                created_at = excluded.created_at,
                embedding = excluded.embedding
            "#,
        )
        .bind(learning_id)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(content_hash)
        .bind(chrono::Utc::now().timestamp())
        .bind(vec_to_blob(vector))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn learning_embeddings(&self) -> Result<Vec<StoredVector>> {
        self.fetch_vectors(
            "SELECT learning_id AS id, model, embedding FROM learning_vectors ORDER BY rowid ASC",
        )
        .await
    }

    async fn pending_learnings(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PendingEmbedding>> {
        // The embedded text is derived from several columns, so staleness is
        // checked here rather than in SQL.
        let rows = sqlx::query(
            r#"
            SELECT l.id, l.source_type, l.source_id, l.title, l.problem, l.insight,
                   l.blocks_json, l.tags_json, l.created_at,
                   lv.model AS vec_model, lv.hash AS vec_hash
            FROM learnings l
            LEFT JOIN learning_vectors lv ON lv.learning_id = l.id
            ORDER BY l.rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut pending = Vec::new();
        for row in &rows {
            if limit.is_some_and(|l| pending.len() >= l) {
                break;
            }
            let learning = learning_from_row(row)?;
            let text = learning.embedding_text();
            let hash = hash_text(&text);
            let vec_model: Option<String> = row.get("vec_model");
            let vec_hash: Option<String> = row.get("vec_hash");
            if vec_model.as_deref() == Some(model) && vec_hash.as_deref() == Some(hash.as_str()) {
                continue;
            }
            pending.push(PendingEmbedding {
                id: learning.id,
                text,
                hash,
            });
        }
        Ok(pending)
    }

    async fn vector_shapes(&self) -> Result<Vec<VectorShape>> {
        let rows = sqlx::query(
            r#"
            SELECT model, dims FROM chunk_vectors
            UNION
            SELECT model, dims FROM learning_vectors
            ORDER BY model, dims
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| VectorShape {
                model: row.get("model"),
                dims: row.get::<i64, _>("dims") as usize,
            })
            .collect())
    }

    async fn purge_embeddings(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunk_vectors")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM learning_vectors")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM sources) AS sources,
                (SELECT COUNT(*) FROM spans) AS spans,
                (SELECT COUNT(*) FROM chunks) AS chunks,
                (SELECT COUNT(*) FROM chunk_vectors) AS embedded_chunks,
                (SELECT COUNT(*) FROM learnings) AS learnings,
                (SELECT COUNT(*) FROM learning_vectors) AS embedded_learnings
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            sources: row.get("sources"),
            spans: row.get("spans"),
            chunks: row.get("chunks"),
            embedded_chunks: row.get("embedded_chunks"),
            learnings: row.get("learnings"),
            embedded_learnings: row.get("embedded_learnings"),
        })
    }
}
