//! Database statistics.
//!
//! `distill stats` prints archive counts, embedding coverage, and a
//! per-platform breakdown so users can check that imports, embedding, and
//! extraction are keeping up.

use anyhow::Result;
use sqlx::Row;

use distill_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::progress::format_number;
use crate::sqlite_store::SqliteStore;

struct PlatformStats {
    platform: String,
    source_count: i64,
    span_count: i64,
    last_updated: Option<i64>,
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let stats = store.stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Distill Database Stats");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Sources:     {}", format_number(stats.sources as u64));
    println!("  Spans:       {}", format_number(stats.spans as u64));
    println!("  Chunks:      {}", format_number(stats.chunks as u64));
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded_chunks,
        stats.chunks,
        percent(stats.embedded_chunks, stats.chunks)
    );
    println!("  Learnings:   {}", format_number(stats.learnings as u64));
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded_learnings,
        stats.learnings,
        percent(stats.embedded_learnings, stats.learnings)
    );

    let rows = sqlx::query(
        r#"
        SELECT
            s.platform,
            COUNT(DISTINCT s.id) AS source_count,
            COALESCE(SUM(s.span_count), 0) AS span_count,
            MAX(s.updated_at) AS last_updated
        FROM sources s
        GROUP BY s.platform
        ORDER BY source_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let platforms: Vec<PlatformStats> = rows
        .iter()
        .map(|row| PlatformStats {
            platform: row.get("platform"),
            source_count: row.get("source_count"),
            span_count: row.get("span_count"),
            last_updated: row.get("last_updated"),
        })
        .collect();

    if !platforms.is_empty() {
        println!();
        println!("  By platform:");
        println!(
            "  {:<20} {:>8} {:>8}   {}",
            "PLATFORM", "SOURCES", "SPANS", "LAST UPDATED"
        );
        println!("  {}", "-".repeat(60));
        for p in &platforms {
            let updated = match p.last_updated {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<20} {:>8} {:>8}   {}",
                p.platform, p.source_count, p.span_count, updated
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
