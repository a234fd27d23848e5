//! `distill search`: semantic search over chunks or learnings.
//!
//! Loads both vector indexes from SQLite through [`SqliteStore`], embeds
//! the query with the configured provider, and prints hits with their
//! surrounding conversation context. Filters (`--since`, `--until`,
//! `--role`, `--source`) are applied to the top `--limit` candidates, so
//! fewer than `--limit` results may come back.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};

use distill_core::models::{LearningSearchResult, SearchResult, TextSpan};
use distill_core::search::{SearchEngine, SearchOptions};

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

/// Flags for one `distill search` invocation.
#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    pub query: String,
    pub limit: Option<usize>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub roles: Vec<String>,
    pub sources: Vec<String>,
    /// Context spans before each hit; defaults to `retrieval.context_before`.
    pub before: Option<usize>,
    /// Context spans after each hit; defaults to `retrieval.context_after`.
    pub after: Option<usize>,
    pub learnings: bool,
    pub json: bool,
}

/// Open the database and load a search engine with both indexes.
pub async fn open_engine(config: &Config) -> Result<(sqlx::SqlitePool, SearchEngine<SqliteStore>)> {
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }
    let embedder = embedding::create_embedder(&config.embedding)?;
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let engine = SearchEngine::load(store, embedder)
        .await
        .context("Failed to load vector indexes (run `distill embed rebuild` after changing models)")?;
    Ok((pool, engine))
}

/// Parse `YYYY-MM-DD` as Unix seconds at the start (or end) of that UTC day.
pub fn parse_date(value: &str, end_of_day: bool) -> Result<i64> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}': expected YYYY-MM-DD", value))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        Some(NaiveTime::MIN)
    };
    let time = time.context("invalid time of day")?;
    Ok(date.and_time(time).and_utc().timestamp())
}

impl SearchArgs {
    fn options(&self, config: &Config) -> Result<SearchOptions> {
        let since = self.since.as_deref().map(|d| parse_date(d, false)).transpose()?;
        let until = self.until.as_deref().map(|d| parse_date(d, true)).transpose()?;
        if let (Some(s), Some(u)) = (since, until) {
            if s > u {
                bail!("--since must not be after --until");
            }
        }
        Ok(SearchOptions {
            limit: self.limit.unwrap_or(config.retrieval.limit),
            since,
            until,
            roles: self.roles.clone(),
            source_ids: self.sources.clone(),
            context_before: self.before.unwrap_or(config.retrieval.context_before),
            context_after: self.after.unwrap_or(config.retrieval.context_after),
        })
    }
}

pub async fn run_search(config: &Config, args: &SearchArgs) -> Result<()> {
    let options = args.options(config)?;
    let (pool, engine) = open_engine(config).await?;

    if args.learnings {
        let limit = args.limit.unwrap_or(config.retrieval.learning_limit);
        let results = engine.search_learnings(&args.query, limit).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&results)?);
        } else {
            print_learning_results(&results);
        }
    } else {
        let results = engine.search(&args.query, &options).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&results)?);
        } else {
            print_results(&results);
        }
    }

    pool.close().await;
    Ok(())
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, result) in results.iter().enumerate() {
        let title = result.source.title.as_deref().unwrap_or("(untitled)");
        println!(
            "{}. [{:.2}] {} ({}, {})",
            i + 1,
            result.score,
            title,
            result.source.platform,
            format_date(result.span.created_at)
        );
        for span in &result.before {
            print_context_line(span);
        }
        println!("  > {}: {}", result.span.role, one_line(&result.snippet, 240));
        for span in &result.after {
            print_context_line(span);
        }
        println!("    source: {}", result.source.id);
        println!();
    }
}

fn print_context_line(span: &TextSpan) {
    println!("    {}: {}", span.role, one_line(&span.text, 120));
}

fn print_learning_results(results: &[LearningSearchResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, result) in results.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, result.score, result.learning.title);
        println!("    {}", one_line(&result.learning.insight, 240));
        match &result.source {
            Some(source) => println!(
                "    from: {} ({})",
                source.title.as_deref().unwrap_or(&source.id),
                source.kind
            ),
            None => println!("    from: {} (source missing)", result.learning.source),
        }
        println!("    id: {}", result.learning.id);
        println!();
    }
}

pub fn format_date(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Collapse whitespace and cut to `max` characters.
pub fn one_line(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_cover_the_whole_day() {
        let start = parse_date("2024-05-01", false).unwrap();
        let end = parse_date("2024-05-01", true).unwrap();
        assert_eq!(start, 1_714_521_600);
        assert_eq!(end - start, 86_399);
        assert!(parse_date("05/01/2024", false).is_err());
    }

    #[test]
    fn one_line_flattens_and_truncates() {
        assert_eq!(one_line("a\n\n b", 10), "a b");
        assert_eq!(one_line("abcdefgh", 4), "abcd...");
    }

    #[test]
    fn inverted_range_is_rejected() {
        let config: Config = toml::from_str("[db]\npath = \"x.sqlite\"").unwrap();
        let args = SearchArgs {
            since: Some("2024-06-01".into()),
            until: Some("2024-05-01".into()),
            ..SearchArgs::default()
        };
        assert!(args.options(&config).is_err());

        let args = SearchArgs {
            roles: vec!["user".into()],
            after: Some(0),
            ..SearchArgs::default()
        };
        let options = args.options(&config).unwrap();
        assert_eq!(options.limit, config.retrieval.limit);
        assert_eq!(options.context_before, config.retrieval.context_before);
        assert_eq!(options.context_after, 0);
        assert_eq!(options.roles, vec!["user".to_string()]);
    }
}
