//! `distill extract`: distill archived sources into learnings.

use std::sync::Arc;

use anyhow::{bail, Result};

use distill_core::extract::{ExtractOptions, ExtractionOrchestrator, ExtractionReport, ItemStatus};
use distill_core::models::{Source, SourceKind};
use distill_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::llm;
use crate::progress::ProgressMode;
use crate::sqlite_store::SqliteStore;

/// Which sources to extract.
#[derive(Debug, Clone)]
pub enum Selection {
    /// Every stored source, optionally of one kind.
    All(Option<SourceKind>),
    /// Explicit source ids. Unknown ids are reported as failures.
    Ids(Vec<String>),
}

pub async fn run_extract(
    config: &Config,
    selection: Selection,
    overwrite: bool,
    concurrency: Option<usize>,
    progress: ProgressMode,
) -> Result<()> {
    if !config.llm.is_enabled() {
        bail!("LLM provider is disabled. Set [llm] provider in config.");
    }
    let model = llm::create_language_model(&config.llm)?;

    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));

    let sources = resolve_selection(store.as_ref(), selection).await?;
    if sources.is_empty() {
        println!("extract");
        println!("  no sources to extract");
        pool.close().await;
        return Ok(());
    }

    let options = ExtractOptions {
        concurrency: concurrency.unwrap_or(config.extraction.concurrency),
        overwrite,
        retry: config.extraction.retry_policy(),
    };

    let orchestrator = ExtractionOrchestrator::new(store, model);
    let reporter = progress.reporter();
    let report = orchestrator
        .extract(&sources, &options, reporter.as_ref())
        .await;

    print_report(&report);

    pool.close().await;
    Ok(())
}

/// Turn a selection into source references.
///
/// Ids not found in the store keep the conversation kind; the orchestrator
/// reports them as unknown sources.
pub async fn resolve_selection<S: Store + ?Sized>(
    store: &S,
    selection: Selection,
) -> Result<Vec<Source>> {
    match selection {
        Selection::All(kind) => Ok(store
            .list_sources(kind)
            .await?
            .iter()
            .map(|unit| Source::new(unit.kind, unit.id.clone()))
            .collect()),
        Selection::Ids(ids) => {
            let mut sources = Vec::with_capacity(ids.len());
            for id in ids {
                let kind = store
                    .get_source(&id)
                    .await?
                    .map(|unit| unit.kind)
                    .unwrap_or(SourceKind::Conversation);
                sources.push(Source::new(kind, id));
            }
            Ok(sources)
        }
    }
}

fn print_report(report: &ExtractionReport) {
    println!("extract");
    println!("  sources: {}", report.outcomes.len());
    println!("  extracted: {}", report.extracted());
    println!("  skipped: {}", report.skipped());
    println!("  failed: {}", report.failed());
    println!("  new learnings: {}", report.learnings.len());

    for outcome in &report.outcomes {
        if let ItemStatus::Failed { error, attempts } = &outcome.status {
            println!(
                "  ! {} after {} attempt(s): {}",
                outcome.source, attempts, error
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distill_core::models::SourceUnit;
    use distill_core::store::memory::InMemoryStore;

    fn unit(id: &str, kind: SourceKind) -> SourceUnit {
        SourceUnit {
            id: id.to_string(),
            kind,
            title: None,
            platform: "test".to_string(),
            created_at: 1_700_000_000,
            updated_at: 1_700_000_000,
            span_count: 0,
        }
    }

    #[tokio::test]
    async fn selection_keeps_kind_and_unknown_ids() {
        let store = InMemoryStore::new();
        store.upsert_source(&unit("c1", SourceKind::Conversation)).await.unwrap();
        store.upsert_source(&unit("t1", SourceKind::Topic)).await.unwrap();

        let topics = resolve_selection(&store, Selection::All(Some(SourceKind::Topic)))
            .await
            .unwrap();
        assert_eq!(topics, vec![Source::Topic("t1".into())]);

        let picked = resolve_selection(&store, Selection::Ids(vec!["t1".into(), "ghost".into()]))
            .await
            .unwrap();
        assert_eq!(
            picked,
            vec![Source::Topic("t1".into()), Source::Conversation("ghost".into())]
        );
    }
}
