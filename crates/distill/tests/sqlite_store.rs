//! SQLite store behaviour and the full pipeline running on it.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use distill::config::Config;
use distill::import::import_json;
use distill::sqlite_store::SqliteStore;
use distill::{db, migrate};
use distill_core::embed::{embed_pending, EmbedTarget};
use distill_core::embedding::Embedder;
use distill_core::error::ConfigError;
use distill_core::extract::{ExtractOptions, ExtractionOrchestrator, ItemStatus, NoProgress};
use distill_core::isomorphism::{ExplainOptions, IsomorphismEngine};
use distill_core::llm::LanguageModel;
use distill_core::models::{Learning, Source, SourceKind, SourceUnit, TextSpan};
use distill_core::search::{SearchEngine, SearchOptions};
use distill_core::store::{LearningOrder, Store};

const KEYWORDS: [&str; 3] = ["rust", "python", "docker"];

/// Counts keyword occurrences; the last component keeps vectors non-zero.
struct KeywordEmbedder {
    model: String,
}

impl KeywordEmbedder {
    fn new() -> Self {
        Self {
            model: "keywords".to_string(),
        }
    }

    fn named(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        KEYWORDS.len() + 1
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let mut v: Vec<f32> = KEYWORDS
                    .iter()
                    .map(|k| lower.matches(k).count() as f32)
                    .collect();
                v.push(0.01);
                v
            })
            .collect())
    }
}

struct FixedModel(String);

#[async_trait]
impl LanguageModel for FixedModel {
    fn model_name(&self) -> &str {
        "fixed"
    }

    async fn generate(&self, _prompt: &str, _context: Option<&str>) -> Result<String> {
        Ok(self.0.clone())
    }
}

const EXPORT: &str = r#"[
  {
    "id": "conv-rust",
    "title": "Borrowing in Rust",
    "platform": "chatgpt",
    "created_at": 1714521600,
    "messages": [
      {"role": "user", "text": "How does borrowing work in Rust?"},
      {"role": "assistant", "text": "Rust allows many shared borrows or one mutable borrow."}
    ]
  },
  {
    "id": "conv-docker",
    "title": "Compose networking",
    "platform": "claude",
    "created_at": 1717200000,
    "messages": [
      {"role": "user", "text": "Why can't my docker containers reach each other?"},
      {"role": "assistant", "text": "Put both docker services on the same network."}
    ]
  }
]"#;

async fn setup() -> (TempDir, Arc<SqliteStore>) {
    let tmp = TempDir::new().unwrap();
    let config: Config = toml::from_str(&format!(
        "[db]\npath = \"{}\"",
        tmp.path().join("data/distill.sqlite").display()
    ))
    .unwrap();
    let pool = db::connect(&config).await.unwrap();
    migrate::migrate(&pool).await.unwrap();
    (tmp, Arc::new(SqliteStore::new(pool)))
}

fn unit(id: &str) -> SourceUnit {
    SourceUnit {
        id: id.to_string(),
        kind: SourceKind::Conversation,
        title: Some(format!("Title {}", id)),
        platform: "test".to_string(),
        created_at: 1_700_000_000,
        updated_at: 1_700_000_000,
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
        created_at: 1_700_000_000 + position,
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
        tags: vec!["t".to_string()],
        created_at,
    }
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let (_tmp, store) = setup().await;
    migrate::migrate(store.pool()).await.unwrap();
    assert_eq!(store.stats().await.unwrap().sources, 0);
}

#[tokio::test]
async fn duplicate_positions_roll_back() {
    let (_tmp, store) = setup().await;
    store.upsert_source(&unit("c1")).await.unwrap();
    store
        .insert_spans("c1", &[span("c1", 0), span("c1", 1)])
        .await
        .unwrap();

    let mut dup = span("c1", 1);
    dup.id = "other".to_string();
    let err = store.insert_spans("c1", &[span("c1", 2), dup]).await;
    assert!(err.is_err());

    let source = store.get_source("c1").await.unwrap().unwrap();
    assert_eq!(source.span_count, 2);
    assert_eq!(store.list_spans("c1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn spans_for_unknown_source_are_rejected() {
    let (_tmp, store) = setup().await;
    assert!(store.insert_spans("ghost", &[span("ghost", 0)]).await.is_err());
}

#[tokio::test]
async fn context_window_is_ordered() {
    let (_tmp, store) = setup().await;
    store.upsert_source(&unit("c1")).await.unwrap();
    let spans: Vec<TextSpan> = (0..6).map(|p| span("c1", p)).collect();
    store.insert_spans("c1", &spans).await.unwrap();

    let (before, after) = store.context_spans("c1", 3, 2, 1).await.unwrap();
    let positions: Vec<i64> = before.iter().map(|s| s.position).collect();
    assert_eq!(positions, vec![1, 2]);
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].position, 4);

    let (before, after) = store.context_spans("c1", 0, 2, 1).await.unwrap();
    assert!(before.is_empty());
    assert_eq!(after[0].position, 1);
}

#[tokio::test]
async fn learnings_round_trip_and_resolve_orphans() {
    let (_tmp, store) = setup().await;
    store.upsert_source(&unit("c1")).await.unwrap();

    let kept = learning("l1", Source::Conversation("c1".into()), 100);
    let orphan = learning("l2", Source::Topic("gone".into()), 200);
    store.insert_learnings(&[kept.clone(), orphan.clone()]).await.unwrap();

    assert_eq!(store.get_learning("l1").await.unwrap(), Some(kept.clone()));
    assert!(store.resolve_source(&kept.source).await.unwrap().is_some());
    assert!(store.resolve_source(&orphan.source).await.unwrap().is_none());

    // The same id under the wrong kind does not resolve.
    assert!(store
        .resolve_source(&Source::Topic("c1".into()))
        .await
        .unwrap()
        .is_none());

    let recent = store.list_learnings(LearningOrder::Recent, 10).await.unwrap();
    let ids: Vec<&str> = recent.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["l2", "l1"]);

    let random = store.list_learnings(LearningOrder::Random, 1).await.unwrap();
    assert_eq!(random.len(), 1);
}

#[tokio::test]
async fn deleting_learnings_drops_their_vectors() {
    let (_tmp, store) = setup().await;
    let source = Source::Conversation("c1".into());
    store
        .insert_learnings(&[learning("l1", source.clone(), 1), learning("l2", source.clone(), 2)])
        .await
        .unwrap();
    store
        .upsert_learning_embedding("l1", &[1.0, 0.0], "m", "h")
        .await
        .unwrap();

    assert_eq!(store.delete_learnings_for_source(&source).await.unwrap(), 2);
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.learnings, 0);
    assert_eq!(stats.embedded_learnings, 0);
}

#[tokio::test]
async fn search_over_imported_conversations() {
    let (_tmp, store) = setup().await;
    let imported = import_json(store.as_ref(), EXPORT, 3000).await.unwrap();
    assert_eq!(imported.sources, 2);
    assert_eq!(imported.chunks, 4);

    let embedder = Arc::new(KeywordEmbedder::new());
    let stats = embed_pending(store.as_ref(), embedder.as_ref(), EmbedTarget::Chunks, 64, None)
        .await
        .unwrap();
    assert_eq!(stats.embedded, 4);
    assert!(store.pending_chunks("keywords", None).await.unwrap().is_empty());

    let engine = SearchEngine::load(store.clone(), embedder.clone()).await.unwrap();
    assert_eq!(engine.chunk_index().len(), 4);

    let results = engine.search("rust", &SearchOptions::default()).await.unwrap();
    assert_eq!(results[0].source.id, "conv-rust");
    assert_eq!(results[0].source.title.as_deref(), Some("Borrowing in Rust"));
    assert_eq!(results[0].before.len() + results[0].after.len(), 1);

    let users_only = SearchOptions {
        roles: vec!["USER".to_string()],
        ..SearchOptions::default()
    };
    let results = engine.search("docker", &users_only).await.unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.span.role == "user"));

    let from_june = SearchOptions {
        since: Some(1_717_200_000),
        ..SearchOptions::default()
    };
    let results = engine.search("rust", &from_june).await.unwrap();
    assert!(results.iter().all(|r| r.source.id == "conv-docker"));
}

#[tokio::test]
async fn switching_models_requires_a_rebuild() {
    let (_tmp, store) = setup().await;
    import_json(store.as_ref(), EXPORT, 3000).await.unwrap();
    let old = KeywordEmbedder::named("old-model");
    embed_pending(store.as_ref(), &old, EmbedTarget::Chunks, 64, None)
        .await
        .unwrap();

    let new: Arc<dyn Embedder> = Arc::new(KeywordEmbedder::named("new-model"));
    let err = SearchEngine::load(store.clone(), new.clone())
        .await
        .err()
        .expect("stale vectors must not load");
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::ModelMismatch { .. })
    ));

    assert_eq!(store.pending_chunks("new-model", None).await.unwrap().len(), 4);
    let err = embed_pending(store.as_ref(), new.as_ref(), EmbedTarget::Chunks, 64, Some(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::ModelMismatch { .. })
    ));
    let shapes = store.vector_shapes().await.unwrap();
    assert_eq!(shapes.len(), 1);
    assert_eq!(shapes[0].model, "old-model");

    store.purge_embeddings().await.unwrap();
    embed_pending(store.as_ref(), new.as_ref(), EmbedTarget::Chunks, 64, None)
        .await
        .unwrap();
    assert!(SearchEngine::load(store.clone(), new).await.is_ok());
}

#[tokio::test]
async fn extract_then_explain() {
    let (_tmp, store) = setup().await;
    import_json(store.as_ref(), EXPORT, 3000).await.unwrap();

    let reply = r#"[{
        "title": "Rust borrowing rule",
        "problem": "Aliasing and mutation together cause data races.",
        "insight": "Rust allows many shared borrows or exactly one mutable borrow.",
        "blocks": [{"kind": "definitional", "question": "What is a borrow?", "answer": "A reference."}],
        "tags": ["rust"]
    }]"#;
    let orchestrator = ExtractionOrchestrator::new(store.clone(), Arc::new(FixedModel(reply.into())));
    let source = Source::Conversation("conv-rust".into());

    let report = orchestrator
        .extract(&[source.clone()], &ExtractOptions::default(), &NoProgress)
        .await;
    assert_eq!(report.extracted(), 1);
    assert_eq!(store.learnings_for_source(&source).await.unwrap().len(), 1);

    let again = orchestrator
        .extract(&[source.clone()], &ExtractOptions::default(), &NoProgress)
        .await;
    assert_eq!(again.outcome(&source), Some(&ItemStatus::Skipped));
    assert_eq!(store.count_learnings().await.unwrap(), 1);

    let embedder = Arc::new(KeywordEmbedder::new());
    embed_pending(store.as_ref(), embedder.as_ref(), EmbedTarget::Learnings, 64, None)
        .await
        .unwrap();

    let search = SearchEngine::load(store.clone(), embedder).await.unwrap();
    let explanation = IsomorphismEngine::new(&search, Arc::new(FixedModel("  Like a lock.  ".into())))
        .explain("rust ownership", &ExplainOptions::default())
        .await
        .unwrap();

    assert_eq!(explanation.synthesis, "Like a lock.");
    assert_eq!(explanation.related_learnings.len(), 1);
    assert!(explanation.related_learnings[0].source.is_some());
    assert!(explanation.confidence > 0.9);
    assert_eq!(explanation.insights.len(), 1);
}
