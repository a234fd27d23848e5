//! Batch extraction of learnings from archived sources.
//!
//! [`ExtractionOrchestrator::extract`] fans out one task per source into a
//! [`JoinSet`]. Each task first takes a permit from a shared [`Semaphore`]
//! sized to [`ExtractOptions::concurrency`] and holds it until the source is
//! fully processed, retry sleeps included. The caller's loop is the fan-in
//! barrier: it drains the set, reports progress as each source resolves and
//! returns once every source has an outcome.
//!
//! Per source:
//!
//! 1. Existing learnings for the source → skip, or delete them when
//!    `overwrite` is set.
//! 2. Load spans, render a `role: text` transcript, ask the
//!    [`LanguageModel`] for a JSON array of learnings and parse it. This step
//!    runs under the [`RetryPolicy`]; a missing source fails immediately,
//!    malformed JSON is retried.
//! 3. Persist the learnings.
//!
//! A failure is recorded in the report and passed to
//! [`ExtractionProgress::on_error`]; it never aborts the batch. A task that
//! panics is reported as a failure of its source with zero attempts. Learnings in
//! the report are grouped by source in completion order, which is not
//! deterministic.
//!
//! There is no cancellation: once `extract` is called every source is
//! processed. The skip check is not atomic with the insert, so two tasks for
//! the same source can both extract; ids within one batch are expected to
//! be distinct.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::llm::LanguageModel;
use crate::models::{Learning, QaBlock, Source, TextSpan};
use crate::retry::{with_retry_outcome, RetryPolicy};
use crate::store::Store;

/// Default number of sources extracted at once.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Progress label for a skipped source.
pub const SKIPPED_TITLE: &str = "(skipped)";

/// Progress label for a source that yielded no learnings.
pub const NO_LEARNINGS_TITLE: &str = "(no learnings)";

/// Instruction sent ahead of every transcript.
pub const EXTRACTION_PROMPT: &str = r#"You distill conversations into durable, flashcard-ready learnings.

Read the transcript below and extract the distinct ideas worth remembering. Ignore small talk, greetings and one-off logistics.

Respond with ONLY a JSON array. Each element must have this shape:
{
  "title": "short name for the idea",
  "problem": "why this matters: the problem or question it addresses",
  "insight": "the core insight, in one or two sentences",
  "blocks": [
    {"kind": "definitional", "question": "What is ...?", "answer": "..."},
    {"kind": "justificatory", "question": "Why does ...?", "answer": "..."},
    {"kind": "contrastive", "question": "How does ... differ from ...?", "answer": "..."}
  ],
  "tags": ["lowercase", "keywords"]
}

"blocks" and "tags" may be empty. Return [] if the transcript holds nothing worth keeping."#;

/// Options for [`ExtractionOrchestrator::extract`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Maximum sources in flight. Treated as at least 1.
    pub concurrency: usize,
    /// Delete existing learnings and re-extract instead of skipping.
    pub overwrite: bool,
    pub retry: RetryPolicy,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            overwrite: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Receives per-source notifications as a batch runs.
///
/// Called from the task driving [`ExtractionOrchestrator::extract`], never
/// concurrently.
pub trait ExtractionProgress: Send + Sync {
    /// A source was extracted or skipped. `title` is the first learning's
    /// title, [`SKIPPED_TITLE`], or [`NO_LEARNINGS_TITLE`].
    fn on_progress(&self, completed: usize, total: usize, title: &str);

    /// A source failed after all attempts.
    fn on_error(&self, source: &Source, error: &anyhow::Error);
}

/// Ignores every notification.
pub struct NoProgress;

impl ExtractionProgress for NoProgress {
    fn on_progress(&self, _completed: usize, _total: usize, _title: &str) {}
    fn on_error(&self, _source: &Source, _error: &anyhow::Error) {}
}

/// What happened to one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Extracted { count: usize, attempts: u32 },
    Skipped,
    Failed { error: String, attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub source: Source,
    pub status: ItemStatus,
}

/// Result of a batch: every new learning plus one outcome per source.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub learnings: Vec<Learning>,
    pub outcomes: Vec<ItemOutcome>,
}

impl ExtractionReport {
    pub fn extracted(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Extracted { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Failed { .. }))
    }

    /// Outcome for `source`, if it was part of the batch.
    pub fn outcome(&self, source: &Source) -> Option<&ItemStatus> {
        self.outcomes
            .iter()
            .find(|o| &o.source == source)
            .map(|o| &o.status)
    }

    fn count(&self, pred: impl Fn(&ItemStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

/// One resolved source. The error stays typed until it reaches progress.
struct Processed {
    outcome: ItemOutcome,
    learnings: Vec<Learning>,
    error: Option<anyhow::Error>,
}

impl Processed {
    fn done(source: Source, status: ItemStatus, learnings: Vec<Learning>) -> Self {
        Self {
            outcome: ItemOutcome { source, status },
            learnings,
            error: None,
        }
    }

    fn failed(source: Source, error: anyhow::Error, attempts: u32) -> Self {
        Self {
            outcome: ItemOutcome {
                source,
                status: ItemStatus::Failed {
                    error: format!("{:#}", error),
                    attempts,
                },
            },
            learnings: Vec::new(),
            error: Some(error),
        }
    }
}

/// Drives extraction over a store with a language model.
pub struct ExtractionOrchestrator<S: Store + ?Sized> {
    store: Arc<S>,
    model: Arc<dyn LanguageModel>,
}

impl<S: Store + ?Sized + 'static> ExtractionOrchestrator<S> {
    pub fn new(store: Arc<S>, model: Arc<dyn LanguageModel>) -> Self {
        Self { store, model }
    }

    /// Extract learnings for every source in `sources`.
    pub async fn extract(
        &self,
        sources: &[Source],
        options: &ExtractOptions,
        progress: &dyn ExtractionProgress,
    ) -> ExtractionReport {
        let total = sources.len();
        let concurrency = options.concurrency.max(1);
        info!(
            total,
            concurrency,
            overwrite = options.overwrite,
            model = self.model.model_name(),
            "Starting extraction"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<task::Id, Source> = HashMap::with_capacity(total);

        for source in sources {
            let store = Arc::clone(&self.store);
            let model = Arc::clone(&self.model);
            let semaphore = Arc::clone(&semaphore);
            let source_for_task = source.clone();
            let overwrite = options.overwrite;
            let retry = options.retry.clone();

            let handle = tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                process_source(&*store, &*model, source_for_task, overwrite, &retry).await
            });
            in_flight.insert(handle.id(), source.clone());
        }

        let mut report = ExtractionReport::default();
        let mut completed = 0usize;

        while let Some(joined) = tasks.join_next_with_id().await {
            completed += 1;
            let processed = match joined {
                Ok((id, done)) => {
                    in_flight.remove(&id);
                    done
                }
                Err(e) => {
                    let Some(source) = in_flight.remove(&e.id()) else {
                        warn!(error = %e, "Extraction task failed for an untracked source");
                        continue;
                    };
                    warn!(source = %source, error = %e, "Extraction task panicked");
                    Processed::failed(source, anyhow::anyhow!("task panicked: {}", e), 0)
                }
            };
            let Processed {
                outcome,
                learnings,
                error,
            } = processed;

            match &outcome.status {
                ItemStatus::Extracted { .. } => {
                    let title = learnings
                        .first()
                        .map(|l| l.title.as_str())
                        .unwrap_or(NO_LEARNINGS_TITLE);
                    progress.on_progress(completed, total, title);
                }
                ItemStatus::Skipped => progress.on_progress(completed, total, SKIPPED_TITLE),
                ItemStatus::Failed { error: message, attempts } => {
                    warn!(source = %outcome.source, attempts, error = %message, "Extraction failed");
                    let error = error.unwrap_or_else(|| anyhow::anyhow!("{}", message));
                    progress.on_error(&outcome.source, &error);
                }
            }

            report.learnings.extend(learnings);
            report.outcomes.push(outcome);
        }

        info!(
            extracted = report.extracted(),
            skipped = report.skipped(),
            failed = report.failed(),
            learnings = report.learnings.len(),
            "Extraction finished"
        );
        report
    }
}

async fn process_source<S: Store + ?Sized>(
    store: &S,
    model: &dyn LanguageModel,
    source: Source,
    overwrite: bool,
    retry: &RetryPolicy,
) -> Processed {
    let failed = Processed::failed;

    let existing = match store.learnings_for_source(&source).await {
        Ok(existing) => existing,
        Err(e) => return failed(source, e, 0),
    };
    if !existing.is_empty() {
        if !overwrite {
            debug!(source = %source, existing = existing.len(), "Skipping source with learnings");
            return Processed::done(source, ItemStatus::Skipped, Vec::new());
        }
        match store.delete_learnings_for_source(&source).await {
            Ok(deleted) => debug!(source = %source, deleted, "Deleted learnings before re-extracting"),
            Err(e) => return failed(source, e, 0),
        }
    }

    let outcome = with_retry_outcome(retry, || extract_once(store, model, &source)).await;
    let attempts = outcome.attempts;
    let learnings = match outcome.result {
        Ok(learnings) => learnings,
        Err(e) => return failed(source, e, attempts),
    };

    if let Err(e) = store.insert_learnings(&learnings).await {
        return failed(source, e, attempts);
    }

    let status = ItemStatus::Extracted {
        count: learnings.len(),
        attempts,
    };
    Processed::done(source, status, learnings)
}

/// One extraction attempt: transcript → model → parsed learnings.
async fn extract_once<S: Store + ?Sized>(
    store: &S,
    model: &dyn LanguageModel,
    source: &Source,
) -> Result<Vec<Learning>> {
    let unit = store
        .get_source(source.id())
        .await?
        .filter(|u| u.kind == source.kind())
        .ok_or_else(|| ValidationError::UnknownSource(source.to_string()))?;

    let spans = store.list_spans(&unit.id).await?;
    if spans.is_empty() {
        return Ok(Vec::new());
    }

    let transcript = render_transcript(unit.title.as_deref(), &spans);
    let raw = model.generate(EXTRACTION_PROMPT, Some(&transcript)).await?;
    let drafts = parse_drafts(&raw)?;

    let now = Utc::now().timestamp();
    Ok(drafts
        .into_iter()
        .filter(|d| !(d.title.trim().is_empty() && d.insight.trim().is_empty()))
        .map(|d| Learning {
            id: Uuid::new_v4().to_string(),
            source: source.clone(),
            title: d.title.trim().to_string(),
            problem: d.problem.trim().to_string(),
            insight: d.insight.trim().to_string(),
            blocks: d.blocks,
            tags: d.tags,
            created_at: now,
        })
        .collect())
}

/// Render spans as `role: text` paragraphs, headed by the title if any.
pub fn render_transcript(title: Option<&str>, spans: &[TextSpan]) -> String {
    let mut out = String::new();
    if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
        out.push_str("Title: ");
        out.push_str(title.trim());
        out.push_str("\n\n");
    }
    let body: Vec<String> = spans
        .iter()
        .map(|s| format!("{}: {}", s.role, s.text.trim()))
        .collect();
    out.push_str(&body.join("\n\n"));
    out
}

/// A learning as the model returns it, before it gets an id and source.
#[derive(Debug, Clone, Deserialize)]
pub struct LearningDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "problem_space", alias = "context")]
    pub problem: String,
    #[serde(default, alias = "core_insight")]
    pub insight: String,
    #[serde(default)]
    pub blocks: Vec<QaBlock>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DraftPayload {
    List(Vec<LearningDraft>),
    Wrapped { learnings: Vec<LearningDraft> },
}

/// Parse model output into drafts.
///
/// Accepts a bare JSON array, a `{"learnings": [...]}` object, either of
/// those inside a fenced code block, or an array surrounded by prose.
pub fn parse_drafts(raw: &str) -> Result<Vec<LearningDraft>, ValidationError> {
    let body = json_body(raw)
        .ok_or_else(|| ValidationError::MalformedExtraction("no JSON array in response".into()))?;

    match serde_json::from_str::<DraftPayload>(body) {
        Ok(DraftPayload::List(drafts)) | Ok(DraftPayload::Wrapped { learnings: drafts }) => {
            Ok(drafts)
        }
        Err(e) => Err(ValidationError::MalformedExtraction(e.to_string())),
    }
}

fn json_body(raw: &str) -> Option<&str> {
    let text = match raw.find("```") {
        Some(open) => {
            let after = &raw[open + 3..];
            // Skip the info string ("json") up to the end of the fence line.
            let start = after.find('\n').map(|i| i + 1).unwrap_or(0);
            let inner = &after[start..];
            match inner.find("```") {
                Some(close) => &inner[..close],
                None => inner,
            }
        }
        None => raw,
    };

    let trimmed = text.trim();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return Some(trimmed);
    }
    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    (end > start).then(|| &trimmed[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlockKind;

    #[test]
    fn parses_bare_array() {
        let drafts = parse_drafts(
            r#"[{"title":"Ownership","problem":"aliasing","insight":"one owner","blocks":[{"kind":"definitional","question":"What?","answer":"This."}]}]"#,
        )
        .unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].title, "Ownership");
        assert_eq!(drafts[0].blocks[0].kind, BlockKind::Definitional);
        assert!(drafts[0].tags.is_empty());
    }

    #[test]
    fn parses_fenced_block_with_prose() {
        let raw = "Here you go:\n```json\n[{\"title\":\"A\",\"insight\":\"B\"}]\n```\nHope that helps.";
        let drafts = parse_drafts(raw).unwrap();
        assert_eq!(drafts[0].title, "A");
        assert_eq!(drafts[0].problem, "");
    }

    #[test]
    fn parses_array_inside_prose() {
        let raw = "Sure! [{\"title\":\"A\",\"core_insight\":\"B\"}] Done.";
        assert_eq!(parse_drafts(raw).unwrap()[0].insight, "B");
    }

    #[test]
    fn parses_wrapped_object() {
        let raw = r#"{"learnings": [{"title": "A", "problem_space": "P", "insight": "I"}]}"#;
        assert_eq!(parse_drafts(raw).unwrap()[0].problem, "P");
    }

    #[test]
    fn empty_array_is_valid() {
        assert!(parse_drafts("[]").unwrap().is_empty());
    }

    #[test]
    fn rejects_prose_only() {
        assert!(matches!(
            parse_drafts("I could not find anything."),
            Err(ValidationError::MalformedExtraction(_))
        ));
    }

    #[test]
    fn rejects_truncated_json() {
        assert!(matches!(
            parse_drafts("[{\"title\": \"A\""),
            Err(ValidationError::MalformedExtraction(_))
        ));
    }

    #[test]
    fn transcript_lists_roles() {
        let span = |position: i64, role: &str, text: &str| TextSpan {
            id: format!("s{}", position),
            source_id: "c".into(),
            position,
            role: role.into(),
            text: text.into(),
            created_at: 0,
        };
        let transcript = render_transcript(
            Some("Borrowing"),
            &[span(0, "user", "why &mut? "), span(1, "assistant", "exclusivity")],
        );
        assert_eq!(
            transcript,
            "Title: Borrowing\n\nuser: why &mut?\n\nassistant: exclusivity"
        );
        assert_eq!(render_transcript(None, &[span(0, "user", "hi")]), "user: hi");
    }

    #[test]
    fn report_counts() {
        let report = ExtractionReport {
            learnings: Vec::new(),
            outcomes: vec![
                ItemOutcome {
                    source: Source::Conversation("a".into()),
                    status: ItemStatus::Skipped,
                },
                ItemOutcome {
                    source: Source::Conversation("b".into()),
                    status: ItemStatus::Extracted {
                        count: 2,
                        attempts: 1,
                    },
                },
                ItemOutcome {
                    source: Source::Topic("c".into()),
                    status: ItemStatus::Failed {
                        error: "down".into(),
                        attempts: 3,
                    },
                },
            ],
        };
        assert_eq!(
            (report.extracted(), report.skipped(), report.failed()),
            (1, 1, 1)
        );
        assert_eq!(
            report.outcome(&Source::Conversation("a".into())),
            Some(&ItemStatus::Skipped)
        );
        assert_eq!(report.outcome(&Source::Topic("a".into())), None);
    }
}
