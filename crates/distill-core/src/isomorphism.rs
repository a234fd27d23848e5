//! Explaining new concepts by analogy to past learnings.
//!
//! [`IsomorphismEngine::explain`] searches the learning index for the
//! concept, hands the matches to the language model as structured context
//! with a "bridge" prompt, and scores the result:
//!
//! ```text
//! confidence = 0.6 · top1 + 0.4 · mean(top3)
//! ```
//!
//! Scores are clamped to `[0, 1]` before blending (cosine similarity can be
//! negative), so the confidence always lies in `[0, 1]`. It is a ranking
//! signal, not a probability.
//!
//! No related learnings is a normal outcome: the explanation carries
//! [`NO_RELATED_LEARNINGS`], confidence 0 and empty collections, and the
//! model is not called.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::llm::LanguageModel;
use crate::models::LearningSearchResult;
use crate::search::SearchEngine;
use crate::store::Store;

/// Default number of learnings fed to synthesis.
pub const DEFAULT_LEARNING_LIMIT: usize = 7;

/// Maximum insights listed in an explanation.
pub const MAX_INSIGHTS: usize = 5;

/// Maximum length of one insight, in characters.
pub const MAX_INSIGHT_CHARS: usize = 160;

/// Synthesis returned when nothing related is found.
pub const NO_RELATED_LEARNINGS: &str =
    "No related learnings found. Extract learnings from more conversations, then try again.";

/// Default synthesis prompt. `{concept}` is replaced with the query.
pub const DEFAULT_BRIDGE_PROMPT: &str = r#"You are a tutor who explains new ideas through ones the learner already understands.

Explain "{concept}" using the learner's past learnings below. Identify the structural parallels (isomorphisms) between the concept and those learnings, say where each analogy holds and where it breaks down, and finish with a short plain-language summary. Refer to learnings by their titles."#;

#[derive(Debug, Clone)]
pub struct ExplainOptions {
    pub learning_limit: usize,
    /// Replaces [`DEFAULT_BRIDGE_PROMPT`]; may also use `{concept}`.
    pub custom_prompt: Option<String>,
}

impl Default for ExplainOptions {
    fn default() -> Self {
        Self {
            learning_limit: DEFAULT_LEARNING_LIMIT,
            custom_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub concept: String,
    pub synthesis: String,
    pub related_learnings: Vec<LearningSearchResult>,
    pub insights: Vec<String>,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

pub struct IsomorphismEngine<'a, S: Store + ?Sized> {
    search: &'a SearchEngine<S>,
    model: Arc<dyn LanguageModel>,
}

impl<'a, S: Store + ?Sized> IsomorphismEngine<'a, S> {
    pub fn new(search: &'a SearchEngine<S>, model: Arc<dyn LanguageModel>) -> Self {
        Self { search, model }
    }

    pub async fn explain(&self, concept: &str, options: &ExplainOptions) -> Result<Explanation> {
        let related = self
            .search
            .search_learnings(concept, options.learning_limit)
            .await?;

        if related.is_empty() {
            debug!(concept, "No related learnings");
            return Ok(Explanation {
                concept: concept.to_string(),
                synthesis: NO_RELATED_LEARNINGS.to_string(),
                related_learnings: Vec::new(),
                insights: Vec::new(),
                confidence: 0.0,
                timestamp: Utc::now(),
            });
        }

        let template = options
            .custom_prompt
            .as_deref()
            .unwrap_or(DEFAULT_BRIDGE_PROMPT);
        let prompt = template.replace("{concept}", concept);
        let context = build_context(&related);

        let synthesis = self.model.generate(&prompt, Some(&context)).await?;

        let scores: Vec<f64> = related.iter().map(|r| r.score).collect();
        let confidence = confidence(&scores);
        debug!(concept, related = related.len(), confidence, "Synthesized explanation");

        Ok(Explanation {
            concept: concept.to_string(),
            synthesis: synthesis.trim().to_string(),
            insights: extract_insights(&related),
            related_learnings: related,
            confidence,
            timestamp: Utc::now(),
        })
    }
}

/// `0.6 · top1 + 0.4 · mean(top3)` over scores clamped to `[0, 1]`.
/// Order of `scores` does not matter; empty input gives 0.
pub fn confidence(scores: &[f64]) -> f64 {
    let mut clamped: Vec<f64> = scores
        .iter()
        .map(|s| if s.is_nan() { 0.0 } else { s.clamp(0.0, 1.0) })
        .collect();
    if clamped.is_empty() {
        return 0.0;
    }
    clamped.sort_by(|a, b| b.total_cmp(a));

    let top3 = &clamped[..clamped.len().min(3)];
    let mean = top3.iter().sum::<f64>() / top3.len() as f64;
    0.6 * clamped[0] + 0.4 * mean
}

/// Numbered context block for the language model.
pub fn build_context(related: &[LearningSearchResult]) -> String {
    let mut out = String::from("Past learnings:\n");
    for (i, hit) in related.iter().enumerate() {
        let l = &hit.learning;
        out.push_str(&format!("\n[{}] {} (similarity {:.2})\n", i + 1, l.title, hit.score));
        if let Some(title) = hit.source.as_ref().and_then(|s| s.title.as_deref()) {
            out.push_str(&format!("From: {}\n", title));
        }
        if !l.problem.is_empty() {
            out.push_str(&format!("Problem space: {}\n", l.problem));
        }
        out.push_str(&format!("Insight: {}\n", l.insight));
        for block in &l.blocks {
            out.push_str(&format!(
                "Q ({}): {}\nA: {}\n",
                block.kind.as_str(),
                block.question,
                block.answer
            ));
        }
    }
    out
}

/// Up to [`MAX_INSIGHTS`] distinct first sentences of the learnings'
/// insights, each at most [`MAX_INSIGHT_CHARS`] characters.
pub fn extract_insights(related: &[LearningSearchResult]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for hit in related {
        let l = &hit.learning;
        let text = if l.insight.trim().is_empty() {
            &l.title
        } else {
            &l.insight
        };
        let sentence = truncate_chars(first_sentence(text), MAX_INSIGHT_CHARS);
        if sentence.is_empty() || !seen.insert(sentence.to_lowercase()) {
            continue;
        }
        out.push(sentence);
        if out.len() == MAX_INSIGHTS {
            break;
        }
    }
    out
}

fn first_sentence(text: &str) -> &str {
    let text = text.trim();
    let mut prev_terminal = false;
    for (i, c) in text.char_indices() {
        if c == '\n' {
            return text[..i].trim_end();
        }
        if prev_terminal && c.is_whitespace() {
            return &text[..i];
        }
        prev_terminal = matches!(c, '.' | '!' | '?');
    }
    text
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}
