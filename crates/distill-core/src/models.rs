//! Core data models used throughout Distill.
//!
//! These types represent the archived sources, their text spans and chunks,
//! distilled learnings, and the transient search projections that flow
//! through the retrieval pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The two kinds of archived source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Conversation,
    Topic,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Conversation => "conversation",
            SourceKind::Topic => "topic",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(SourceKind::Conversation),
            "topic" => Ok(SourceKind::Topic),
            other => anyhow::bail!(
                "Unknown source kind: '{}'. Use conversation or topic.",
                other
            ),
        }
    }
}

/// Reference from a learning back to the source it was distilled from.
///
/// Not enforced by storage: a source may be deleted after its learnings
/// were created, so every lookup through a `Source` must handle the
/// not-found case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Source {
    Conversation(String),
    Topic(String),
}

impl Source {
    pub fn new(kind: SourceKind, id: impl Into<String>) -> Self {
        match kind {
            SourceKind::Conversation => Source::Conversation(id.into()),
            SourceKind::Topic => Source::Topic(id.into()),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Conversation(_) => SourceKind::Conversation,
            Source::Topic(_) => SourceKind::Topic,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Source::Conversation(id) | Source::Topic(id) => id,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// A conversation or document-derived topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUnit {
    pub id: String,
    pub kind: SourceKind,
    pub title: Option<String>,
    /// Where the source came from (e.g. `"chatgpt"`, `"claude"`, `"pdf"`).
    pub platform: String,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds.
    pub updated_at: i64,
    /// Number of spans stored for this source. Maintained by the store.
    pub span_count: i64,
}

impl SourceUnit {
    pub fn source(&self) -> Source {
        Source::new(self.kind, self.id.clone())
    }
}

/// One message or turn within a [`SourceUnit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    pub id: String,
    pub source_id: String,
    /// Zero-based, unique within the parent source.
    pub position: i64,
    /// Sender tag (`"user"`, `"assistant"`, ...).
    pub role: String,
    pub text: String,
    /// Unix seconds.
    pub created_at: i64,
}

/// A bounded slice of a span's text; the unit that is embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub span_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, used for embedding staleness detection.
    pub hash: String,
}

/// The kind of question a [`QaBlock`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// "What is X?"
    Definitional,
    /// "Why does X hold?"
    Justificatory,
    /// "How does X differ from Y?"
    Contrastive,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Definitional => "definitional",
            BlockKind::Justificatory => "justificatory",
            BlockKind::Contrastive => "contrastive",
        }
    }
}

/// A flashcard-style question/answer pair attached to a learning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaBlock {
    pub kind: BlockKind,
    pub question: String,
    pub answer: String,
}

/// A distilled knowledge unit derived from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    pub id: String,
    pub source: Source,
    pub title: String,
    /// Why this matters: the problem space the insight addresses.
    pub problem: String,
    /// The core insight.
    pub insight: String,
    #[serde(default)]
    pub blocks: Vec<QaBlock>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Unix seconds.
    pub created_at: i64,
}

impl Learning {
    /// Text used to embed the learning for learning-level search.
    pub fn embedding_text(&self) -> String {
        let mut text = format!("{}\n\n{}\n\n{}", self.title, self.problem, self.insight);
        for block in &self.blocks {
            text.push_str("\n\n");
            text.push_str(&block.question);
            text.push('\n');
            text.push_str(&block.answer);
        }
        text
    }
}

/// Lightweight source metadata used to enrich search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub id: String,
    pub kind: SourceKind,
    pub title: Option<String>,
    pub platform: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&SourceUnit> for SourceSummary {
    fn from(unit: &SourceUnit) -> Self {
        Self {
            id: unit.id.clone(),
            kind: unit.kind,
            title: unit.title.clone(),
            platform: unit.platform.clone(),
            created_at: unit.created_at,
            updated_at: unit.updated_at,
        }
    }
}

/// A chunk-level search hit with its surrounding conversation context.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    /// Cosine similarity of the matched chunk.
    pub score: f64,
    /// Text of the matched chunk.
    pub snippet: String,
    /// The span that owns the matched chunk.
    pub span: TextSpan,
    pub source: SourceSummary,
    /// Preceding sibling spans, ordered by position.
    pub before: Vec<TextSpan>,
    /// Following sibling spans, ordered by position.
    pub after: Vec<TextSpan>,
}

/// A learning-level search hit.
#[derive(Debug, Clone, Serialize)]
pub struct LearningSearchResult {
    pub learning: Learning,
    pub score: f64,
    /// `None` when the originating source no longer exists.
    pub source: Option<SourceSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_round_trips_through_json() {
        let source = Source::Topic("t-42".to_string());
        let json = serde_json::to_string(&source).unwrap();
        assert_eq!(json, r#"{"type":"topic","id":"t-42"}"#);
        let back: Source = serde_json::from_str(&json).unwrap();
        assert_eq!(back, source);
    }

    #[test]
    fn source_kind_parses() {
        assert_eq!(
            "conversation".parse::<SourceKind>().unwrap(),
            SourceKind::Conversation
        );
        assert!("folder".parse::<SourceKind>().is_err());
    }

    #[test]
    fn embedding_text_includes_blocks() {
        let learning = Learning {
            id: "l1".into(),
            source: Source::Conversation("c1".into()),
            title: "Borrowing".into(),
            problem: "Aliasing bugs".into(),
            insight: "Shared XOR mutable".into(),
            blocks: vec![QaBlock {
                kind: BlockKind::Definitional,
                question: "What is a borrow?".into(),
                answer: "A reference with a lifetime.".into(),
            }],
            tags: vec![],
            created_at: 0,
        };
        let text = learning.embedding_text();
        assert!(text.starts_with("Borrowing"));
        assert!(text.contains("What is a borrow?"));
    }
}
