//! Language-model collaborator trait.
//!
//! Extraction expects JSON-shaped output from [`LanguageModel::generate`];
//! synthesis expects prose. Concrete providers live in the app crate.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Generate a completion for `prompt`, with optional supporting
    /// `context` appended after it.
    async fn generate(&self, prompt: &str, context: Option<&str>) -> Result<String>;
}

/// Join a prompt and its context the way every provider sends them.
pub fn compose_prompt(prompt: &str, context: Option<&str>) -> String {
    match context {
        Some(ctx) if !ctx.trim().is_empty() => format!("{}\n\n{}", prompt.trim_end(), ctx),
        _ => prompt.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_appends_context() {
        assert_eq!(compose_prompt("Explain:", Some("ctx")), "Explain:\n\nctx");
        assert_eq!(compose_prompt("Explain:", Some("  ")), "Explain:");
        assert_eq!(compose_prompt("Explain:", None), "Explain:");
    }
}
