//! `distill explain`: explain a concept through past learnings.

use std::path::Path;

use anyhow::{bail, Context, Result};

use distill_core::isomorphism::{Explanation, ExplainOptions, IsomorphismEngine};

use crate::config::Config;
use crate::llm;
use crate::search::open_engine;

pub async fn run_explain(
    config: &Config,
    concept: &str,
    limit: Option<usize>,
    prompt_file: Option<&Path>,
    json: bool,
) -> Result<()> {
    if concept.trim().is_empty() {
        bail!("Concept must not be empty");
    }
    if !config.llm.is_enabled() {
        bail!("LLM provider is disabled. Set [llm] provider in config.");
    }

    let custom_prompt = match prompt_file {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?,
        ),
        None => None,
    };

    let model = llm::create_language_model(&config.llm)?;
    let (pool, search) = open_engine(config).await?;

    let options = ExplainOptions {
        learning_limit: limit.unwrap_or(config.retrieval.learning_limit),
        custom_prompt,
    };
    let explanation = IsomorphismEngine::new(&search, model)
        .explain(concept, &options)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&explanation)?);
    } else {
        print_explanation(&explanation);
    }

    pool.close().await;
    Ok(())
}

fn print_explanation(explanation: &Explanation) {
    println!("{}", explanation.concept);
    println!("{}", "=".repeat(explanation.concept.chars().count().max(3)));
    println!();
    println!("{}", explanation.synthesis);

    if explanation.related_learnings.is_empty() {
        return;
    }

    println!();
    println!("Related learnings:");
    for related in &explanation.related_learnings {
        println!("  [{:.2}] {}", related.score, related.learning.title);
    }

    if !explanation.insights.is_empty() {
        println!();
        println!("Key insights:");
        for insight in &explanation.insights {
            println!("  - {}", insight);
        }
    }

    println!();
    println!("Confidence: {:.0}%", explanation.confidence * 100.0);
}
