//! Language-model providers for extraction and synthesis.
//!
//! Both providers send a single user turn built with
//! [`compose_prompt`](distill_core::llm::compose_prompt) and share the
//! retry policy in [`crate::http`].

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use distill_core::llm::{compose_prompt, LanguageModel};

use crate::config::LlmConfig;
use crate::http;

/// OpenAI chat completions (`POST /v1/chat/completions`).
pub struct OpenAIChat {
    model: String,
    temperature: f32,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("llm.model required for OpenAI provider"))?;
        Ok(Self {
            model,
            temperature: config.temperature,
            api_key: http::openai_api_key()?,
            client: http::client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, context: Option<&str>) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "user", "content": compose_prompt(prompt, context)}
            ],
        });
        let json = http::post_json(
            &self.client,
            "https://api.openai.com/v1/chat/completions",
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

/// Ollama text generation (`POST /api/generate`, non-streaming).
pub struct OllamaChat {
    model: String,
    temperature: f32,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("llm.model required for Ollama provider"))?;
        Ok(Self {
            model,
            temperature: config.temperature,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            client: http::client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, context: Option<&str>) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": compose_prompt(prompt, context),
            "stream": false,
            "options": {"temperature": self.temperature},
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/api/generate", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_generate_response(&json)
    }
}

fn parse_generate_response(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing response field"))
}

/// Create the configured [`LanguageModel`].
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => bail!("LLM provider is disabled. Set [llm] provider in config."),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unknown LLM provider: {}", other),
    }
}
