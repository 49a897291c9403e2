//! Language-model completion client.
//!
//! [`ChatModel`] is the seam the pipeline depends on; [`HttpChatModel`] talks
//! to an OpenAI-compatible chat-completions endpoint. Calls are bounded by
//! the configured timeout and are never retried here — a failed call
//! propagates to the caller, which decides whether to fall back or surface
//! the error.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::ModelConfig;
use crate::models::TokenUsage;

/// One model completion plus the token accounting it reported.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion with a system prompt and a user prompt.
    async fn complete(&self, system: &str, user: &str) -> Result<Completion>;
}

/// Chat completions over HTTP (`POST <endpoint>/chat/completions`).
pub struct HttpChatModel {
    endpoint: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpChatModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn complete(&self, system: &str, user: &str) -> Result<Completion> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Model API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_completion(&json)
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<Completion> {
    let text = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid model response: missing message content"))?
        .to_string();

    let usage_obj = json.get("usage");
    let get_count = |key: &str| -> i64 {
        usage_obj
            .and_then(|u| u.get(key))
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    };
    let usage = TokenUsage {
        prompt_tokens: get_count("prompt_tokens"),
        completion_tokens: get_count("completion_tokens"),
        total_tokens: get_count("total_tokens"),
    };

    Ok(Completion { text, usage })
}
