//! Chat model boundary.
//!
//! The reasoning loop and the summarization tool depend only on
//! [`ChatModel::complete`]; [`OpenAiChat`] is the production implementation
//! with the same retry classification as the embedding client.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::OpsError;
use crate::retry::{with_retry, RetryPolicy};

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One completion turn: system prompt plus user content in, text out.
    async fn complete(&self, system: &str, user: &str) -> Result<String, OpsError>;
}

pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig, retry: RetryPolicy) -> Result<Self, OpsError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| OpsError::permanent("llm", "OPENAI_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OpsError::permanent("llm", e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            retry,
        })
    }

    async fn request(&self, system: &str, user: &str) -> Result<String, OpsError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| OpsError::transient("llm", e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(OpsError::transient(
                "llm",
                format!("HTTP {}: {}", status, text),
            ));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(OpsError::permanent(
                "llm",
                format!("HTTP {}: {}", status, text),
            ));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| OpsError::permanent("llm", format!("invalid response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OpsError::permanent("llm", "response contained no choices"))
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String, OpsError> {
        with_retry(&self.retry, "llm", || self.request(system, user)).await
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}
