//! Embedding service boundary.
//!
//! [`EmbeddingClient`] is the narrow contract the pipeline and retriever
//! depend on; [`OpenAiEmbeddings`] is the production implementation calling
//! `POST /v1/embeddings` with batching and retry/backoff:
//! - HTTP 429 and 5xx → retry per the policy
//! - other 4xx → fail immediately
//! - network errors and timeouts → retry

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::OpsError;
use crate::retry::{with_retry, RetryPolicy};

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OpsError>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, OpsError> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| OpsError::permanent("embedding", "empty embedding response"))
    }
}

pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    retry: RetryPolicy,
}

impl OpenAiEmbeddings {
    pub fn new(config: &EmbeddingConfig, retry: RetryPolicy) -> Result<Self, OpsError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| OpsError::permanent("embedding", "OPENAI_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OpsError::permanent("embedding", e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            retry,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OpsError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| OpsError::transient("embedding", e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(OpsError::transient(
                "embedding",
                format!("HTTP {}: {}", status, text),
            ));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(OpsError::permanent(
                "embedding",
                format!("HTTP {}: {}", status, text),
            ));
        }

        let parsed: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| OpsError::permanent("embedding", format!("invalid response: {}", e)))?;

        // The API may reorder entries; restore input order by index.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddings {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OpsError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = with_retry(&self.retry, "embedding", || self.request(texts)).await?;
        if vectors.len() != texts.len() {
            return Err(OpsError::permanent(
                "embedding",
                format!("expected {} vectors, got {}", texts.len(), vectors.len()),
            ));
        }
        Ok(vectors)
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_restores_input_order() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] },
            ]
        });
        let mut parsed: EmbeddingsResponse = serde_json::from_value(json).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0, 0.0]);
        assert_eq!(parsed.data[1].embedding, vec![0.0, 1.0]);
    }
}
