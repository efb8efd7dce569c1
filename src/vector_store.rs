//! Vector index boundary.
//!
//! [`VectorIndex`] is the narrow upsert/search contract the pipeline and
//! retriever depend on. [`QdrantStore`] talks to a Qdrant instance over its
//! REST API; [`InMemoryIndex`] is a self-contained implementation used by
//! tests and offline runs. Collection names are configuration, passed per
//! call so logs and tickets can share one store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::config::QdrantConfig;
use crate::error::OpsError;
use crate::models::{EmbeddingPoint, PointPayload};
use crate::retry::{with_retry, RetryPolicy};

/// Equality conditions applied to point payloads at search time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PayloadFilter {
    pub severity: Option<String>,
    pub ticket_id: Option<String>,
}

impl PayloadFilter {
    pub fn is_empty(&self) -> bool {
        self.severity.is_none() && self.ticket_id.is_none()
    }

    pub fn matches(&self, payload: &PointPayload) -> bool {
        if let Some(ref severity) = self.severity {
            if payload.metadata.severity.as_deref() != Some(severity.as_str()) {
                return false;
            }
        }
        if let Some(ref ticket_id) = self.ticket_id {
            if payload.metadata.ticket_id.as_deref() != Some(ticket_id.as_str()) {
                return false;
            }
        }
        true
    }

    fn to_qdrant(&self) -> serde_json::Value {
        let mut must = Vec::new();
        if let Some(ref severity) = self.severity {
            must.push(serde_json::json!({ "key": "severity", "match": { "value": severity } }));
        }
        if let Some(ref ticket_id) = self.ticket_id {
            must.push(serde_json::json!({ "key": "ticket_id", "match": { "value": ticket_id } }));
        }
        serde_json::json!({ "must": must })
    }
}

/// A raw search hit before threshold filtering.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: PointPayload,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not exist (cosine distance).
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<(), OpsError>;

    /// Insert or replace points by id.
    async fn upsert(&self, collection: &str, points: &[EmbeddingPoint]) -> Result<(), OpsError>;

    /// Remove every point whose payload references the artifact. Used when a
    /// changed source file supersedes a previously ingested artifact, whose
    /// points would otherwise keep serving the outdated content.
    async fn delete_by_artifact(
        &self,
        collection: &str,
        artifact_id: &str,
    ) -> Result<(), OpsError>;

    /// Nearest-neighbor search, ranked by descending similarity.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>, OpsError>;
}

// ============ Qdrant (REST) ============

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl QdrantStore {
    pub fn new(config: &QdrantConfig, retry: RetryPolicy) -> Result<Self, OpsError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OpsError::permanent("qdrant", e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: std::env::var("QDRANT_API_KEY").ok(),
            retry,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(ref key) = self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, OpsError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| OpsError::transient("qdrant", e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(OpsError::transient(
                "qdrant",
                format!("HTTP {}: {}", status, text),
            ));
        }
        Ok(resp)
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<(), OpsError> {
        with_retry(&self.retry, "qdrant", || async {
            let resp = self
                .send(self.request(
                    reqwest::Method::GET,
                    &format!("/collections/{}", collection),
                ))
                .await?;

            if resp.status().is_success() {
                return Ok(());
            }
            if resp.status() != reqwest::StatusCode::NOT_FOUND {
                let text = resp.text().await.unwrap_or_default();
                return Err(OpsError::permanent("qdrant", text));
            }

            let body = serde_json::json!({
                "vectors": { "size": dims, "distance": "Cosine" }
            });
            let resp = self
                .send(
                    self.request(
                        reqwest::Method::PUT,
                        &format!("/collections/{}", collection),
                    )
                    .json(&body),
                )
                .await?;
            if !resp.status().is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(OpsError::permanent("qdrant", text));
            }
            tracing::info!(collection, "created collection");
            Ok(())
        })
        .await
    }

    async fn upsert(&self, collection: &str, points: &[EmbeddingPoint]) -> Result<(), OpsError> {
        if points.is_empty() {
            return Ok(());
        }
        with_retry(&self.retry, "qdrant", || async {
            let body = serde_json::json!({ "points": points });
            let resp = self
                .send(
                    self.request(
                        reqwest::Method::PUT,
                        &format!("/collections/{}/points?wait=true", collection),
                    )
                    .json(&body),
                )
                .await?;
            if !resp.status().is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(OpsError::permanent("qdrant", text));
            }
            Ok(())
        })
        .await
    }

    async fn delete_by_artifact(
        &self,
        collection: &str,
        artifact_id: &str,
    ) -> Result<(), OpsError> {
        with_retry(&self.retry, "qdrant", || async {
            let body = serde_json::json!({
                "filter": {
                    "must": [{ "key": "artifact_id", "match": { "value": artifact_id } }]
                }
            });
            let resp = self
                .send(
                    self.request(
                        reqwest::Method::POST,
                        &format!("/collections/{}/points/delete?wait=true", collection),
                    )
                    .json(&body),
                )
                .await?;
            if !resp.status().is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(OpsError::permanent("qdrant", text));
            }
            Ok(())
        })
        .await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>, OpsError> {
        with_retry(&self.retry, "qdrant", || async {
            let mut body = serde_json::json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true,
            });
            if let Some(f) = filter.filter(|f| !f.is_empty()) {
                body["filter"] = f.to_qdrant();
            }

            let resp = self
                .send(
                    self.request(
                        reqwest::Method::POST,
                        &format!("/collections/{}/points/search", collection),
                    )
                    .json(&body),
                )
                .await?;
            if !resp.status().is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(OpsError::permanent("qdrant", text));
            }

            let parsed: SearchResponse = resp.json().await.map_err(|e| {
                OpsError::permanent("qdrant", format!("invalid search response: {}", e))
            })?;

            let hits = parsed
                .result
                .into_iter()
                .map(|hit| ScoredPoint {
                    id: match hit.id {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    },
                    score: hit.score,
                    payload: hit.payload,
                })
                .collect();
            Ok(hits)
        })
        .await
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    id: serde_json::Value,
    score: f32,
    payload: PointPayload,
}

// ============ In-memory index ============

/// Cosine-similarity index kept entirely in memory.
///
/// Same contract as [`QdrantStore`]; used for tests and offline runs where
/// no external store is available.
#[derive(Default)]
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, HashMap<String, EmbeddingPoint>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap()
            .get(collection)
            .map(|points| points.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn ensure_collection(&self, collection: &str, _dims: usize) -> Result<(), OpsError> {
        self.collections
            .write()
            .unwrap()
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: &[EmbeddingPoint]) -> Result<(), OpsError> {
        let mut collections = self.collections.write().unwrap();
        let entry = collections.entry(collection.to_string()).or_default();
        for point in points {
            entry.insert(point.id.clone(), point.clone());
        }
        Ok(())
    }

    async fn delete_by_artifact(
        &self,
        collection: &str,
        artifact_id: &str,
    ) -> Result<(), OpsError> {
        if let Some(points) = self.collections.write().unwrap().get_mut(collection) {
            points.retain(|_, p| p.payload.metadata.artifact_id != artifact_id);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>, OpsError> {
        let collections = self.collections.read().unwrap();
        let Some(points) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<ScoredPoint> = points
            .values()
            .filter(|p| filter.map_or(true, |f| f.matches(&p.payload)))
            .map(|p| ScoredPoint {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
