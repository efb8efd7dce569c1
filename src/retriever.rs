//! Threshold-filtered semantic retrieval.
//!
//! Wraps an embedding client and a vector index behind a single `retrieve`
//! call: embed the query, over-fetch candidates from the index, drop
//! everything below the relevance threshold, return at most `k` matches in
//! descending score order. An empty result is a valid answer, not an error.

use std::sync::Arc;

use crate::embedding::EmbeddingClient;
use crate::error::OpsError;
use crate::models::RetrievalMatch;
use crate::vector_store::{PayloadFilter, VectorIndex};

pub struct ThresholdRetriever {
    embeddings: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    overfetch_factor: usize,
}

impl ThresholdRetriever {
    pub fn new(
        embeddings: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
        overfetch_factor: usize,
    ) -> Self {
        Self {
            embeddings,
            index,
            collection: collection.into(),
            overfetch_factor: overfetch_factor.max(1),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Top-`k` matches scoring at or above `threshold`.
    ///
    /// Over-fetches `k * overfetch_factor` candidates so that threshold
    /// filtering does not starve the result set when low-scoring neighbors
    /// crowd the top of the index response.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<RetrievalMatch>, OpsError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embeddings.embed_query(query).await?;
        let limit = k.saturating_mul(self.overfetch_factor).max(k);

        let hits = self
            .index
            .search(&self.collection, &vector, limit, filter)
            .await?;

        let mut matches: Vec<RetrievalMatch> = hits
            .into_iter()
            .filter(|hit| hit.score >= threshold)
            .map(|hit| RetrievalMatch {
                chunk_id: hit.payload.chunk_id,
                score: hit.score,
                text: hit.payload.text,
                metadata: hit.payload.metadata,
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);

        tracing::debug!(
            collection = %self.collection,
            k,
            threshold,
            matched = matches.len(),
            "retrieval complete"
        );
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, EmbeddingPoint, PointPayload};
    use crate::vector_store::InMemoryIndex;
    use async_trait::async_trait;

    /// Maps known phrases onto fixed 2-d vectors.
    struct PhraseEmbedder;

    fn phrase_vector(text: &str) -> Vec<f32> {
        match text {
            "database errors" => vec![1.0, 0.0],
            t if t.contains("connection refused") => vec![0.95, 0.31],
            t if t.contains("disk pressure") => vec![0.5, 0.87],
            t if t.contains("deploy finished") => vec![0.0, 1.0],
            _ => vec![0.0, 0.0],
        }
    }

    #[async_trait]
    impl EmbeddingClient for PhraseEmbedder {
        fn dims(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OpsError> {
            Ok(texts.iter().map(|t| phrase_vector(t)).collect())
        }
    }

    async fn seeded_retriever() -> ThresholdRetriever {
        let index = Arc::new(InMemoryIndex::new());
        let texts = [
            "ERROR db: connection refused at 10:02",
            "WARN node: disk pressure on aks-node-1",
            "INFO deploy finished for payments",
        ];
        let points: Vec<EmbeddingPoint> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| EmbeddingPoint {
                id: format!("c{}", i),
                vector: phrase_vector(text),
                payload: PointPayload {
                    chunk_id: format!("c{}", i),
                    text: text.to_string(),
                    metadata: ChunkMetadata {
                        source_path: "logs/app.log".into(),
                        artifact_id: "a1".into(),
                        ..Default::default()
                    },
                },
            })
            .collect();
        index.upsert("aks_logs", &points).await.unwrap();

        ThresholdRetriever::new(Arc::new(PhraseEmbedder), index, "aks_logs", 3)
    }

    #[tokio::test]
    async fn test_threshold_discards_weak_matches() {
        let retriever = seeded_retriever().await;
        let matches = retriever
            .retrieve("database errors", 5, 0.9, None)
            .await
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert!(matches[0].text.contains("connection refused"));
        assert!(matches[0].score >= 0.9);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_an_error() {
        let retriever = seeded_retriever().await;
        let matches = retriever
            .retrieve("database errors", 5, 0.999, None)
            .await
            .unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_zero_threshold_is_superset() {
        let retriever = seeded_retriever().await;
        let all = retriever
            .retrieve("database errors", 5, 0.0, None)
            .await
            .unwrap();
        let strict = retriever
            .retrieve("database errors", 5, 0.5, None)
            .await
            .unwrap();

        assert!(all.len() >= strict.len());
        let all_ids: Vec<&str> = all.iter().map(|m| m.chunk_id.as_str()).collect();
        for m in &strict {
            assert!(all_ids.contains(&m.chunk_id.as_str()));
        }
        // Descending score order in both
        for pair in all.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_truncates_to_k() {
        let retriever = seeded_retriever().await;
        let matches = retriever
            .retrieve("database errors", 1, 0.0, None)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].text.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_k_zero_short_circuits() {
        let retriever = seeded_retriever().await;
        let matches = retriever
            .retrieve("database errors", 0, 0.0, None)
            .await
            .unwrap();
        assert!(matches.is_empty());
    }
}
