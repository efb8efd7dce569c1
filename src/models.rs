//! Core data models flowing through ingestion and retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a tracked source artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    /// Seen and claimed by an ingestion run; not yet fully indexed.
    Pending,
    /// Embedded and upserted end to end.
    Ingested,
    /// A step failed mid-ingestion; retried on the next run.
    Failed,
    /// Superseded by a newer content hash for the same source path.
    Stale,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ingested => "ingested",
            Self::Failed => "failed",
            Self::Stale => "stale",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ingested" => Some(Self::Ingested),
            "failed" => Some(Self::Failed),
            "stale" => Some(Self::Stale),
            _ => None,
        }
    }
}

/// Manifest row for one `(source_path, content_hash)` identity.
///
/// Rows are never deleted: a changed hash creates a new record and the old
/// one is marked [`ArtifactStatus::Stale`].
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    pub artifact_id: String,
    pub source_path: String,
    pub content_hash: String,
    pub status: ArtifactStatus,
    pub ingested_at: Option<i64>,
    pub last_error: Option<String>,
}

/// Metadata attached to every chunk and carried through to the stored
/// point payload for downstream citation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_path: String,
    pub artifact_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A bounded slice of artifact text — the unit of embedding and retrieval.
/// Immutable once produced by the chunker.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Deterministic id derived from artifact id, index, and text, so a
    /// re-upsert replaces the stored point instead of duplicating it.
    pub id: String,
    pub artifact_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Payload stored alongside a vector in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub chunk_id: String,
    pub text: String,
    #[serde(flatten)]
    pub metadata: ChunkMetadata,
}

/// A vector plus payload, ready for upsert.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

impl EmbeddingPoint {
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.id.clone(),
            vector,
            payload: PointPayload {
                chunk_id: chunk.id.clone(),
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
            },
        }
    }
}

/// A threshold-cleared search hit. Ephemeral, produced per query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalMatch {
    pub chunk_id: String,
    pub score: f32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// An operational ticket, matching the JSON produced by the ticket generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub ticket_id: String,
    pub timestamp: DateTime<Utc>,
    pub namespace: String,
    pub pod: String,
    pub application: String,
    pub node: String,
    pub ticket_type: String,
    pub message: String,
    pub suggested_action: String,
    pub trace_id: String,
}

impl Ticket {
    /// The text that gets embedded for this ticket.
    pub fn to_text(&self) -> String {
        format!(
            "Ticket ID: {}\nTicket Type: {}\nMessage: {}\nSuggested Action: {}",
            self.ticket_id, self.ticket_type, self.message, self.suggested_action
        )
    }
}
