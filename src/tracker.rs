//! Idempotent ingestion tracker.
//!
//! A durable manifest of which source artifacts have been embedded and
//! indexed. Identity is `(source_path, content_hash)`: an unchanged hash is
//! skipped across runs, a changed hash is a new artifact and the previous
//! record for that path is marked stale. An artifact is only ever marked
//! `ingested` after both embedding and upsert succeeded; anything less
//! leaves it `failed` so the next run retries it from scratch.
//!
//! Writes are serialized through a single-writer mutex; readers see the
//! last-committed state. The tracker itself is injected into the ingestion
//! and retrieval entry points rather than living as a process-wide global.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::models::{ArtifactRecord, ArtifactStatus};

pub struct IngestionTracker {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

/// Stable artifact identity for a `(source_path, content_hash)` pair.
pub fn artifact_id(source_path: &str, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(content_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 hex digest of artifact content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl IngestionTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    /// Create the manifest schema. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                artifact_id TEXT PRIMARY KEY,
                source_path TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                status TEXT NOT NULL,
                ingested_at INTEGER,
                last_error TEXT,
                UNIQUE(source_path, content_hash)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_artifacts_source_path ON artifacts(source_path)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Whether this exact artifact content still needs ingestion.
    ///
    /// Only a committed `ingested` record skips the artifact; `pending`
    /// (a crashed run) and `failed` are retried as if never attempted.
    pub async fn should_ingest(&self, source_path: &str, content_hash: &str) -> Result<bool> {
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM artifacts WHERE source_path = ? AND content_hash = ?",
        )
        .bind(source_path)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(!matches!(status.as_deref(), Some("ingested")))
    }

    /// Claim an artifact for ingestion: record it as `pending` and mark any
    /// older records for the same path (different hash) as `stale`.
    ///
    /// Returns the artifact id to use for chunking and point payloads.
    pub async fn begin(&self, source_path: &str, content_hash: &str) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let id = artifact_id(source_path, content_hash);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE artifacts SET status = 'stale'
            WHERE source_path = ? AND content_hash != ? AND status != 'stale'
            "#,
        )
        .bind(source_path)
        .bind(content_hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO artifacts (artifact_id, source_path, content_hash, status, ingested_at, last_error)
            VALUES (?, ?, ?, 'pending', NULL, NULL)
            ON CONFLICT(source_path, content_hash) DO UPDATE SET
                status = 'pending',
                last_error = NULL
            "#,
        )
        .bind(&id)
        .bind(source_path)
        .bind(content_hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Commit a fully ingested artifact (embedding and upsert both done).
    pub async fn mark_ingested(&self, artifact_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE artifacts SET status = 'ingested', ingested_at = ?, last_error = NULL WHERE artifact_id = ?",
        )
        .bind(now)
        .bind(artifact_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a mid-ingestion failure. No partial credit: the artifact is
    /// retried on the next run.
    pub async fn mark_failed(&self, artifact_id: &str, reason: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("UPDATE artifacts SET status = 'failed', last_error = ? WHERE artifact_id = ?")
            .bind(reason)
            .bind(artifact_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Artifact ids for this path that were superseded by a different
    /// content hash. Their indexed points must be purged once the current
    /// artifact has committed.
    pub async fn superseded_ids(
        &self,
        source_path: &str,
        content_hash: &str,
    ) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT artifact_id FROM artifacts
             WHERE source_path = ? AND content_hash != ? AND status = 'stale'",
        )
        .bind(source_path)
        .bind(content_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn get(
        &self,
        source_path: &str,
        content_hash: &str,
    ) -> Result<Option<ArtifactRecord>> {
        let row = sqlx::query(
            "SELECT artifact_id, source_path, content_hash, status, ingested_at, last_error
             FROM artifacts WHERE source_path = ? AND content_hash = ?",
        )
        .bind(source_path)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_record).transpose()
    }

    pub async fn records(&self) -> Result<Vec<ArtifactRecord>> {
        let rows = sqlx::query(
            "SELECT artifact_id, source_path, content_hash, status, ingested_at, last_error
             FROM artifacts ORDER BY source_path, content_hash",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<ArtifactRecord> {
    let status_str: String = row.get("status");
    let status = ArtifactStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unknown artifact status in manifest: {}", status_str))?;

    Ok(ArtifactRecord {
        artifact_id: row.get("artifact_id"),
        source_path: row.get("source_path"),
        content_hash: row.get("content_hash"),
        status,
        ingested_at: row.get("ingested_at"),
        last_error: row.get("last_error"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_tracker() -> IngestionTracker {
        // A single connection keeps the in-memory database alive and shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let tracker = IngestionTracker::new(pool);
        tracker.migrate().await.unwrap();
        tracker
    }

    #[tokio::test]
    async fn test_unseen_artifact_needs_ingestion() {
        let tracker = memory_tracker().await;
        assert!(tracker.should_ingest("logs/a.log", "hash1").await.unwrap());
    }

    #[tokio::test]
    async fn test_ingested_artifact_is_skipped() {
        let tracker = memory_tracker().await;
        let id = tracker.begin("logs/a.log", "hash1").await.unwrap();
        tracker.mark_ingested(&id).await.unwrap();

        assert!(!tracker.should_ingest("logs/a.log", "hash1").await.unwrap());

        let record = tracker.get("logs/a.log", "hash1").await.unwrap().unwrap();
        assert_eq!(record.status, ArtifactStatus::Ingested);
        assert!(record.ingested_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_artifact_is_retried() {
        let tracker = memory_tracker().await;
        let id = tracker.begin("logs/a.log", "hash1").await.unwrap();
        tracker.mark_failed(&id, "upsert timed out").await.unwrap();

        let record = tracker.get("logs/a.log", "hash1").await.unwrap().unwrap();
        assert_eq!(record.status, ArtifactStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some("upsert timed out"));

        // Retried as if never attempted
        assert!(tracker.should_ingest("logs/a.log", "hash1").await.unwrap());
        let id2 = tracker.begin("logs/a.log", "hash1").await.unwrap();
        assert_eq!(id, id2);
        tracker.mark_ingested(&id2).await.unwrap();
        assert!(!tracker.should_ingest("logs/a.log", "hash1").await.unwrap());
    }

    #[tokio::test]
    async fn test_changed_hash_supersedes_old_record() {
        let tracker = memory_tracker().await;
        let id1 = tracker.begin("logs/a.log", "hash1").await.unwrap();
        tracker.mark_ingested(&id1).await.unwrap();

        // Same path, new content: new record, old one stale
        let id2 = tracker.begin("logs/a.log", "hash2").await.unwrap();
        assert_ne!(id1, id2);
        tracker.mark_ingested(&id2).await.unwrap();

        let old = tracker.get("logs/a.log", "hash1").await.unwrap().unwrap();
        assert_eq!(old.status, ArtifactStatus::Stale);
        let new = tracker.get("logs/a.log", "hash2").await.unwrap().unwrap();
        assert_eq!(new.status, ArtifactStatus::Ingested);

        // Records are superseded, never deleted
        assert_eq!(tracker.records().await.unwrap().len(), 2);

        // The stale predecessor is reported for point cleanup.
        let superseded = tracker.superseded_ids("logs/a.log", "hash2").await.unwrap();
        assert_eq!(superseded, vec![id1]);
        assert!(tracker
            .superseded_ids("logs/a.log", "hash1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_pending_from_crashed_run_is_retried() {
        let tracker = memory_tracker().await;
        tracker.begin("logs/a.log", "hash1").await.unwrap();
        // No mark_ingested — simulates a crash mid-run.
        assert!(tracker.should_ingest("logs/a.log", "hash1").await.unwrap());
    }

    #[tokio::test]
    async fn test_identity_is_path_and_hash() {
        let tracker = memory_tracker().await;
        let id = tracker.begin("logs/a.log", "hash1").await.unwrap();
        tracker.mark_ingested(&id).await.unwrap();

        // Identical content under a different path is a distinct artifact.
        assert!(tracker.should_ingest("logs/b.log", "hash1").await.unwrap());
    }
}
