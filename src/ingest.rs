//! Ingestion pipeline: scan, track, chunk, embed, upsert.
//!
//! Each discovered file is an artifact identified by its path and content
//! hash. The tracker gates re-work: an unchanged, committed artifact is
//! skipped; anything else is claimed, chunked, embedded in batches, and
//! upserted before the tracker commits it. A failure anywhere marks the
//! artifact `failed` and moves on to the next file, so one bad artifact
//! never sinks a run.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

use crate::chunk::{chunk_artifact, chunk_id};
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::models::{Chunk, ChunkMetadata, EmbeddingPoint, Ticket};
use crate::tracker::{content_hash, IngestionTracker};
use crate::vector_store::VectorIndex;

/// Which corpus a run ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Logs,
    Tickets,
}

impl ArtifactKind {
    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Logs => "logs",
            ArtifactKind::Tickets => "tickets",
        }
    }
}

/// Shared services an ingestion run needs.
#[derive(Clone)]
pub struct IngestDeps {
    pub tracker: Arc<IngestionTracker>,
    pub embeddings: Arc<dyn EmbeddingClient>,
    pub index: Arc<dyn VectorIndex>,
}

/// Counters for one run, reported to the caller.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct IngestReport {
    pub scanned: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks: usize,
    pub points: usize,
}

/// Ingest one corpus. `full` bypasses the tracker's skip (re-embedding
/// everything found); `limit` caps the number of files processed.
pub async fn run_ingest(
    config: &Config,
    deps: &IngestDeps,
    kind: ArtifactKind,
    full: bool,
    limit: Option<usize>,
) -> Result<IngestReport> {
    let (dir, globs, collection) = match kind {
        ArtifactKind::Logs => (
            &config.ingestion.logs_dir,
            &config.ingestion.log_globs,
            &config.qdrant.logs_collection,
        ),
        ArtifactKind::Tickets => (
            &config.ingestion.tickets_dir,
            &config.ingestion.ticket_globs,
            &config.qdrant.tickets_collection,
        ),
    };

    deps.index
        .ensure_collection(collection, config.embedding.dims)
        .await?;

    let matcher = build_globset(globs)?;
    let mut report = IngestReport::default();

    for path in discover_files(dir, &matcher) {
        if let Some(limit) = limit {
            if report.scanned >= limit {
                break;
            }
        }
        report.scanned += 1;

        let source_path = path.to_string_lossy().to_string();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::error!(source = %source_path, error = %err, "unreadable file");
                report.failed += 1;
                continue;
            }
        };
        let hash = content_hash(&content);

        if !full && !deps.tracker.should_ingest(&source_path, &hash).await? {
            tracing::debug!(source = %source_path, "unchanged, skipping");
            report.skipped += 1;
            continue;
        }

        let artifact_id = deps.tracker.begin(&source_path, &hash).await?;
        let chunks = match build_chunks(config, kind, &artifact_id, &source_path, &content) {
            Ok(chunks) => chunks,
            Err(err) => {
                tracing::error!(source = %source_path, error = %err, "chunking failed");
                deps.tracker
                    .mark_failed(&artifact_id, &err.to_string())
                    .await?;
                report.failed += 1;
                continue;
            }
        };

        if chunks.is_empty() {
            // Nothing to index, but the artifact is accounted for.
            deps.tracker.mark_ingested(&artifact_id).await?;
            purge_superseded(deps, collection, &source_path, &hash).await?;
            report.ingested += 1;
            continue;
        }

        match embed_and_upsert(config, deps, collection, &chunks).await {
            Ok(points) => {
                deps.tracker.mark_ingested(&artifact_id).await?;
                purge_superseded(deps, collection, &source_path, &hash).await?;
                report.ingested += 1;
                report.chunks += chunks.len();
                report.points += points;
                tracing::info!(source = %source_path, chunks = chunks.len(), "ingested");
            }
            Err(err) => {
                tracing::error!(source = %source_path, error = %err, "ingestion failed");
                deps.tracker
                    .mark_failed(&artifact_id, &err.to_string())
                    .await?;
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        kind = kind.name(),
        scanned = report.scanned,
        ingested = report.ingested,
        skipped = report.skipped,
        failed = report.failed,
        "ingestion run complete"
    );
    Ok(report)
}

fn build_globset(globs: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in globs {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

fn discover_files(dir: &Path, matcher: &GlobSet) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            let relative = path.strip_prefix(dir).unwrap_or(path);
            matcher.is_match(relative)
        })
        .collect();
    files.sort();
    files
}

fn build_chunks(
    config: &Config,
    kind: ArtifactKind,
    artifact_id: &str,
    source_path: &str,
    content: &str,
) -> Result<Vec<Chunk>> {
    match kind {
        ArtifactKind::Logs => {
            let base = ChunkMetadata {
                source_path: source_path.to_string(),
                artifact_id: artifact_id.to_string(),
                ..Default::default()
            };
            Ok(chunk_artifact(
                artifact_id,
                content,
                &base,
                config.chunking.max_chars,
                config.chunking.overlap_chars,
            ))
        }
        ArtifactKind::Tickets => ticket_chunks(artifact_id, source_path, content),
    }
}

/// Tickets are indexed one chunk per ticket, never split, so a retrieval hit
/// always cites a whole incident.
fn ticket_chunks(artifact_id: &str, source_path: &str, content: &str) -> Result<Vec<Chunk>> {
    let tickets: Vec<Ticket> =
        serde_json::from_str(content).with_context(|| "invalid ticket JSON")?;

    Ok(tickets
        .iter()
        .enumerate()
        .map(|(i, ticket)| {
            let index = i as i64;
            let text = ticket.to_text();
            Chunk {
                id: chunk_id(artifact_id, index, &text),
                artifact_id: artifact_id.to_string(),
                chunk_index: index,
                metadata: ChunkMetadata {
                    source_path: source_path.to_string(),
                    artifact_id: artifact_id.to_string(),
                    severity: Some(ticket_severity(&ticket.ticket_type).to_string()),
                    ticket_id: Some(ticket.ticket_id.clone()),
                    timestamp: Some(ticket.timestamp),
                },
                text,
            }
        })
        .collect())
}

fn ticket_severity(ticket_type: &str) -> &'static str {
    match ticket_type {
        "PodCrash" | "DatabaseTimeout" | "AuthFailure" => "ERROR",
        "HighCPU" | "HighMemory" => "WARN",
        _ => "INFO",
    }
}

/// Drop indexed points belonging to artifacts this path has superseded.
/// Runs only after the replacement artifact has committed, so a failed
/// re-ingestion never leaves the path unsearchable.
async fn purge_superseded(
    deps: &IngestDeps,
    collection: &str,
    source_path: &str,
    content_hash: &str,
) -> Result<()> {
    for stale_id in deps
        .tracker
        .superseded_ids(source_path, content_hash)
        .await?
    {
        deps.index.delete_by_artifact(collection, &stale_id).await?;
        tracing::debug!(source = %source_path, artifact = %stale_id, "purged superseded points");
    }
    Ok(())
}

async fn embed_and_upsert(
    config: &Config,
    deps: &IngestDeps,
    collection: &str,
    chunks: &[Chunk],
) -> Result<usize> {
    let mut upserted = 0usize;
    for batch in chunks.chunks(config.embedding.batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = deps.embeddings.embed_batch(&texts).await?;

        let points: Vec<EmbeddingPoint> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingPoint::from_chunk(chunk, vector))
            .collect();

        deps.index.upsert(collection, &points).await?;
        upserted += points.len();
    }
    Ok(upserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpsError;
    use crate::vector_store::InMemoryIndex;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingEmbedder {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for CountingEmbedder {
        fn dims(&self) -> usize {
            4
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OpsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OpsError::permanent("embedding", "quota exceeded"));
            }
            Ok(texts.iter().map(|_| vec![0.5; 4]).collect())
        }
    }

    async fn test_setup(fail_embeddings: bool) -> (Config, IngestDeps, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            r#"
[manifest]
path = "{0}/manifest.sqlite"

[ingestion]
logs_dir = "{0}/logs"
tickets_dir = "{0}/tickets"
"#,
            dir.path().display()
        );
        let config = Config::from_toml_str(&toml).unwrap();
        std::fs::create_dir_all(&config.ingestion.logs_dir).unwrap();
        std::fs::create_dir_all(&config.ingestion.tickets_dir).unwrap();

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let tracker = Arc::new(IngestionTracker::new(pool));
        tracker.migrate().await.unwrap();

        let deps = IngestDeps {
            tracker,
            embeddings: Arc::new(CountingEmbedder::new(fail_embeddings)),
            index: Arc::new(InMemoryIndex::new()),
        };
        (config, deps, dir)
    }

    fn write_log(config: &Config, name: &str, content: &str) {
        std::fs::write(config.ingestion.logs_dir.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn test_rerun_skips_unchanged_artifacts() {
        let (config, deps, _dir) = test_setup(false).await;
        write_log(&config, "app.log", "ERROR db: connection refused at 10:02\n");

        let first = run_ingest(&config, &deps, ArtifactKind::Logs, false, None)
            .await
            .unwrap();
        assert_eq!(first.ingested, 1);
        assert_eq!(first.skipped, 0);

        let second = run_ingest(&config, &deps, ArtifactKind::Logs, false, None)
            .await
            .unwrap();
        assert_eq!(second.ingested, 0);
        assert_eq!(second.skipped, 1);

        // No duplicate points either
        let index = &deps.index;
        let hits = index
            .search(&config.qdrant.logs_collection, &[0.5; 4], 10, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_changed_content_is_reingested() {
        let (config, deps, _dir) = test_setup(false).await;
        write_log(&config, "app.log", "ERROR db: connection refused\n");
        run_ingest(&config, &deps, ArtifactKind::Logs, false, None)
            .await
            .unwrap();

        write_log(&config, "app.log", "ERROR db: connection refused again\n");
        let report = run_ingest(&config, &deps, ArtifactKind::Logs, false, None)
            .await
            .unwrap();
        assert_eq!(report.ingested, 1);

        let records = deps.tracker.records().await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_superseded_points_purged_from_index() {
        let (config, deps, _dir) = test_setup(false).await;
        write_log(&config, "app.log", "ERROR old content: connection refused\n");
        run_ingest(&config, &deps, ArtifactKind::Logs, false, None)
            .await
            .unwrap();

        write_log(&config, "app.log", "INFO new content: all healthy\n");
        run_ingest(&config, &deps, ArtifactKind::Logs, false, None)
            .await
            .unwrap();

        // Only the replacement artifact's points remain searchable.
        let hits = deps
            .index
            .search(&config.qdrant.logs_collection, &[0.5; 4], 10, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].payload.text.contains("new content"));

        // The manifest still carries both generations.
        assert_eq!(deps.tracker.records().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_artifact_marked_and_run_continues() {
        let (config, deps, _dir) = test_setup(true).await;
        write_log(&config, "a.log", "ERROR one\n");
        write_log(&config, "b.log", "ERROR two\n");

        let report = run_ingest(&config, &deps, ArtifactKind::Logs, false, None)
            .await
            .unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.ingested, 0);

        for record in deps.tracker.records().await.unwrap() {
            assert_eq!(record.status, crate::models::ArtifactStatus::Failed);
            assert!(record.last_error.as_deref().unwrap().contains("quota"));
        }
    }

    #[tokio::test]
    async fn test_ticket_file_yields_one_chunk_per_ticket() {
        let (config, deps, _dir) = test_setup(false).await;
        let tickets = serde_json::json!([
            {
                "ticketId": "INC000000001",
                "timestamp": "2026-08-20T10:00:00Z",
                "namespace": "payments",
                "pod": "payments-api-0",
                "application": "payments-api",
                "node": "aks-node-1",
                "ticketType": "DatabaseTimeout",
                "message": "Database connection timed out",
                "suggestedAction": "Check DB connection pool and network policies",
                "traceId": "t-1"
            },
            {
                "ticketId": "INC000000002",
                "timestamp": "2026-08-20T11:00:00Z",
                "namespace": "payments",
                "pod": "payments-api-1",
                "application": "payments-api",
                "node": "aks-node-2",
                "ticketType": "HighCPU",
                "message": "CPU above 90% for 10 minutes",
                "suggestedAction": "Scale the deployment or review recent changes",
                "traceId": "t-2"
            }
        ]);
        std::fs::write(
            config.ingestion.tickets_dir.join("tickets.json"),
            serde_json::to_string_pretty(&tickets).unwrap(),
        )
        .unwrap();

        let report = run_ingest(&config, &deps, ArtifactKind::Tickets, false, None)
            .await
            .unwrap();
        assert_eq!(report.ingested, 1);
        assert_eq!(report.chunks, 2);

        let hits = deps
            .index
            .search(&config.qdrant.tickets_collection, &[0.5; 4], 10, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        let ticket_ids: Vec<_> = hits
            .iter()
            .map(|h| h.payload.metadata.ticket_id.clone().unwrap())
            .collect();
        assert!(ticket_ids.contains(&"INC000000001".to_string()));
        let severities: Vec<_> = hits
            .iter()
            .map(|h| h.payload.metadata.severity.clone().unwrap())
            .collect();
        assert!(severities.contains(&"ERROR".to_string()));
        assert!(severities.contains(&"WARN".to_string()));
    }

    #[tokio::test]
    async fn test_malformed_ticket_file_is_failed_not_fatal() {
        let (config, deps, _dir) = test_setup(false).await;
        std::fs::write(config.ingestion.tickets_dir.join("bad.json"), "not json").unwrap();

        let report = run_ingest(&config, &deps, ArtifactKind::Tickets, false, None)
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        let records = deps.tracker.records().await.unwrap();
        assert_eq!(records[0].status, crate::models::ArtifactStatus::Failed);
    }

    #[tokio::test]
    async fn test_full_flag_reingests_unchanged() {
        let (config, deps, _dir) = test_setup(false).await;
        write_log(&config, "app.log", "INFO steady state\n");
        run_ingest(&config, &deps, ArtifactKind::Logs, false, None)
            .await
            .unwrap();

        let report = run_ingest(&config, &deps, ArtifactKind::Logs, true, None)
            .await
            .unwrap();
        assert_eq!(report.ingested, 1);
        assert_eq!(report.skipped, 0);
    }

    #[tokio::test]
    async fn test_limit_caps_scanned_files() {
        let (config, deps, _dir) = test_setup(false).await;
        for i in 0..5 {
            write_log(&config, &format!("f{}.log", i), "INFO line\n");
        }

        let report = run_ingest(&config, &deps, ArtifactKind::Logs, false, Some(2))
            .await
            .unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.ingested, 2);
    }

    #[tokio::test]
    async fn test_non_matching_files_ignored() {
        let (config, deps, _dir) = test_setup(false).await;
        std::fs::write(config.ingestion.logs_dir.join("notes.md"), "not a log").unwrap();

        let report = run_ingest(&config, &deps, ArtifactKind::Logs, false, None)
            .await
            .unwrap();
        assert_eq!(report.scanned, 0);
    }
}
