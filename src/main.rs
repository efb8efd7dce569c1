//! # OpsAgent CLI (`opsagent`)
//!
//! The `opsagent` binary is the primary interface: manifest initialization,
//! fixture generation, ingestion, ad-hoc search, one-shot questions, and the
//! HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! opsagent --config ./config/opsagent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `opsagent init` | Create the manifest database and vector collections |
//! | `opsagent generate logs` | Write a synthetic log file for a date |
//! | `opsagent generate tickets` | Write a synthetic ticket file for a date |
//! | `opsagent ingest <logs\|tickets\|all>` | Chunk, embed, and index new artifacts |
//! | `opsagent search "<query>"` | Threshold-filtered semantic search |
//! | `opsagent ask "<question>"` | Run the reasoning loop for one question |
//! | `opsagent serve` | Start the JSON HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # First-time setup
//! opsagent init
//!
//! # Seed a demo corpus and index it
//! opsagent generate logs --date 2026-08-20 --num 200
//! opsagent generate tickets --date 2026-08-20 --num 50
//! opsagent ingest all
//!
//! # Inspect what retrieval sees
//! opsagent search "database connection errors" --collection logs --threshold 0.4
//!
//! # Ask a question end to end
//! opsagent ask "why are payments failing?"
//! ```

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use opsagent::agent::Agent;
use opsagent::config::{load_config, Config};
use opsagent::db;
use opsagent::embedding::{EmbeddingClient, OpenAiEmbeddings};
use opsagent::generate::{generate_logs, generate_tickets};
use opsagent::ingest::{run_ingest, ArtifactKind, IngestDeps};
use opsagent::llm::{ChatModel, OpenAiChat};
use opsagent::retriever::ThresholdRetriever;
use opsagent::server::{run_server, AppState};
use opsagent::tools::ToolRegistry;
use opsagent::tracker::IngestionTracker;
use opsagent::vector_store::{PayloadFilter, QdrantStore, VectorIndex};

/// OpsAgent CLI — observability Q&A over cluster logs and incident tickets.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/opsagent.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "opsagent",
    about = "OpsAgent — observability Q&A over cluster logs and incident tickets",
    version,
    long_about = "OpsAgent ingests Kubernetes logs and incident tickets into a vector index \
    and answers operational questions with a bounded tool-using reasoning loop. Requires \
    OPENAI_API_KEY in the environment and a reachable Qdrant instance for ingest, search, \
    ask, and serve."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/opsagent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the ingestion manifest and vector collections.
    ///
    /// Creates the SQLite manifest (and its schema) and the Qdrant
    /// collections for logs and tickets. Idempotent — running it multiple
    /// times is safe.
    Init,

    /// Generate synthetic fixture data.
    Generate {
        #[command(subcommand)]
        kind: GenerateKind,
    },

    /// Ingest artifacts: chunk, embed, and index anything new or changed.
    ///
    /// Unchanged files (same path and content hash, already committed) are
    /// skipped; failed and interrupted files are retried from scratch.
    Ingest {
        /// Which corpus to ingest: `logs`, `tickets`, or `all`.
        corpus: String,

        /// Ignore the manifest — re-embed everything found.
        #[arg(long)]
        full: bool,

        /// Maximum number of files to process per corpus.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Threshold-filtered semantic search against one collection.
    Search {
        /// The search query string.
        query: String,

        /// Collection to search: `logs` or `tickets`.
        #[arg(long, default_value = "logs")]
        collection: String,

        /// Maximum number of matches to return.
        #[arg(long)]
        k: Option<usize>,

        /// Minimum similarity score; matches below it are discarded.
        #[arg(long)]
        threshold: Option<f32>,

        /// Only return chunks tagged with this severity (e.g. `ERROR`).
        #[arg(long)]
        severity: Option<String>,
    },

    /// Answer one question with the reasoning loop and print the transcript.
    Ask {
        /// The question to answer.
        query: String,

        /// Override the configured step cap for this run.
        #[arg(long)]
        max_steps: Option<usize>,
    },

    /// Start the JSON HTTP API.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

/// Fixture generation subcommands.
#[derive(Subcommand)]
enum GenerateKind {
    /// Write a synthetic log file into the configured logs directory.
    Logs {
        /// Date for the file (YYYY-MM-DD); defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Number of log lines to generate.
        #[arg(long, default_value_t = 200)]
        num: usize,
    },
    /// Write a synthetic ticket file into the configured tickets directory.
    Tickets {
        /// Date for the file (YYYY-MM-DD); defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Number of tickets to generate.
        #[arg(long, default_value_t = 50)]
        num: usize,
    },
}

/// Everything the online commands need, built once from config.
struct Services {
    deps: IngestDeps,
    registry: Arc<ToolRegistry>,
    llm: Arc<dyn ChatModel>,
}

async fn build_services(config: &Config) -> Result<Services> {
    let pool = db::connect(&config.manifest.path).await?;
    let tracker = Arc::new(IngestionTracker::new(pool));
    tracker.migrate().await?;

    let embeddings: Arc<dyn EmbeddingClient> =
        Arc::new(OpenAiEmbeddings::new(&config.embedding, config.embedding_retry())?);
    let llm: Arc<dyn ChatModel> = Arc::new(OpenAiChat::new(&config.llm, config.llm_retry())?);
    let index: Arc<dyn VectorIndex> =
        Arc::new(QdrantStore::new(&config.qdrant, config.qdrant_retry())?);

    let logs = ThresholdRetriever::new(
        embeddings.clone(),
        index.clone(),
        config.qdrant.logs_collection.clone(),
        config.retrieval.overfetch_factor,
    );
    let tickets = ThresholdRetriever::new(
        embeddings.clone(),
        index.clone(),
        config.qdrant.tickets_collection.clone(),
        config.retrieval.overfetch_factor,
    );
    let registry = Arc::new(ToolRegistry::new(
        logs,
        tickets,
        llm.clone(),
        config.retrieval.default_k,
        config.retrieval.threshold,
    ));

    Ok(Services {
        deps: IngestDeps {
            tracker,
            embeddings,
            index,
        },
        registry,
        llm,
    })
}

fn corpus_kinds(corpus: &str) -> Result<Vec<ArtifactKind>> {
    match corpus {
        "logs" => Ok(vec![ArtifactKind::Logs]),
        "tickets" => Ok(vec![ArtifactKind::Tickets]),
        "all" => Ok(vec![ArtifactKind::Logs, ArtifactKind::Tickets]),
        other => anyhow::bail!("unknown corpus: {} (expected logs, tickets, or all)", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let services = build_services(&config).await?;
            services
                .deps
                .index
                .ensure_collection(&config.qdrant.logs_collection, config.embedding.dims)
                .await?;
            services
                .deps
                .index
                .ensure_collection(&config.qdrant.tickets_collection, config.embedding.dims)
                .await?;
            println!("Manifest and collections initialized.");
        }

        Commands::Generate { kind } => {
            let today = chrono::Utc::now().date_naive();
            let path = match kind {
                GenerateKind::Logs { date, num } => {
                    generate_logs(&config.ingestion.logs_dir, date.unwrap_or(today), num)?
                }
                GenerateKind::Tickets { date, num } => {
                    generate_tickets(&config.ingestion.tickets_dir, date.unwrap_or(today), num)?
                }
            };
            println!("Wrote {}", path.display());
        }

        Commands::Ingest {
            corpus,
            full,
            limit,
        } => {
            let services = build_services(&config).await?;
            for kind in corpus_kinds(&corpus)? {
                let report = run_ingest(&config, &services.deps, kind, full, limit).await?;
                println!(
                    "{}: scanned {}, ingested {}, skipped {}, failed {} ({} chunks, {} points)",
                    kind.name(),
                    report.scanned,
                    report.ingested,
                    report.skipped,
                    report.failed,
                    report.chunks,
                    report.points
                );
            }
        }

        Commands::Search {
            query,
            collection,
            k,
            threshold,
            severity,
        } => {
            let services = build_services(&config).await?;
            let collection_name = match collection.as_str() {
                "logs" => config.qdrant.logs_collection.clone(),
                "tickets" => config.qdrant.tickets_collection.clone(),
                other => anyhow::bail!("unknown collection: {} (expected logs or tickets)", other),
            };
            let retriever = ThresholdRetriever::new(
                services.deps.embeddings.clone(),
                services.deps.index.clone(),
                collection_name,
                config.retrieval.overfetch_factor,
            );

            let filter = severity.map(|severity| PayloadFilter {
                severity: Some(severity),
                ticket_id: None,
            });
            let matches = retriever
                .retrieve(
                    &query,
                    k.unwrap_or(config.retrieval.default_k),
                    threshold.unwrap_or(config.retrieval.threshold),
                    filter.as_ref(),
                )
                .await?;

            if matches.is_empty() {
                println!("No matches cleared the relevance threshold.");
            }
            for (i, m) in matches.iter().enumerate() {
                println!("{}. score {:.3}  {}", i + 1, m.score, m.metadata.source_path);
                for line in m.text.lines() {
                    println!("   {}", line);
                }
            }
        }

        Commands::Ask { query, max_steps } => {
            let services = build_services(&config).await?;
            let agent = Agent::new(
                services.llm.clone(),
                services.registry.clone(),
                max_steps.unwrap_or(config.agent.max_steps),
                config.agent.max_reparse,
            );

            let cancel = CancellationToken::new();
            let outcome = agent.run(&query, &cancel).await;

            for (i, step) in outcome.steps.iter().enumerate() {
                println!("Step {}: {}", i + 1, step.thought);
                if let Some(ref action) = step.action {
                    println!("  -> {} ({})", action.tool, action.input);
                }
                if let Some(ref observation) = step.observation {
                    println!("  <- {}", observation);
                }
            }
            match (outcome.answer, outcome.abort_reason) {
                (Some(answer), _) => println!("\n{}", answer),
                (None, Some(reason)) => {
                    eprintln!("\nAborted: {}", reason);
                    std::process::exit(1);
                }
                (None, None) => unreachable!("outcome has neither answer nor abort reason"),
            }
        }

        Commands::Serve => {
            let services = build_services(&config).await?;
            let agent = Arc::new(Agent::new(
                services.llm.clone(),
                services.registry.clone(),
                config.agent.max_steps,
                config.agent.max_reparse,
            ));
            run_server(AppState {
                config: Arc::new(config),
                agent,
                deps: services.deps,
            })
            .await?;
        }
    }

    Ok(())
}
