//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Run the reasoning loop for one question |
//! | `POST` | `/ingest` | Start a background ingestion run (202) |
//! | `POST` | `/generate` | Generate synthetic logs or tickets |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser dashboards
//! can call the API directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::agent::{Agent, AgentOutcome};
use crate::config::Config;
use crate::generate::{generate_logs, generate_tickets};
use crate::ingest::{run_ingest, ArtifactKind, IngestDeps};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub agent: Arc<Agent>,
    pub deps: IngestDeps,
}

/// Bind and serve until the process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let app = build_router(state);

    tracing::info!(addr = %bind_addr, "server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ask", post(handle_ask))
        .route("/ingest", post(handle_ingest))
        .route("/generate", post(handle_generate))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    query: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AgentOutcome>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    // The run executes in its own task; if the client disconnects, this
    // handler future is dropped, the guard cancels the token, and the loop
    // stops at its next checkpoint instead of running to completion.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let agent = state.agent.clone();
    let query = req.query;
    let outcome = tokio::spawn(async move { agent.run(&query, &cancel).await })
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(outcome))
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    /// `"logs"`, `"tickets"`, or `"all"`.
    #[serde(default = "default_kind")]
    kind: String,
    #[serde(default)]
    full: bool,
}

fn default_kind() -> String {
    "all".to_string()
}

#[derive(Serialize)]
struct IngestAccepted {
    status: String,
    kind: String,
}

/// Kick off an ingestion run in the background and return 202 immediately;
/// progress is visible in the server logs and the manifest.
async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestAccepted>), AppError> {
    let kinds: Vec<ArtifactKind> = match req.kind.as_str() {
        "logs" => vec![ArtifactKind::Logs],
        "tickets" => vec![ArtifactKind::Tickets],
        "all" => vec![ArtifactKind::Logs, ArtifactKind::Tickets],
        other => return Err(bad_request(format!("unknown ingest kind: {}", other))),
    };

    let config = state.config.clone();
    let deps = state.deps.clone();
    let full = req.full;
    tokio::spawn(async move {
        for kind in kinds {
            if let Err(err) = run_ingest(&config, &deps, kind, full, None).await {
                tracing::error!(kind = kind.name(), error = %err, "background ingestion failed");
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestAccepted {
            status: "accepted".to_string(),
            kind: req.kind,
        }),
    ))
}

// ============ POST /generate ============

#[derive(Deserialize)]
struct GenerateRequest {
    /// `"logs"` or `"tickets"`.
    kind: String,
    /// ISO date, e.g. `"2026-08-20"`.
    date: NaiveDate,
    #[serde(default = "default_num")]
    num: usize,
}

fn default_num() -> usize {
    100
}

#[derive(Serialize)]
struct GenerateResponse {
    path: String,
    count: usize,
}

async fn handle_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    if req.num == 0 {
        return Err(bad_request("num must be >= 1"));
    }

    let path = match req.kind.as_str() {
        "logs" => generate_logs(&state.config.ingestion.logs_dir, req.date, req.num),
        "tickets" => generate_tickets(&state.config.ingestion.tickets_dir, req.date, req.num),
        other => return Err(bad_request(format!("unknown generate kind: {}", other))),
    }
    .map_err(|e| internal(e.to_string()))?;

    Ok(Json(GenerateResponse {
        path: path.display().to_string(),
        count: req.num,
    }))
}
