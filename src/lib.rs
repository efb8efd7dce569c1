//! # OpsAgent
//!
//! An observability question-answering service for Kubernetes clusters:
//! ingest logs and incident tickets into a vector index, then answer
//! operational questions with a tool-using reasoning loop grounded in
//! that index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────┐
//! │ Logs/Tickets │──▶│   Pipeline     │──▶│  Qdrant   │
//! │  (files)     │   │ Track+Chunk   │   │ (vectors) │
//! └──────────────┘   │   +Embed      │   └────┬─────┘
//!                    └───────────────┘        │
//!                                             ▼
//!                    ┌───────────────┐   ┌──────────┐
//!                    │  Agent loop   │◀──│ Threshold │
//!                    │ (ReAct, LLM)  │   │ retriever │
//!                    └──────┬────────┘   └──────────┘
//!                           │
//!                  ┌────────┴────────┐
//!                  ▼                 ▼
//!             ┌─────────┐      ┌──────────┐
//!             │   CLI   │      │   HTTP   │
//!             └─────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! opsagent init                          # create the manifest and collections
//! opsagent generate logs --num 200       # seed synthetic fixtures
//! opsagent generate tickets --num 50
//! opsagent ingest all                    # chunk, embed, upsert
//! opsagent ask "why are payments failing?"
//! opsagent serve                         # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`tracker`] | Idempotent ingestion manifest |
//! | [`chunk`] | Deterministic text chunking |
//! | [`embedding`] | Embedding provider boundary |
//! | [`llm`] | Chat model boundary |
//! | [`vector_store`] | Qdrant and in-memory vector indexes |
//! | [`retriever`] | Threshold-filtered semantic retrieval |
//! | [`tools`] | Agent tool surface |
//! | [`agent`] | Bounded reason-act loop |
//! | [`ingest`] | Scan-track-chunk-embed-upsert pipeline |
//! | [`generate`] | Synthetic log/ticket fixtures |
//! | [`server`] | JSON HTTP API |

pub mod agent;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod retriever;
pub mod retry;
pub mod server;
pub mod tools;
pub mod tracker;
pub mod vector_store;
