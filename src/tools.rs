//! Agent-facing tools.
//!
//! The tool surface is a closed enum: the reasoning loop can only dispatch
//! to tools compiled into [`ToolKind`], and a request for anything else is
//! an [`OpsError::UnknownTool`] the loop handles explicitly. Each dispatch
//! returns a [`ToolInvocation`] carrying the formatted observation text the
//! model sees on its next turn.

use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::OpsError;
use crate::llm::ChatModel;
use crate::models::RetrievalMatch;
use crate::retriever::ThresholdRetriever;
use crate::vector_store::PayloadFilter;

/// Every tool the agent may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    SearchLogs,
    SearchTickets,
    SummarizeLogs,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [
        ToolKind::SearchLogs,
        ToolKind::SearchTickets,
        ToolKind::SummarizeLogs,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SearchLogs" => Some(ToolKind::SearchLogs),
            "SearchTickets" => Some(ToolKind::SearchTickets),
            "SummarizeLogs" => Some(ToolKind::SummarizeLogs),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::SearchLogs => "SearchLogs",
            ToolKind::SearchTickets => "SearchTickets",
            ToolKind::SummarizeLogs => "SummarizeLogs",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::SearchLogs => {
                "Search ingested cluster logs for entries relevant to a query. \
                 Input: a plain query string, or JSON {\"query\", \"k\", \"threshold\"}."
            }
            ToolKind::SearchTickets => {
                "Search historical incident tickets for similar past issues. \
                 Input: a plain query string, or JSON {\"query\", \"k\", \"threshold\"}."
            }
            ToolKind::SummarizeLogs => {
                "Retrieve logs relevant to the input and produce a short summary \
                 of what they show. Input: a plain query string."
            }
        }
    }

    /// One line per tool, for the system prompt.
    pub fn catalog() -> String {
        Self::ALL
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A completed tool call, as recorded in the agent transcript.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub input: String,
    pub output: String,
    pub elapsed: Duration,
}

/// Optional structured form of a search tool input.
#[derive(Deserialize)]
struct SearchInput {
    query: String,
    k: Option<usize>,
    threshold: Option<f32>,
    severity: Option<String>,
    ticket_id: Option<String>,
}

pub struct ToolRegistry {
    logs: ThresholdRetriever,
    tickets: ThresholdRetriever,
    llm: Arc<dyn ChatModel>,
    default_k: usize,
    default_threshold: f32,
}

impl ToolRegistry {
    pub fn new(
        logs: ThresholdRetriever,
        tickets: ThresholdRetriever,
        llm: Arc<dyn ChatModel>,
        default_k: usize,
        default_threshold: f32,
    ) -> Self {
        Self {
            logs,
            tickets,
            llm,
            default_k,
            default_threshold,
        }
    }

    /// Dispatch a named tool call. `Err(UnknownTool)` for names outside the
    /// catalog; other errors are the tool's own failures.
    pub async fn dispatch(&self, name: &str, input: &str) -> Result<ToolInvocation, OpsError> {
        let kind =
            ToolKind::from_name(name).ok_or_else(|| OpsError::UnknownTool(name.to_string()))?;

        let started = Instant::now();
        let output = match kind {
            ToolKind::SearchLogs => self.search(&self.logs, input).await?,
            ToolKind::SearchTickets => self.search(&self.tickets, input).await?,
            ToolKind::SummarizeLogs => self.summarize_logs(input).await?,
        };
        let elapsed = started.elapsed();

        tracing::debug!(tool = kind.name(), ?elapsed, "tool dispatched");
        Ok(ToolInvocation {
            tool_name: kind.name().to_string(),
            input: input.to_string(),
            output,
            elapsed,
        })
    }

    async fn search(&self, retriever: &ThresholdRetriever, input: &str) -> Result<String, OpsError> {
        let (query, k, threshold, filter) = self.parse_search_input(input);
        let matches = retriever
            .retrieve(&query, k, threshold, filter.as_ref())
            .await?;
        Ok(format_matches(&matches))
    }

    async fn summarize_logs(&self, input: &str) -> Result<String, OpsError> {
        let (query, k, threshold, filter) = self.parse_search_input(input);
        let matches = self
            .logs
            .retrieve(&query, k, threshold, filter.as_ref())
            .await?;

        if matches.is_empty() {
            return Ok("No relevant log data to summarize.".to_string());
        }

        let corpus = matches
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let system = "You summarize Kubernetes cluster log excerpts. Be concise: \
                      state the dominant failure pattern, affected components, and \
                      any time clustering you observe.";
        let user = format!("Summarize the following log entries:\n\n{}", corpus);
        self.llm.complete(system, &user).await
    }

    /// Accepts either a bare query string or a JSON object with overrides.
    fn parse_search_input(
        &self,
        input: &str,
    ) -> (String, usize, f32, Option<PayloadFilter>) {
        let trimmed = input.trim();
        if trimmed.starts_with('{') {
            if let Ok(parsed) = serde_json::from_str::<SearchInput>(trimmed) {
                let filter = PayloadFilter {
                    severity: parsed.severity,
                    ticket_id: parsed.ticket_id,
                };
                return (
                    parsed.query,
                    parsed.k.unwrap_or(self.default_k),
                    parsed.threshold.unwrap_or(self.default_threshold),
                    (!filter.is_empty()).then_some(filter),
                );
            }
        }
        (
            trimmed.to_string(),
            self.default_k,
            self.default_threshold,
            None,
        )
    }
}

/// Numbered observation text for a result set; empty sets get an explicit
/// sentence so the model does not mistake silence for an error.
fn format_matches(matches: &[RetrievalMatch]) -> String {
    if matches.is_empty() {
        return "No matches cleared the relevance threshold.".to_string();
    }

    matches
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let mut line = format!("{}. (score {:.3}) {}", i + 1, m.score, m.text.trim());
            if let Some(ref ticket_id) = m.metadata.ticket_id {
                line.push_str(&format!(" [ticket {}]", ticket_id));
            }
            line.push_str(&format!(" [source {}]", m.metadata.source_path));
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
