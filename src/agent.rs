//! Bounded reason-act loop.
//!
//! The agent alternates between asking the chat model for a decision and
//! executing the tool it picked, feeding each observation back into the next
//! prompt. Every run terminates: a hard step cap, a bounded reparse budget
//! for malformed model output, an abort after two consecutive requests for
//! unregistered tools, and a cooperative cancellation token checked before
//! each model call and each tool call. `run` never returns `Err` — failures
//! surface as an aborted outcome with the transcript collected so far.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::OpsError;
use crate::llm::ChatModel;
use crate::tools::{ToolKind, ToolRegistry};

/// A tool request the model made.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCall {
    pub tool: String,
    pub input: String,
}

/// One completed loop iteration.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStep {
    pub thought: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
}

/// Terminal result of a run: exactly one of `answer` / `abort_reason` is set.
#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub steps: Vec<AgentStep>,
}

impl AgentOutcome {
    fn done(answer: String, steps: Vec<AgentStep>) -> Self {
        Self {
            answer: Some(answer),
            abort_reason: None,
            steps,
        }
    }

    fn aborted(reason: impl Into<String>, steps: Vec<AgentStep>) -> Self {
        Self {
            answer: None,
            abort_reason: Some(reason.into()),
            steps,
        }
    }

    pub fn is_done(&self) -> bool {
        self.answer.is_some()
    }
}

/// What the model decided to do this turn.
#[derive(Debug, Clone, PartialEq)]
enum Decision {
    Act {
        thought: String,
        tool: String,
        input: String,
    },
    Finish {
        thought: String,
        answer: String,
    },
}

pub struct Agent {
    llm: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    max_steps: usize,
    max_reparse: usize,
}

impl Agent {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        max_steps: usize,
        max_reparse: usize,
    ) -> Self {
        Self {
            llm,
            tools,
            max_steps: max_steps.max(1),
            max_reparse,
        }
    }

    /// Run the loop to completion for one question.
    pub async fn run(&self, query: &str, cancel: &CancellationToken) -> AgentOutcome {
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut consecutive_unknown = 0usize;

        for step_no in 1..=self.max_steps {
            if cancel.is_cancelled() {
                return AgentOutcome::aborted("cancelled", steps);
            }

            let decision = match self.think(query, &steps).await {
                Ok(decision) => decision,
                Err(err) => {
                    tracing::warn!(step = step_no, error = %err, "reasoning aborted");
                    return AgentOutcome::aborted(err.to_string(), steps);
                }
            };

            match decision {
                Decision::Finish { thought, answer } => {
                    steps.push(AgentStep {
                        thought,
                        action: None,
                        observation: None,
                    });
                    tracing::info!(steps = steps.len(), "agent finished");
                    return AgentOutcome::done(answer, steps);
                }
                Decision::Act {
                    thought,
                    tool,
                    input,
                } => {
                    if cancel.is_cancelled() {
                        steps.push(AgentStep {
                            thought,
                            action: Some(ToolCall { tool, input }),
                            observation: None,
                        });
                        return AgentOutcome::aborted("cancelled", steps);
                    }

                    let observation = match self.tools.dispatch(&tool, &input).await {
                        Ok(invocation) => {
                            consecutive_unknown = 0;
                            invocation.output
                        }
                        Err(OpsError::UnknownTool(name)) => {
                            consecutive_unknown += 1;
                            if consecutive_unknown >= 2 {
                                steps.push(AgentStep {
                                    thought,
                                    action: Some(ToolCall { tool, input }),
                                    observation: None,
                                });
                                return AgentOutcome::aborted(
                                    "unregistered tool requested twice in a row",
                                    steps,
                                );
                            }
                            format!(
                                "Unknown tool '{}'. Choose one of: {}.",
                                name,
                                ToolKind::ALL
                                    .iter()
                                    .map(|t| t.name())
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            )
                        }
                        Err(err) => {
                            // A failing tool is an observation, not a crash;
                            // the model gets to route around it.
                            consecutive_unknown = 0;
                            format!("Tool '{}' failed: {}", tool, err)
                        }
                    };

                    steps.push(AgentStep {
                        thought,
                        action: Some(ToolCall { tool, input }),
                        observation: Some(observation),
                    });
                }
            }
        }

        AgentOutcome::aborted(
            format!("step limit of {} reached without an answer", self.max_steps),
            steps,
        )
    }

    /// One model turn, with a bounded budget of corrective re-prompts when
    /// the reply does not parse as a decision.
    async fn think(&self, query: &str, steps: &[AgentStep]) -> Result<Decision, OpsError> {
        let system = system_prompt();
        let base = render_prompt(query, steps);
        let mut user = base.clone();

        let mut last_err = None;
        for attempt in 0..=self.max_reparse {
            let reply = self.llm.complete(&system, &user).await?;
            match parse_decision(&reply) {
                Ok(decision) => return Ok(decision),
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "unparseable model reply");
                    user = format!(
                        "{}\n\nYour previous reply could not be parsed ({}). \
                         Respond again with exactly one JSON object in the required format.",
                        base, err
                    );
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            OpsError::MalformedOutput("model produced no parseable decision".into())
        }))
    }
}

fn system_prompt() -> String {
    format!(
        "You are an SRE assistant answering questions about a Kubernetes cluster \
         using its ingested logs and incident tickets.\n\n\
         Available tools:\n{}\n\n\
         On every turn reply with exactly one JSON object and nothing else. \
         To call a tool:\n\
         {{\"thought\": \"...\", \"action\": {{\"tool\": \"SearchLogs\", \"input\": \"...\"}}}}\n\
         To answer:\n\
         {{\"thought\": \"...\", \"final_answer\": \"...\"}}\n\n\
         Provide either \"action\" or \"final_answer\", never both. Ground your \
         answer in tool observations; if the data does not support an answer, say so.",
        ToolKind::catalog()
    )
}

/// Question plus the transcript so far, in the form the model reasons over.
fn render_prompt(query: &str, steps: &[AgentStep]) -> String {
    let mut out = format!("Question: {}", query);
    for step in steps {
        out.push_str(&format!("\n\nThought: {}", step.thought));
        if let Some(ref action) = step.action {
            out.push_str(&format!(
                "\nAction: {}\nAction Input: {}",
                action.tool, action.input
            ));
        }
        if let Some(ref observation) = step.observation {
            out.push_str(&format!("\nObservation: {}", observation));
        }
    }
    out
}

#[derive(serde::Deserialize)]
struct RawDecision {
    thought: Option<String>,
    action: Option<RawAction>,
    final_answer: Option<String>,
}

#[derive(serde::Deserialize)]
struct RawAction {
    tool: String,
    input: String,
}

/// Parse a model reply into a [`Decision`], tolerating code fences and
/// surrounding prose but requiring exactly one of `action` / `final_answer`.
fn parse_decision(reply: &str) -> Result<Decision, OpsError> {
    let json = extract_json_object(reply)
        .ok_or_else(|| OpsError::MalformedOutput("no JSON object found in reply".into()))?;

    let raw: RawDecision = serde_json::from_str(json)
        .map_err(|e| OpsError::MalformedOutput(format!("invalid decision JSON: {}", e)))?;

    let thought = raw.thought.unwrap_or_default();
    match (raw.action, raw.final_answer) {
        (Some(action), None) => Ok(Decision::Act {
            thought,
            tool: action.tool,
            input: action.input,
        }),
        (None, Some(answer)) => Ok(Decision::Finish { thought, answer }),
        (Some(_), Some(_)) => Err(OpsError::MalformedOutput(
            "reply contained both an action and a final answer".into(),
        )),
        (None, None) => Err(OpsError::MalformedOutput(
            "reply contained neither an action nor a final answer".into(),
        )),
    }
}

/// The outermost `{ ... }` span of the reply, with code fences stripped.
fn extract_json_object(reply: &str) -> Option<&str> {
    let trimmed = reply.trim();
    let inner = if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        rest.strip_suffix("```").unwrap_or(rest)
    } else {
        trimmed
    };

    let start = inner.find('{')?;
    let end = inner.rfind('}')?;
    (end > start).then(|| &inner[start..=end])
}
