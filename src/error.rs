//! Error taxonomy for the core pipeline and reasoning loop.
//!
//! Failures are classified by how callers should react:
//! - [`OpsError::Transient`] — retryable per the boundary's [`crate::retry::RetryPolicy`].
//! - [`OpsError::Permanent`] — not retryable; surfaces to the caller.
//! - [`OpsError::MalformedOutput`] — model output that fails the action grammar;
//!   triggers a bounded re-prompt before aborting.
//! - [`OpsError::UnknownTool`] — fed back into the trace as an observation,
//!   never raised out of the loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsError {
    /// Timeout, rate limit, or 5xx from an external service.
    #[error("transient {service} failure: {message}")]
    Transient {
        service: &'static str,
        message: String,
    },

    /// Non-retryable failure from an external service (4xx other than 429,
    /// missing credentials, unparseable response body).
    #[error("{service} request failed: {message}")]
    Permanent {
        service: &'static str,
        message: String,
    },

    /// LLM output that could not be parsed as a tool call or final answer.
    #[error("model output not parseable as an action: {0}")]
    MalformedOutput(String),

    /// The reasoning step requested a tool that is not registered.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

impl OpsError {
    pub fn transient(service: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            service,
            message: message.into(),
        }
    }

    pub fn permanent(service: &'static str, message: impl Into<String>) -> Self {
        Self::Permanent {
            service,
            message: message.into(),
        }
    }

    /// Whether a retry within the same call is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(OpsError::transient("llm", "timeout").is_retryable());
        assert!(!OpsError::permanent("llm", "401").is_retryable());
        assert!(!OpsError::UnknownTool("SearchFoo".into()).is_retryable());
        assert!(!OpsError::MalformedOutput("not json".into()).is_retryable());
    }
}
