//! Error kinds surfaced by the engine.
//!
//! Tool failures are the one recoverable case: the dispatcher serialises
//! them back to the model as `function_call_output` items and the run
//! continues. Every other variant aborts the current run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// An input guardrail refused the input before the model was called.
    #[error("input guardrail '{guardrail}' refused: {reason}")]
    GuardrailTriggered {
        guardrail: String,
        reason: String,
        meta: serde_json::Value,
    },

    /// An output guardrail refused the final output.
    #[error("output guardrail '{guardrail}' refused: {reason}")]
    OutputGuardrailTriggered {
        guardrail: String,
        reason: String,
        meta: serde_json::Value,
        /// The output that would have been returned.
        output: String,
    },

    /// The turn loop hit its configured bound.
    #[error("run exceeded {turns} turns")]
    MaxTurnsExceeded { turns: u32 },

    /// The remote returned a non-2xx status.
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Transport-level failure (connect, TLS, mid-stream disconnect).
    #[error("network error: {0}")]
    Network(String),

    /// Malformed JSON body or SSE frame.
    #[error("decode error: {0}")]
    Decode(String),

    /// A specific tool invocation failed.
    #[error("tool '{name}' failed for call '{call_id}': {reason}")]
    ToolExecution {
        name: String,
        call_id: String,
        reason: String,
    },

    /// The model requested a handoff to an unknown target.
    #[error("handoff error: {0}")]
    Handoff(String),

    /// The model returned no actionable output items.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Agent or run configuration rejected at run start.
    #[error("invalid config for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    /// An agent lifecycle hook (`on_start` / `on_end`) returned an error.
    #[error("hook '{hook}' failed: {reason}")]
    HookFailed { hook: String, reason: String },

    /// A run was cancelled or its aggregate timeout elapsed.
    #[error("run aborted: {0}")]
    Aborted(String),
}

impl AgentError {
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for the kinds a caller may retry without changing anything.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Api { status: 500..=599, .. })
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
