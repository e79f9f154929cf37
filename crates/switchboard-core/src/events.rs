//! Typed stream events delivered to streaming consumers.

use serde::{Deserialize, Serialize};

use crate::usage::Usage;

/// A normalised event on a run's event stream.
///
/// Wire events the normaliser does not recognise arrive as [`StreamEvent::Unknown`]
/// with the raw frame attached, so consumers stay forward-compatible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    ResponseCreated {
        response_id: String,
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        created_at: Option<f64>,
    },
    TextDelta {
        text: String,
        index: u64,
    },
    FunctionCallArgumentsDelta {
        call_id: String,
        arguments: String,
        index: u64,
    },
    /// A complete function call surfaced mid-stream.
    ToolCall {
        name: String,
        call_id: String,
        arguments: String,
    },
    ResponseCompleted {
        usage: Usage,
        #[serde(skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
    },
    UsageUpdate {
        usage: Usage,
    },
    /// Terminal marker: the buffer has drained and no more events follow.
    StreamComplete,
    Unknown {
        raw: serde_json::Value,
    },
}
