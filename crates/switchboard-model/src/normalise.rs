//! Wire-event normalisation and streaming response accumulation.

use serde_json::Value;

use switchboard_core::{Item, StreamEvent, Usage};

use crate::types::ModelResponse;

/// Translate one raw wire event into a typed [`StreamEvent`].
///
/// Returns `None` for event types the engine deliberately suppresses
/// (`response.in_progress`, `*.done` bookkeeping frames). Unrecognised types
/// become [`StreamEvent::Unknown`] rather than errors.
pub fn normalise_event(raw: &Value) -> Option<StreamEvent> {
    let kind = raw.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "response.created" => {
            let response = raw.get("response").unwrap_or(raw);
            Some(StreamEvent::ResponseCreated {
                response_id: str_field(response, "id"),
                model: str_field(response, "model"),
                created_at: response.get("created_at").and_then(Value::as_f64),
            })
        }
        "response.in_progress"
        | "response.function_call_arguments.done"
        | "response.output_item.done" => None,
        "response.output_text.delta" => Some(StreamEvent::TextDelta {
            text: str_field(raw, "delta"),
            index: raw
                .get("content_index")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        }),
        "response.function_call_arguments.delta" => {
            Some(StreamEvent::FunctionCallArgumentsDelta {
                call_id: str_field(raw, "item_id"),
                arguments: str_field(raw, "delta"),
                index: raw.get("output_index").and_then(Value::as_u64).unwrap_or(0),
            })
        }
        "response.output_item.added" => {
            let item = raw.get("item")?;
            if item.get("type").and_then(Value::as_str) != Some("function_call") {
                return Some(StreamEvent::Unknown { raw: raw.clone() });
            }
            Some(StreamEvent::ToolCall {
                name: str_field(item, "name"),
                call_id: item
                    .get("call_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| str_field(item, "id")),
                arguments: str_field(item, "arguments"),
            })
        }
        "response.completed" | "response.done" => {
            let usage = raw
                .get("response")
                .and_then(|response| response.get("usage"))
                .or_else(|| raw.get("usage"))
                .and_then(|usage| serde_json::from_value::<Usage>(usage.clone()).ok())
                .unwrap_or_default();
            Some(StreamEvent::ResponseCompleted {
                usage,
                trace_id: None,
            })
        }
        "done" => Some(StreamEvent::StreamComplete),
        _ => Some(StreamEvent::Unknown { raw: raw.clone() }),
    }
}

fn str_field(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Folds the normalised events of one streamed turn back into a
/// [`ModelResponse`], so the turn loop can classify a streamed turn exactly
/// like a synchronous one.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    response_id: String,
    model: String,
    created_at: Option<f64>,
    text: String,
    calls: Vec<CallAccumulator>,
    usage: Usage,
}

#[derive(Debug)]
struct CallAccumulator {
    call_id: String,
    name: String,
    arguments: String,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event. Events the accumulator does not care about (unknown
    /// frames, usage ticks) leave the state untouched.
    pub fn absorb(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ResponseCreated {
                response_id,
                model,
                created_at,
            } => {
                self.response_id = response_id.clone();
                self.model = model.clone();
                self.created_at = *created_at;
            }
            StreamEvent::TextDelta { text, .. } => self.text.push_str(text),
            StreamEvent::ToolCall {
                name,
                call_id,
                arguments,
            } => self.calls.push(CallAccumulator {
                call_id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            }),
            StreamEvent::FunctionCallArgumentsDelta {
                call_id, arguments, ..
            } => {
                if let Some(call) = self.calls.iter_mut().find(|call| call.call_id == *call_id) {
                    call.arguments.push_str(arguments);
                }
            }
            StreamEvent::ResponseCompleted { usage, .. } => self.usage = *usage,
            _ => {}
        }
    }

    pub fn finish(self) -> ModelResponse {
        let mut output = Vec::new();
        if !self.text.is_empty() {
            output.push(Item::Text { text: self.text });
        }
        for call in self.calls {
            let arguments = if call.arguments.is_empty() {
                "{}".to_string()
            } else {
                call.arguments
            };
            output.push(Item::FunctionCall {
                call_id: call.call_id,
                name: call.name,
                arguments,
            });
        }
        ModelResponse {
            response_id: self.response_id,
            model: self.model,
            created_at: self.created_at,
            usage: self.usage,
            output,
        }
    }
}
