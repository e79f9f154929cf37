//! Request and response records for the Responses endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use switchboard_core::{Item, Usage};

/// JSON body POSTed to `<base_url>/responses`.
///
/// `None` fields are omitted from the serialised body. Settings the engine
/// does not interpret (e.g. `max_tokens`) pass through `extra` unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    pub input: Vec<Item>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextOptions>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,

    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, Value>,
}

/// A function tool as declared to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub parameters: Value,
}

impl ToolSpec {
    pub fn function(
        name: impl Into<String>,
        description: Option<String>,
        parameters: Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            name: name.into(),
            description,
            function: FunctionSpec { parameters },
        }
    }
}

/// `"auto"`, `"none"`, or a forced named function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(String),
    Named {
        #[serde(rename = "type")]
        kind: String,
        function: NamedTool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTool {
    pub name: String,
}

impl ToolChoice {
    pub fn auto() -> Self {
        Self::Mode("auto".to_string())
    }

    pub fn none() -> Self {
        Self::Mode("none".to_string())
    }

    pub fn function(name: impl Into<String>) -> Self {
        Self::Named {
            kind: "function".to_string(),
            function: NamedTool { name: name.into() },
        }
    }
}

/// `text.format` block declaring a structured-output schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextOptions {
    pub format: TextFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub schema: Value,
}

impl TextOptions {
    /// Build a `json_schema` format block. `name` keeps only its last dotted
    /// component (`My.Schemas.Weather` declares as `Weather`).
    pub fn json_schema(name: &str, schema: Value) -> Self {
        let short = name.rsplit('.').next().unwrap_or(name);
        Self {
            format: TextFormat {
                kind: "json_schema".to_string(),
                name: short.to_string(),
                schema,
            },
        }
    }
}

/// A normalised model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub response_id: String,
    pub model: String,
    pub created_at: Option<f64>,
    pub usage: Usage,
    pub output: Vec<Item>,
}

/// The response body exactly as the wire delivers it.
#[derive(Debug, Deserialize)]
pub(crate) struct RawResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub created_at: Option<f64>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub output: Vec<Value>,
}

impl RawResponse {
    pub(crate) fn normalise(self) -> ModelResponse {
        ModelResponse {
            response_id: self.id,
            model: self.model,
            created_at: self.created_at,
            usage: self.usage,
            output: normalise_output(self.output),
        }
    }
}

/// Map wire output items onto conversation [`Item`]s.
///
/// `message` contents unfold into `text` / `function_call` items; top-level
/// `function_call` and `handoff` map directly; anything else passes through
/// with its declared type.
pub fn normalise_output(raw: Vec<Value>) -> Vec<Item> {
    let mut items = Vec::new();
    for value in raw {
        match value.get("type").and_then(Value::as_str) {
            Some("message") => {
                let content = value
                    .get("content")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for part in content {
                    match part.get("type").and_then(Value::as_str) {
                        Some("output_text") => items.push(Item::Text {
                            text: str_field(&part, "text"),
                        }),
                        Some("tool_use") => items.push(Item::FunctionCall {
                            call_id: str_field(&part, "id"),
                            name: str_field(&part, "name"),
                            arguments: arguments_field(&part),
                        }),
                        _ => items.push(Item::Other(part)),
                    }
                }
            }
            Some("function_call") => items.push(Item::FunctionCall {
                call_id: value
                    .get("call_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| str_field(&value, "id")),
                name: str_field(&value, "name"),
                arguments: arguments_field(&value),
            }),
            Some("handoff") => items.push(Item::Handoff {
                target: str_field(&value, "target"),
            }),
            _ => items.push(Item::Other(value)),
        }
    }
    items
}

fn str_field(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Arguments may arrive as a JSON string or an inline object.
fn arguments_field(value: &Value) -> String {
    match value.get("arguments").or_else(|| value.get("input")) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "{}".to_string(),
    }
}
