//! Conversation model — the ordered, append-only items sent to the model.

use serde::{Deserialize, Serialize};

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single item in a conversation or a model response.
///
/// Items are appended, never mutated; every `function_call_output` must
/// reference the `call_id` of an earlier `function_call`. Wire items with an
/// unrecognised `type` land in [`Item::Other`] and round-trip verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Item {
    Message {
        role: Role,
        content: String,
    },
    /// Normalised assistant text output.
    Text {
        text: String,
    },
    FunctionCall {
        call_id: String,
        name: String,
        /// Raw JSON-encoded arguments, forwarded as the model produced them.
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        /// JSON-encoded tool result (or error payload).
        output: String,
    },
    Handoff {
        target: String,
    },
    #[serde(untagged)]
    Other(serde_json::Value),
}

impl Item {
    pub fn user(content: impl Into<String>) -> Self {
        Self::Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn function_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::FunctionCall {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::FunctionCallOutput {
            call_id: call_id.into(),
            output: output.into(),
        }
    }
}

/// Initial input to a run: plain text or a pre-built conversation.
#[derive(Debug, Clone)]
pub enum RunInput {
    Text(String),
    Items(Vec<Item>),
}

impl RunInput {
    /// Wrap plain text as a single user message; pass item lists through verbatim.
    pub fn into_items(self) -> Vec<Item> {
        match self {
            Self::Text(text) => vec![Item::user(text)],
            Self::Items(items) => items,
        }
    }

    /// Concatenated text content, as fed to input guardrails.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Items(items) => items
                .iter()
                .filter_map(|item| match item {
                    Item::Message { content, .. } => Some(content.as_str()),
                    Item::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for RunInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for RunInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<Item>> for RunInput {
    fn from(items: Vec<Item>) -> Self {
        Self::Items(items)
    }
}
