//! Handoffs — transferring the turn loop to another agent.
//!
//! Each target is exposed to the model as a synthetic function tool named
//! `handoff_to_<agent>`; the dispatcher short-circuits on that prefix
//! instead of executing a tool.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use switchboard_core::{Item, RunContext};
use switchboard_model::ToolSpec;

use crate::agent::Agent;

pub const HANDOFF_PREFIX: &str = "handoff_to_";

/// Reduces or transforms the conversation before the next agent sees it.
pub type InputFilter<C> = Arc<dyn Fn(Vec<Item>, &RunContext<C>) -> Vec<Item> + Send + Sync>;

/// A registered handoff target.
pub struct Handoff<C = ()> {
    agent: Arc<Agent<C>>,
    tool_name: String,
    description: String,
    parameters: Value,
    input_filter: Option<InputFilter<C>>,
}

impl<C> Handoff<C> {
    pub fn to(agent: Arc<Agent<C>>) -> Self {
        let tool_name = format!("{HANDOFF_PREFIX}{}", agent.name());
        let description = format!("Transfer the conversation to the '{}' agent.", agent.name());
        Self {
            agent,
            tool_name,
            description,
            parameters: json!({
                "type": "object",
                "properties": {
                    "input": { "type": "string" },
                },
            }),
            input_filter: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Replace the default `{input: string}` parameter schema.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_input_filter(
        mut self,
        filter: impl Fn(Vec<Item>, &RunContext<C>) -> Vec<Item> + Send + Sync + 'static,
    ) -> Self {
        self.input_filter = Some(Arc::new(filter));
        self
    }

    pub fn agent(&self) -> &Arc<Agent<C>> {
        &self.agent
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// The synthetic function tool declared to the model.
    pub(crate) fn tool_spec(&self) -> ToolSpec {
        ToolSpec::function(
            self.tool_name.clone(),
            Some(self.description.clone()),
            self.parameters.clone(),
        )
    }

    /// Produce `(next_agent, filtered_conversation)`.
    pub(crate) fn resolve(
        &self,
        conversation: Vec<Item>,
        context: &RunContext<C>,
    ) -> (Arc<Agent<C>>, Vec<Item>) {
        let conversation = match &self.input_filter {
            Some(filter) => filter(conversation, context),
            None => conversation,
        };
        (Arc::clone(&self.agent), conversation)
    }
}

impl<C> fmt::Debug for Handoff<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("agent", &self.agent.name())
            .field("tool_name", &self.tool_name)
            .finish()
    }
}

/// Look up a handoff by the synthetic tool name the model called.
pub(crate) fn by_tool_name<'a, C>(
    handoffs: &'a [Handoff<C>],
    tool_name: &str,
) -> Option<&'a Handoff<C>> {
    handoffs
        .iter()
        .find(|handoff| handoff.tool_name == tool_name)
}

/// Look up a handoff by target agent name (for bare `handoff` items).
pub(crate) fn by_target<'a, C>(handoffs: &'a [Handoff<C>], target: &str) -> Option<&'a Handoff<C>> {
    handoffs
        .iter()
        .find(|handoff| handoff.agent.name() == target)
}
