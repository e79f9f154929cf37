//! Agent configuration — name, instructions, tools, handoffs, guardrails.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use switchboard_core::{AgentError, Result, RunContext};
use switchboard_model::{TextOptions, ToolChoice};

use crate::guardrail::{InputGuardrail, OutputGuardrail};
use crate::handoff::Handoff;
use crate::tool::Tool;

/// System instructions: a fixed string, or a function of the run context.
#[derive(Clone)]
pub enum Instructions<C = ()> {
    Static(String),
    Dynamic(Arc<dyn Fn(&RunContext<C>, &Agent<C>) -> String + Send + Sync>),
}

impl<C> Instructions<C> {
    pub(crate) fn resolve(&self, context: &RunContext<C>, agent: &Agent<C>) -> String {
        match self {
            Self::Static(text) => text.clone(),
            Self::Dynamic(f) => f(context, agent),
        }
    }
}

impl<C> fmt::Debug for Instructions<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Sampling and tool-behaviour settings forwarded to the model.
///
/// Fields the engine does not interpret (e.g. `max_tokens`) go in `extra`
/// and are merged into the request body verbatim.
#[derive(Debug, Clone, Default)]
pub struct ModelSettings {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub tool_choice: Option<ToolChoice>,
    pub parallel_tool_calls: Option<bool>,
    pub extra: serde_json::Map<String, Value>,
}

/// A user-declared structured-output schema, forwarded verbatim.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    name: String,
    schema: Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Stable schema identifier; the request uses its last dotted component.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub(crate) fn to_text_options(&self) -> TextOptions {
        TextOptions::json_schema(&self.name, self.schema.clone())
    }
}

/// Lifecycle callback invoked when the runner activates the agent.
pub type StartHook<C> = Arc<dyn Fn(&RunContext<C>) -> anyhow::Result<()> + Send + Sync>;
/// Lifecycle callback invoked with the final output before the run returns.
pub type EndHook<C> = Arc<dyn Fn(&RunContext<C>, &str) -> anyhow::Result<()> + Send + Sync>;

/// A named, configured personality the engine drives through model calls.
///
/// Agents are immutable once built and shared via `Arc`, so one definition
/// can serve many concurrent runs and handoff targets.
pub struct Agent<C = ()> {
    name: String,
    instructions: Instructions<C>,
    model: Option<String>,
    model_settings: ModelSettings,
    tools: Vec<Arc<dyn Tool<C>>>,
    handoffs: Vec<Handoff<C>>,
    input_guardrails: Vec<Arc<dyn InputGuardrail<C>>>,
    output_guardrails: Vec<Arc<dyn OutputGuardrail<C>>>,
    output_schema: Option<OutputSchema>,
    on_start: Option<StartHook<C>>,
    on_end: Option<EndHook<C>>,
}

impl<C> fmt::Debug for Agent<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("tools", &self.tools.len())
            .field("handoffs", &self.handoffs.len())
            .finish()
    }
}

impl<C> Agent<C> {
    pub fn builder(name: impl Into<String>) -> AgentBuilder<C> {
        AgentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn model_settings(&self) -> &ModelSettings {
        &self.model_settings
    }

    pub fn tools(&self) -> &[Arc<dyn Tool<C>>] {
        &self.tools
    }

    pub fn handoffs(&self) -> &[Handoff<C>] {
        &self.handoffs
    }

    pub fn input_guardrails(&self) -> &[Arc<dyn InputGuardrail<C>>] {
        &self.input_guardrails
    }

    pub fn output_guardrails(&self) -> &[Arc<dyn OutputGuardrail<C>>] {
        &self.output_guardrails
    }

    pub fn output_schema(&self) -> Option<&OutputSchema> {
        self.output_schema.as_ref()
    }

    pub(crate) fn instructions(&self) -> &Instructions<C> {
        &self.instructions
    }

    pub(crate) fn on_start(&self) -> Option<&StartHook<C>> {
        self.on_start.as_ref()
    }

    pub(crate) fn on_end(&self) -> Option<&EndHook<C>> {
        self.on_end.as_ref()
    }
}

/// Builder for [`Agent`]; `build` validates the configuration.
pub struct AgentBuilder<C = ()> {
    name: String,
    instructions: Instructions<C>,
    model: Option<String>,
    model_settings: ModelSettings,
    tools: Vec<Arc<dyn Tool<C>>>,
    handoffs: Vec<Handoff<C>>,
    input_guardrails: Vec<Arc<dyn InputGuardrail<C>>>,
    output_guardrails: Vec<Arc<dyn OutputGuardrail<C>>>,
    output_schema: Option<OutputSchema>,
    on_start: Option<StartHook<C>>,
    on_end: Option<EndHook<C>>,
}

impl<C> AgentBuilder<C> {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Instructions::Static(String::new()),
            model: None,
            model_settings: ModelSettings::default(),
            tools: Vec::new(),
            handoffs: Vec::new(),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            output_schema: None,
            on_start: None,
            on_end: None,
        }
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Instructions::Static(instructions.into());
        self
    }

    /// Instructions recomputed per turn from the run context.
    pub fn instructions_fn(
        mut self,
        f: impl Fn(&RunContext<C>, &Agent<C>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.instructions = Instructions::Dynamic(Arc::new(f));
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = settings;
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool<C>>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn handoff(mut self, handoff: Handoff<C>) -> Self {
        self.handoffs.push(handoff);
        self
    }

    pub fn input_guardrail(mut self, guardrail: Arc<dyn InputGuardrail<C>>) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn output_guardrail(mut self, guardrail: Arc<dyn OutputGuardrail<C>>) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn on_start(
        mut self,
        hook: impl Fn(&RunContext<C>) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }

    pub fn on_end(
        mut self,
        hook: impl Fn(&RunContext<C>, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_end = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<Agent<C>> {
        if self.name.trim().is_empty() {
            return Err(AgentError::invalid_config("name", "must not be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name().to_string()) {
                return Err(AgentError::invalid_config(
                    "tools",
                    format!("duplicate tool name '{}'", tool.name()),
                ));
            }
        }
        Ok(Agent {
            name: self.name,
            instructions: self.instructions,
            model: self.model,
            model_settings: self.model_settings,
            tools: self.tools,
            handoffs: self.handoffs,
            input_guardrails: self.input_guardrails,
            output_guardrails: self.output_guardrails,
            output_schema: self.output_schema,
            on_start: self.on_start,
            on_end: self.on_end,
        })
    }
}
