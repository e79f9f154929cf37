//! The turn loop: model call, classify, act, iterate, terminate.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use switchboard_core::{AgentError, Item, Result, Role, RunContext, RunInput, StreamEvent};
use switchboard_model::{
    normalise_event, ModelClient, ModelResponse, Request, ResponseAccumulator, ToolSpec,
};

use crate::agent::Agent;
use crate::buffer::EventSink;
use crate::guardrail;
use crate::handoff::{self, HANDOFF_PREFIX};
use crate::tool::{self, ToolCall};
use crate::trace::{RunTracer, SpanKind};
use crate::{RunConfig, RunResult};

pub(crate) const DEFAULT_MODEL: &str = "gpt-4.1";

/// Drive one run to completion. Owns the run state for its whole lifetime;
/// on any exit path the trace is ended and the stream buffer completed.
pub(crate) async fn run_loop<C>(
    agent: Arc<Agent<C>>,
    input: RunInput,
    config: RunConfig,
    context: Arc<RunContext<C>>,
    sink: Option<EventSink>,
) -> Result<RunResult>
where
    C: Send + Sync + 'static,
{
    if config.max_turns == 0 {
        return Err(AgentError::invalid_config("max_turns", "must be at least 1"));
    }
    let client = config.resolve_client()?;

    let processor = config.trace_processor.clone().or_else(crate::trace::global);
    let tracer = RunTracer::start(
        processor,
        agent.name(),
        config.group_id.clone(),
        config.metadata.clone(),
    );

    let input_text = input.as_text();
    let mut state = TurnLoop {
        context,
        client,
        tracer,
        sink,
        conversation: input.into_items(),
        input_text,
        new_items: Vec::new(),
        turn: 0,
        previous_response_id: config.previous_response_id.clone(),
        last_response_id: None,
        agent_span: None,
        start: Instant::now(),
        config,
        agent,
    };

    let result = state.execute().await;

    match &result {
        Ok(run) => state.tracer.end(json!({ "output": run.output })),
        Err(err) => state.tracer.end(json!({ "error": err.to_string() })),
    }
    if let Some(sink) = state.sink.take() {
        let _ = sink.emit(StreamEvent::StreamComplete).await;
    }
    result
}

struct TurnLoop<C> {
    agent: Arc<Agent<C>>,
    context: Arc<RunContext<C>>,
    client: Arc<dyn ModelClient>,
    config: RunConfig,
    tracer: RunTracer,
    sink: Option<EventSink>,
    conversation: Vec<Item>,
    input_text: String,
    /// Items appended during this run, surfaced on the result.
    new_items: Vec<Item>,
    turn: u32,
    previous_response_id: Option<String>,
    last_response_id: Option<String>,
    agent_span: Option<String>,
    start: Instant,
}

/// The partitioned view of one response's output items.
#[derive(Default)]
struct Classified {
    text: String,
    calls: Vec<ToolCall>,
    handoff_targets: Vec<String>,
}

fn classify(output: &[Item]) -> Classified {
    let mut classified = Classified::default();
    for item in output {
        match item {
            Item::Text { text } => classified.text.push_str(text),
            Item::Message { role: Role::Assistant, content } => classified.text.push_str(content),
            Item::FunctionCall {
                call_id,
                name,
                arguments,
            } => classified.calls.push(ToolCall {
                call_id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            }),
            Item::Handoff { target } => classified.handoff_targets.push(target.clone()),
            _ => {}
        }
    }
    classified
}

impl<C> TurnLoop<C>
where
    C: Send + Sync + 'static,
{
    async fn execute(&mut self) -> Result<RunResult> {
        self.activate()?;

        loop {
            if self.turn >= self.config.max_turns {
                return Err(AgentError::MaxTurnsExceeded { turns: self.turn });
            }
            if self.sink.as_ref().is_some_and(EventSink::is_closed) {
                return Err(AgentError::Aborted("stream consumer dropped".into()));
            }

            let instructions = self
                .agent
                .instructions()
                .resolve(&self.context, &self.agent);

            guardrail::check_input(
                self.agent.input_guardrails(),
                &self.input_text,
                &self.context,
            )
            .await?;

            let request = self.build_request(instructions);
            let span = self.tracer.span(
                SpanKind::Generation,
                json!({ "model": request.model, "turn": self.turn }),
            );
            let response = match self.model_call(&request).await {
                Ok(response) => {
                    self.tracer.end_span(
                        span,
                        json!({ "response_id": response.response_id, "usage": response.usage }),
                    );
                    response
                }
                Err(err) => {
                    self.tracer.end_span(span, json!({ "error": err.to_string() }));
                    return Err(err);
                }
            };

            self.context.update_usage(&response.usage);
            if !response.response_id.is_empty() {
                self.last_response_id = Some(response.response_id.clone());
                if self.previous_response_id.is_some() {
                    self.previous_response_id = Some(response.response_id.clone());
                }
            }

            let classified = classify(&response.output);

            if !classified.calls.is_empty() {
                let (handoff_calls, tool_calls): (Vec<_>, Vec<_>) = classified
                    .calls
                    .into_iter()
                    .partition(|call| call.name.starts_with(HANDOFF_PREFIX));

                if let Some(first) = handoff_calls.first() {
                    if handoff_calls.len() > 1 {
                        warn!(
                            discarded = handoff_calls.len() - 1,
                            "Multiple handoff calls in one response; honouring the first"
                        );
                    }
                    self.perform_handoff(HandoffKey::ToolName(first.name.clone()))?;
                    continue;
                }

                self.dispatch_tools(tool_calls).await;
                self.turn += 1;
                continue;
            }

            if let Some(target) = classified.handoff_targets.first() {
                self.perform_handoff(HandoffKey::Target(target.clone()))?;
                continue;
            }

            if !classified.text.is_empty() {
                return self.terminate(classified.text).await;
            }

            return Err(AgentError::UnexpectedResponse(
                "model returned no actionable items".into(),
            ));
        }
    }

    /// On-start hook plus the agent span; runs at run start and after each
    /// handoff.
    fn activate(&mut self) -> Result<()> {
        let previous = self.agent_span.take();
        self.tracer.end_span(previous, json!({}));
        self.agent_span = self
            .tracer
            .span(SpanKind::Agent, json!({ "agent": self.agent.name() }));

        if let Some(hook) = self.agent.on_start() {
            hook(&self.context).map_err(|err| AgentError::HookFailed {
                hook: "on_start".into(),
                reason: err.to_string(),
            })?;
        }
        Ok(())
    }

    fn build_request(&self, instructions: String) -> Request {
        let settings = self.agent.model_settings();
        let mut tools: Vec<ToolSpec> = self
            .agent
            .tools()
            .iter()
            .map(|tool| {
                let description = tool.description();
                ToolSpec::function(
                    tool.name(),
                    (!description.is_empty()).then(|| description.to_string()),
                    tool.parameters_schema(),
                )
            })
            .collect();
        tools.extend(self.agent.handoffs().iter().map(|handoff| handoff.tool_spec()));

        Request {
            model: self
                .agent
                .model()
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
            instructions: (!instructions.is_empty()).then_some(instructions),
            input: self.conversation.clone(),
            tools: (!tools.is_empty()).then_some(tools),
            temperature: settings.temperature,
            top_p: settings.top_p,
            tool_choice: settings.tool_choice.clone(),
            parallel_tool_calls: settings.parallel_tool_calls,
            stream: None,
            text: self.agent.output_schema().map(|schema| schema.to_text_options()),
            previous_response_id: self.previous_response_id.clone(),
            extra: settings.extra.clone(),
        }
    }

    async fn model_call(&mut self, request: &Request) -> Result<ModelResponse> {
        if self.sink.is_none() {
            return self.client.create_completion(request).await;
        }
        self.streamed_call(request).await
    }

    /// Consume the wire stream, forwarding each normalised event into the
    /// buffer while folding the same events into a response record.
    async fn streamed_call(&mut self, request: &Request) -> Result<ModelResponse> {
        let mut stream = self.client.create_stream(request).await?;
        let mut accumulator = ResponseAccumulator::new();

        while let Some(wire) = stream.next().await {
            let raw = wire?;
            let Some(mut event) = normalise_event(&raw) else {
                continue;
            };
            // The wire's per-turn [DONE] is not the run's end; the runner
            // emits a single StreamComplete when the whole run terminates.
            if matches!(event, StreamEvent::StreamComplete) {
                continue;
            }
            if let StreamEvent::ResponseCompleted { trace_id, .. } = &mut event {
                *trace_id = self.tracer.trace_id().map(str::to_string);
            }
            accumulator.absorb(&event);
            if let Some(sink) = &self.sink {
                if !sink.emit(event).await {
                    return Err(AgentError::Aborted("stream consumer dropped".into()));
                }
            }
        }
        Ok(accumulator.finish())
    }

    /// Even when the wire marks streamed function calls completed, they have
    /// not run anywhere: execute them locally and append the outputs.
    async fn dispatch_tools(&mut self, calls: Vec<ToolCall>) {
        for call in &calls {
            let item = Item::function_call(&call.call_id, &call.name, &call.arguments);
            self.conversation.push(item.clone());
            self.new_items.push(item);
        }

        let spans: Vec<_> = calls
            .iter()
            .map(|call| {
                self.tracer.span(
                    SpanKind::Tool,
                    json!({ "name": call.name, "call_id": call.call_id }),
                )
            })
            .collect();

        let outcomes = tool::dispatch(
            calls,
            self.agent.tools(),
            &self.context,
            self.config.tool_timeout,
        )
        .await;

        for (outcome, span) in outcomes.into_iter().zip(spans) {
            self.tracer
                .end_span(span, json!({ "is_error": outcome.is_error }));
            if outcome.is_error {
                debug!(tool = %outcome.name, call_id = %outcome.call_id, "Tool reported an error");
            }
            let item = outcome.into_item();
            self.conversation.push(item.clone());
            self.new_items.push(item);
        }
    }

    fn perform_handoff(&mut self, key: HandoffKey) -> Result<()> {
        let current = Arc::clone(&self.agent);
        let handoff = match &key {
            HandoffKey::ToolName(name) => handoff::by_tool_name(current.handoffs(), name),
            HandoffKey::Target(target) => handoff::by_target(current.handoffs(), target),
        }
        .ok_or_else(|| AgentError::Handoff(format!("unknown handoff target '{}'", key.label())))?;

        let conversation = std::mem::take(&mut self.conversation);
        let (next_agent, filtered) = handoff.resolve(conversation, &self.context);

        let span = self.tracer.span(
            SpanKind::Handoff,
            json!({ "from": current.name(), "to": next_agent.name() }),
        );
        self.tracer.end_span(span, json!({}));
        debug!(from = %current.name(), to = %next_agent.name(), "Handoff");

        self.agent = next_agent;
        self.conversation = filtered;
        // The turn counter restarts for the new agent; usage and trace carry over.
        self.turn = 0;
        self.activate()
    }

    async fn terminate(&mut self, text: String) -> Result<RunResult> {
        let output = guardrail::check_output(
            self.agent.output_guardrails(),
            text,
            &self.context,
        )
        .await?;

        if let Some(hook) = self.agent.on_end() {
            if let Err(err) = hook(&self.context, &output) {
                warn!(%err, "on_end hook failed; run output is unaffected");
            }
        }

        self.tracer.end_span(self.agent_span.take(), json!({}));
        self.new_items.push(Item::Text {
            text: output.clone(),
        });

        Ok(RunResult {
            output,
            usage: self.context.usage(),
            trace_id: self.tracer.trace_id().map(str::to_string),
            response_id: self.last_response_id.clone(),
            duration: self.start.elapsed(),
            agent_name: self.agent.name().to_string(),
            new_items: std::mem::take(&mut self.new_items),
        })
    }
}

enum HandoffKey {
    ToolName(String),
    Target(String),
}

impl HandoffKey {
    fn label(&self) -> &str {
        match self {
            Self::ToolName(name) => name,
            Self::Target(target) => target,
        }
    }
}
