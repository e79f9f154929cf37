//! Agent execution engine — drives multi-turn conversations against the
//! Responses endpoint, with tool calling, handoffs, guardrails, and
//! streaming.
//!
//! The three entry points on [`Runner`]:
//!
//! - [`Runner::run`] awaits the final result, bounded by the run timeout.
//! - [`Runner::run_async`] returns a [`RunHandle`]; dropping it cancels the
//!   in-flight run.
//! - [`Runner::stream`] returns a [`StreamedRun`] yielding typed events as
//!   the model produces them; dropping it cancels the run.
//!
//! ```no_run
//! use std::sync::Arc;
//! use switchboard_runtime::{Agent, RunConfig, Runner};
//!
//! # async fn demo() -> switchboard_core::Result<()> {
//! let agent = Arc::new(
//!     Agent::<()>::builder("assistant")
//!         .instructions("You are terse.")
//!         .build()?,
//! );
//! let result = Runner::run(agent, "ping", RunConfig::default()).await?;
//! println!("{}", result.output);
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use serde_json::Value;
use tokio::task::JoinHandle;

pub use switchboard_core::{
    AgentError, ApiConfig, Item, Result, Role, RunContext, RunInput, StreamEvent, Usage,
};
pub use switchboard_model::{ModelClient, ModelResponse, Request, ResponsesClient};

pub mod agent;
pub mod buffer;
pub mod guardrail;
pub mod handoff;
mod runner;
pub mod tool;
pub mod trace;

pub use agent::{Agent, AgentBuilder, Instructions, ModelSettings, OutputSchema};
pub use buffer::{EventStream, Next};
pub use guardrail::{GuardrailVerdict, InputGuardrail, OutputGuardrail, OutputVerdict};
pub use handoff::{Handoff, HANDOFF_PREFIX};
pub use tool::{FunctionTool, Tool};
pub use trace::{SpanKind, TraceExport, TraceProcessor, TraceRecord};

pub const DEFAULT_MAX_TURNS: u32 = 10;
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-run options. `Default` gives the stock engine: client from the
/// environment, 10 turns, 60 s run timeout, 30 s per tool call.
#[derive(Clone)]
pub struct RunConfig {
    pub model_client: Option<Arc<dyn ModelClient>>,
    pub max_turns: u32,
    /// Aggregate bound for [`Runner::run`]; streaming runs have only
    /// per-request timeouts.
    pub run_timeout: Duration,
    pub tool_timeout: Duration,
    pub group_id: Option<String>,
    pub metadata: Option<Value>,
    pub previous_response_id: Option<String>,
    pub trace_processor: Option<Arc<TraceProcessor>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model_client: None,
            max_turns: DEFAULT_MAX_TURNS,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            group_id: None,
            metadata: None,
            previous_response_id: None,
            trace_processor: None,
        }
    }
}

impl RunConfig {
    pub fn with_client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.model_client = Some(client);
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_previous_response_id(mut self, response_id: impl Into<String>) -> Self {
        self.previous_response_id = Some(response_id.into());
        self
    }

    pub fn with_trace_processor(mut self, processor: Arc<TraceProcessor>) -> Self {
        self.trace_processor = Some(processor);
        self
    }

    pub(crate) fn resolve_client(&self) -> Result<Arc<dyn ModelClient>> {
        match &self.model_client {
            Some(client) => Ok(Arc::clone(client)),
            None => Ok(Arc::new(ResponsesClient::new(ApiConfig::from_env()?))),
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Final text output, after output guardrails.
    pub output: String,
    /// Usage aggregated across every turn (handoffs included).
    pub usage: Usage,
    pub trace_id: Option<String>,
    /// The last response id the remote returned, if any.
    pub response_id: Option<String>,
    pub duration: Duration,
    /// The agent that produced the final output (after handoffs).
    pub agent_name: String,
    /// Items appended during the run, for threading follow-up conversations.
    pub new_items: Vec<Item>,
}

/// Handle to an in-flight run. Dropping it aborts the run; [`RunHandle::join`]
/// waits for the result.
pub struct RunHandle {
    handle: Option<JoinHandle<Result<RunResult>>>,
}

impl RunHandle {
    pub async fn join(mut self) -> Result<RunResult> {
        let Some(handle) = self.handle.take() else {
            return Err(AgentError::Aborted("run handle already consumed".into()));
        };
        match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(AgentError::Aborted(format!("runner task died: {join_err}"))),
        }
    }

    /// Join with a deadline; the run is aborted if it does not finish in time.
    pub async fn join_timeout(mut self, timeout: Duration) -> Result<RunResult> {
        let Some(mut handle) = self.handle.take() else {
            return Err(AgentError::Aborted("run handle already consumed".into()));
        };
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                Err(AgentError::Aborted(format!("runner task died: {join_err}")))
            }
            Err(_) => {
                handle.abort();
                Err(AgentError::Aborted(format!(
                    "run timed out after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// A streaming run: pull events as they arrive, then collect the result.
/// Dropping it cancels the run and reaps outstanding tool invocations.
pub struct StreamedRun {
    events: EventStream,
    handle: RunHandle,
}

impl StreamedRun {
    /// Next event, waiting up to `timeout`.
    pub async fn next_timeout(&mut self, timeout: Duration) -> Next {
        self.events.next_timeout(timeout).await
    }

    /// Drain any remaining events and return the run's result.
    pub async fn result(mut self) -> Result<RunResult> {
        use futures::StreamExt;
        while self.events.next().await.is_some() {}
        self.handle.join().await
    }
}

impl Stream for StreamedRun {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

/// The public façade over the turn loop.
pub struct Runner;

impl Runner {
    /// Run to completion, bounded by `config.run_timeout`.
    pub async fn run<C>(
        agent: Arc<Agent<C>>,
        input: impl Into<RunInput>,
        config: RunConfig,
    ) -> Result<RunResult>
    where
        C: Default + Send + Sync + 'static,
    {
        Self::run_with_context(agent, input, config, RunContext::wrap(C::default())).await
    }

    pub async fn run_with_context<C>(
        agent: Arc<Agent<C>>,
        input: impl Into<RunInput>,
        config: RunConfig,
        context: RunContext<C>,
    ) -> Result<RunResult>
    where
        C: Send + Sync + 'static,
    {
        let timeout = config.run_timeout;
        let handle = Self::run_async_with_context(agent, input, config, context);
        handle.join_timeout(timeout).await
    }

    /// Start a run in the background and return its handle immediately.
    pub fn run_async<C>(
        agent: Arc<Agent<C>>,
        input: impl Into<RunInput>,
        config: RunConfig,
    ) -> RunHandle
    where
        C: Default + Send + Sync + 'static,
    {
        Self::run_async_with_context(agent, input, config, RunContext::wrap(C::default()))
    }

    pub fn run_async_with_context<C>(
        agent: Arc<Agent<C>>,
        input: impl Into<RunInput>,
        config: RunConfig,
        context: RunContext<C>,
    ) -> RunHandle
    where
        C: Send + Sync + 'static,
    {
        let handle = tokio::spawn(runner::run_loop(
            agent,
            input.into(),
            config,
            Arc::new(context),
            None,
        ));
        RunHandle {
            handle: Some(handle),
        }
    }

    /// Start a streaming run; events arrive on the returned stream in wire
    /// order, ending with `StreamComplete`.
    pub fn stream<C>(
        agent: Arc<Agent<C>>,
        input: impl Into<RunInput>,
        config: RunConfig,
    ) -> StreamedRun
    where
        C: Default + Send + Sync + 'static,
    {
        Self::stream_with_context(agent, input, config, RunContext::wrap(C::default()))
    }

    pub fn stream_with_context<C>(
        agent: Arc<Agent<C>>,
        input: impl Into<RunInput>,
        config: RunConfig,
        context: RunContext<C>,
    ) -> StreamedRun
    where
        C: Send + Sync + 'static,
    {
        let (sink, events) = buffer::channel(buffer::DEFAULT_CAPACITY);
        let handle = tokio::spawn(runner::run_loop(
            agent,
            input.into(),
            config,
            Arc::new(context),
            Some(sink),
        ));
        StreamedRun {
            events,
            handle: RunHandle {
                handle: Some(handle),
            },
        }
    }
}
