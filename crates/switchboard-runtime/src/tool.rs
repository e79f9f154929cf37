//! Tool contract and the parallel dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{info, warn};

use switchboard_core::{Item, RunContext};

/// A capability the model may invoke by name with JSON arguments.
///
/// `execute` runs concurrently with the other calls of the same batch, under
/// a per-call timeout. Errors do not abort the run: they are serialised back
/// to the model as the call's output.
#[async_trait]
pub trait Tool<C = ()>: Send + Sync {
    /// Name as exposed to the model (e.g. "add", "web_search").
    fn name(&self) -> &str;

    /// Human-readable description for the model.
    fn description(&self) -> &str {
        ""
    }

    /// JSON Schema of the tool's parameters.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, arguments: Value, context: &RunContext<C>) -> anyhow::Result<Value>;

    /// Optionally rewrite an execution error into the payload fed back to
    /// the model. `None` keeps the error's own message.
    fn on_error(&self, error: &anyhow::Error) -> Option<String> {
        let _ = error;
        None
    }
}

/// Closure-backed [`Tool`] for tools that don't warrant a dedicated type.
pub struct FunctionTool<C = ()> {
    name: String,
    description: String,
    parameters: Value,
    #[allow(clippy::type_complexity)]
    handler: Arc<dyn Fn(Value, &RunContext<C>) -> anyhow::Result<Value> + Send + Sync>,
}

impl<C> FunctionTool<C> {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: impl Fn(Value, &RunContext<C>) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(handler),
        }
    }
}

#[async_trait]
impl<C: Send + Sync> Tool<C> for FunctionTool<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, arguments: Value, context: &RunContext<C>) -> anyhow::Result<Value> {
        (self.handler)(arguments, context)
    }
}

/// One function call to dispatch, as classified by the runner.
#[derive(Debug, Clone)]
pub(crate) struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// Outcome of one call; `output` is the JSON string destined for the
/// conversation's `function_call_output` item.
#[derive(Debug)]
pub(crate) struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub output: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub(crate) fn into_item(self) -> Item {
        Item::function_call_output(self.call_id, self.output)
    }
}

/// Invoke a batch of calls concurrently, each under `timeout`.
///
/// Outcomes come back in input order regardless of completion order; a
/// timeout, error, or panic in one call never disturbs the others.
pub(crate) async fn dispatch<C>(
    calls: Vec<ToolCall>,
    tools: &[Arc<dyn Tool<C>>],
    context: &Arc<RunContext<C>>,
    timeout: Duration,
) -> Vec<ToolOutcome>
where
    C: Send + Sync + 'static,
{
    let by_name: HashMap<&str, &Arc<dyn Tool<C>>> =
        tools.iter().map(|tool| (tool.name(), tool)).collect();

    let handles: Vec<_> = calls
        .iter()
        .map(|call| {
            let tool = by_name.get(call.name.as_str()).map(|tool| Arc::clone(tool));
            let context = Arc::clone(context);
            let call = call.clone();
            tokio::spawn(async move { invoke_one(call, tool, &context, timeout).await })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(calls.len());
    for (handle, call) in join_all(handles).await.into_iter().zip(calls) {
        outcomes.push(handle.unwrap_or_else(|join_err| {
            // The task only dies on a panic inside the tool itself.
            let reason = if join_err.is_panic() {
                format!("tool panicked: {join_err}")
            } else {
                join_err.to_string()
            };
            warn!(tool = %call.name, call_id = %call.call_id, %reason, "Tool task died");
            error_outcome(call.call_id, call.name, reason)
        }));
    }
    outcomes
}

async fn invoke_one<C>(
    call: ToolCall,
    tool: Option<Arc<dyn Tool<C>>>,
    context: &RunContext<C>,
    timeout: Duration,
) -> ToolOutcome
where
    C: Send + Sync,
{
    let Some(tool) = tool else {
        return error_outcome(call.call_id, call.name.clone(), format!("unknown tool: {}", call.name));
    };

    // Undecodable arguments degrade to an empty object.
    let arguments: Value = serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));

    info!(tool = %call.name, call_id = %call.call_id, "Executing tool");
    match tokio::time::timeout(timeout, tool.execute(arguments, context)).await {
        Err(_) => error_outcome(call.call_id, call.name, "timeout".to_string()),
        Ok(Ok(value)) => ToolOutcome {
            call_id: call.call_id,
            name: call.name,
            output: value.to_string(),
            is_error: false,
        },
        Ok(Err(err)) => {
            let reason = tool.on_error(&err).unwrap_or_else(|| err.to_string());
            error_outcome(call.call_id, call.name, reason)
        }
    }
}

fn error_outcome(call_id: String, name: String, reason: String) -> ToolOutcome {
    ToolOutcome {
        call_id,
        name,
        output: json!({ "error": reason }).to_string(),
        is_error: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_TOOL_TIMEOUT;

    fn add_tool() -> Arc<dyn Tool> {
        Arc::new(FunctionTool::new(
            "add",
            "Add two numbers",
            json!({"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}}),
            |args, _ctx| {
                let a = args["a"].as_i64().unwrap_or(0);
                let b = args["b"].as_i64().unwrap_or(0);
                Ok(json!({"sum": a + b}))
            },
        ))
    }

    struct SleepyTool {
        delay: Duration,
    }

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _arguments: Value, _context: &RunContext) -> anyhow::Result<Value> {
            tokio::time::sleep(self.delay).await;
            Ok(json!({"slept_ms": self.delay.as_millis() as u64}))
        }
    }

    struct FussyTool;

    #[async_trait]
    impl Tool for FussyTool {
        fn name(&self) -> &str {
            "fussy"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _arguments: Value, _context: &RunContext) -> anyhow::Result<Value> {
            anyhow::bail!("refusing to cooperate")
        }

        fn on_error(&self, _error: &anyhow::Error) -> Option<String> {
            Some("fussy tool had a bad day".to_string())
        }
    }

    fn call(call_id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    #[tokio::test]
    async fn executes_and_serialises_result() {
        let context = Arc::new(RunContext::new());
        let tools = vec![add_tool()];
        let outcomes = dispatch(
            vec![call("c1", "add", r#"{"a":2,"b":3}"#)],
            &tools,
            &context,
            DEFAULT_TOOL_TIMEOUT,
        )
        .await;
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].is_error);
        assert_eq!(outcomes[0].output, r#"{"sum":5}"#);
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let context = Arc::new(RunContext::new());
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(SleepyTool {
                delay: Duration::from_millis(50),
            }),
            add_tool(),
        ];
        // The slow call is first; it must still come back first.
        let outcomes = dispatch(
            vec![
                call("c1", "sleepy", "{}"),
                call("c2", "add", r#"{"a":1,"b":1}"#),
            ],
            &tools,
            &context,
            DEFAULT_TOOL_TIMEOUT,
        )
        .await;
        assert_eq!(outcomes[0].call_id, "c1");
        assert_eq!(outcomes[1].call_id, "c2");
    }

    #[tokio::test]
    async fn timeout_hits_only_the_slow_call() {
        let context = Arc::new(RunContext::new());
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(SleepyTool {
                delay: Duration::from_secs(60),
            }),
            add_tool(),
        ];
        let outcomes = dispatch(
            vec![
                call("c1", "sleepy", "{}"),
                call("c2", "add", r#"{"a":2,"b":2}"#),
            ],
            &tools,
            &context,
            Duration::from_millis(50),
        )
        .await;
        assert!(outcomes[0].is_error);
        assert!(outcomes[0].output.contains("timeout"));
        assert!(!outcomes[1].is_error);
        assert_eq!(outcomes[1].output, r#"{"sum":4}"#);
    }

    #[tokio::test]
    async fn on_error_rewrites_the_failure() {
        let context = Arc::new(RunContext::new());
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(FussyTool)];
        let outcomes = dispatch(
            vec![call("c1", "fussy", "{}")],
            &tools,
            &context,
            DEFAULT_TOOL_TIMEOUT,
        )
        .await;
        assert!(outcomes[0].is_error);
        assert!(outcomes[0].output.contains("fussy tool had a bad day"));
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments() {
        let context = Arc::new(RunContext::new());
        let tools = vec![add_tool()];
        let outcomes = dispatch(
            vec![
                call("c1", "missing", "{}"),
                call("c2", "add", "not json at all"),
            ],
            &tools,
            &context,
            DEFAULT_TOOL_TIMEOUT,
        )
        .await;
        assert!(outcomes[0].is_error);
        assert!(outcomes[0].output.contains("unknown tool"));
        // Bad arguments decode as {} and the tool still runs.
        assert!(!outcomes[1].is_error);
        assert_eq!(outcomes[1].output, r#"{"sum":0}"#);
    }
}
