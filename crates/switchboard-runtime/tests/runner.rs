//! End-to-end runner scenarios driven by a scripted model client.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use switchboard_core::{AgentError, Item, Usage};
use switchboard_model::{ModelClient, ModelResponse, Request, WireEventStream};
use switchboard_runtime::{
    Agent, FunctionTool, GuardrailVerdict, Handoff, InputGuardrail, Next, RunConfig, RunContext,
    Runner, StreamEvent, Tool, TraceExport, TraceProcessor, TraceRecord,
};

/// Replays scripted completions/streams and records every request it sees.
#[derive(Default)]
struct ScriptedClient {
    completions: Mutex<VecDeque<ModelResponse>>,
    streams: Mutex<VecDeque<Vec<Value>>>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedClient {
    fn with_completions(responses: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            completions: Mutex::new(responses.into()),
            ..Self::default()
        })
    }

    fn with_streams(streams: Vec<Vec<Value>>) -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(streams.into()),
            ..Self::default()
        })
    }

    fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn create_completion(&self, request: &Request) -> switchboard_core::Result<ModelResponse> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.completions
            .lock()
            .expect("completions lock")
            .pop_front()
            .ok_or_else(|| AgentError::UnexpectedResponse("script exhausted".into()))
    }

    async fn create_stream(&self, request: &Request) -> switchboard_core::Result<WireEventStream> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let frames = self
            .streams
            .lock()
            .expect("streams lock")
            .pop_front()
            .ok_or_else(|| AgentError::UnexpectedResponse("stream script exhausted".into()))?;
        Ok(Box::pin(futures::stream::iter(frames.into_iter().map(Ok))))
    }
}

fn response(output: Vec<Item>, usage: Usage) -> ModelResponse {
    ModelResponse {
        response_id: "resp_fixture".into(),
        model: "gpt-4.1".into(),
        created_at: None,
        usage,
        output,
    }
}

fn add_tool() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        "add",
        "Add two numbers",
        json!({
            "type": "object",
            "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
        }),
        |args, _ctx| {
            let a = args["a"].as_i64().unwrap_or(0);
            let b = args["b"].as_i64().unwrap_or(0);
            Ok(json!({"sum": a + b}))
        },
    ))
}

#[derive(Default)]
struct MemoryExport {
    traces: Mutex<Vec<TraceRecord>>,
}

#[async_trait]
impl TraceExport for MemoryExport {
    async fn export(&self, traces: Vec<TraceRecord>) -> anyhow::Result<()> {
        self.traces.lock().expect("traces lock").extend(traces);
        Ok(())
    }
}

#[tokio::test]
async fn pure_question_and_answer() {
    let client = ScriptedClient::with_completions(vec![response(
        vec![Item::Text {
            text: "pong".into(),
        }],
        Usage::new(3, 1, 4),
    )]);
    let agent = Arc::new(
        Agent::<()>::builder("ponger")
            .instructions("reply 'pong'")
            .build()
            .expect("agent"),
    );
    let export = Arc::new(MemoryExport::default());
    let processor = TraceProcessor::spawn_with(export, 1, Duration::from_millis(20));

    let result = Runner::run(
        agent,
        "ping",
        RunConfig::default()
            .with_client(client.clone())
            .with_trace_processor(processor),
    )
    .await
    .expect("run");

    assert_eq!(result.output, "pong");
    assert_eq!(result.usage, Usage::new(3, 1, 4));
    let trace_id = result.trace_id.expect("trace id");
    assert!(trace_id.starts_with("trace_"));

    let requests = client.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].instructions.as_deref(), Some("reply 'pong'"));
    assert_eq!(requests[0].input, vec![Item::user("ping")]);
    // No tools configured: the field stays off the wire.
    assert!(requests[0].tools.is_none());
}

#[tokio::test]
async fn single_tool_call_round_trip() {
    let client = ScriptedClient::with_completions(vec![
        response(
            vec![Item::function_call("c1", "add", r#"{"a":2,"b":3}"#)],
            Usage::new(10, 5, 15),
        ),
        response(
            vec![Item::Text {
                text: "The sum is 5.".into(),
            }],
            Usage::new(20, 7, 27),
        ),
    ]);
    let agent = Arc::new(
        Agent::<()>::builder("calculator")
            .instructions("Use the add tool.")
            .tool(add_tool())
            .build()
            .expect("agent"),
    );

    let result = Runner::run(
        agent,
        "what is 2+3?",
        RunConfig::default().with_client(client.clone()),
    )
    .await
    .expect("run");

    assert_eq!(result.output, "The sum is 5.");
    assert_eq!(result.usage, Usage::new(30, 12, 42));

    let requests = client.requests();
    assert_eq!(requests.len(), 2);

    // Second turn's conversation carries the call and its output, in order.
    let input = &requests[1].input;
    let call_pos = input
        .iter()
        .position(|item| matches!(item, Item::FunctionCall { call_id, .. } if call_id == "c1"))
        .expect("function_call in conversation");
    let output_pos = input
        .iter()
        .position(
            |item| matches!(item, Item::FunctionCallOutput { call_id, .. } if call_id == "c1"),
        )
        .expect("function_call_output in conversation");
    assert!(call_pos < output_pos, "output must follow its call");
    let Item::FunctionCallOutput { output, .. } = &input[output_pos] else {
        unreachable!();
    };
    assert_eq!(output, r#"{"sum":5}"#);
}

#[tokio::test]
async fn parallel_tool_outputs_keep_input_order() {
    struct Slow;
    struct Fast;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(
            &self,
            _args: Value,
            _ctx: &RunContext,
        ) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(json!({"tool": "slow"}))
        }
    }

    #[async_trait]
    impl Tool for Fast {
        fn name(&self) -> &str {
            "fast"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(
            &self,
            _args: Value,
            _ctx: &RunContext,
        ) -> anyhow::Result<Value> {
            Ok(json!({"tool": "fast"}))
        }
    }

    let client = ScriptedClient::with_completions(vec![
        response(
            vec![
                Item::function_call("c1", "slow", "{}"),
                Item::function_call("c2", "fast", "{}"),
            ],
            Usage::new(5, 5, 10),
        ),
        response(
            vec![Item::Text {
                text: "both done".into(),
            }],
            Usage::new(5, 2, 7),
        ),
    ]);
    let agent = Arc::new(
        Agent::<()>::builder("racer")
            .tool(Arc::new(Slow))
            .tool(Arc::new(Fast))
            .build()
            .expect("agent"),
    );

    Runner::run(agent, "race", RunConfig::default().with_client(client.clone()))
        .await
        .expect("run");

    let requests = client.requests();
    let outputs: Vec<&str> = requests[1]
        .input
        .iter()
        .filter_map(|item| match item {
            Item::FunctionCallOutput { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();
    // c1 finished last but is still reported first.
    assert_eq!(outputs, vec!["c1", "c2"]);
}

#[tokio::test]
async fn handoff_switches_agent_and_preserves_usage() {
    let spanish = Arc::new(
        Agent::<()>::builder("spanish_agent")
            .instructions("Responde únicamente en español.")
            .build()
            .expect("agent"),
    );
    let triage = Arc::new(
        Agent::<()>::builder("triage")
            .instructions("Route the user.")
            .handoff(Handoff::to(spanish))
            .build()
            .expect("agent"),
    );

    let client = ScriptedClient::with_completions(vec![
        response(
            vec![Item::function_call(
                "c1",
                "handoff_to_spanish_agent",
                r#"{"input":"hola"}"#,
            )],
            Usage::new(8, 2, 10),
        ),
        response(
            vec![Item::Text {
                text: "¡Hola! ¿En qué puedo ayudarte?".into(),
            }],
            Usage::new(6, 9, 15),
        ),
    ]);
    let export = Arc::new(MemoryExport::default());
    let processor = TraceProcessor::spawn_with(export, 1, Duration::from_millis(20));

    let result = Runner::run(
        triage,
        "hola",
        RunConfig::default()
            .with_client(client.clone())
            .with_trace_processor(processor),
    )
    .await
    .expect("run");

    assert_eq!(result.agent_name, "spanish_agent");
    assert_eq!(result.output, "¡Hola! ¿En qué puedo ayudarte?");
    // Usage from before the handoff carries over.
    assert_eq!(result.usage, Usage::new(14, 11, 25));
    assert!(result.trace_id.is_some());

    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    // Triage declares the synthetic handoff tool; the target agent does not.
    let triage_tools = requests[0].tools.as_ref().expect("triage tools");
    assert!(triage_tools
        .iter()
        .any(|tool| tool.name == "handoff_to_spanish_agent"));
    assert!(requests[1].tools.is_none());
    assert_eq!(
        requests[1].instructions.as_deref(),
        Some("Responde únicamente en español.")
    );
    // The target agent starts from the (unfiltered) conversation, exactly as
    // a fresh run on it would.
    assert_eq!(requests[1].input, vec![Item::user("hola")]);
}

#[tokio::test]
async fn input_guardrail_blocks_before_any_model_call() {
    struct MathOnly;

    #[async_trait]
    impl InputGuardrail for MathOnly {
        fn name(&self) -> &str {
            "math_only"
        }
        async fn validate_input(&self, input: &str, _ctx: &RunContext) -> GuardrailVerdict {
            if input.contains("math") {
                GuardrailVerdict::Pass
            } else {
                GuardrailVerdict::refuse("off topic", json!({"reason": "off_topic"}))
            }
        }
    }

    let client = ScriptedClient::with_completions(vec![response(
        vec![Item::Text {
            text: "should never be reached".into(),
        }],
        Usage::default(),
    )]);
    let agent = Arc::new(
        Agent::<()>::builder("tutor")
            .instructions("Help with math only.")
            .input_guardrail(Arc::new(MathOnly))
            .build()
            .expect("agent"),
    );

    let err = Runner::run(
        agent,
        "tell me about dogs",
        RunConfig::default().with_client(client.clone()),
    )
    .await
    .expect_err("guardrail should trip");

    let AgentError::GuardrailTriggered {
        guardrail,
        reason,
        meta,
    } = err
    else {
        panic!("wrong error kind");
    };
    assert_eq!(guardrail, "math_only");
    assert_eq!(reason, "off topic");
    assert_eq!(meta, json!({"reason": "off_topic"}));
    assert!(client.requests().is_empty(), "no model call may be made");
}

#[tokio::test]
async fn max_turns_one_fails_without_second_model_call() {
    let client = ScriptedClient::with_completions(vec![
        response(
            vec![Item::function_call("c1", "add", r#"{"a":1,"b":1}"#)],
            Usage::new(4, 4, 8),
        ),
        response(
            vec![Item::Text {
                text: "unreachable".into(),
            }],
            Usage::default(),
        ),
    ]);
    let agent = Arc::new(
        Agent::<()>::builder("looper")
            .tool(add_tool())
            .build()
            .expect("agent"),
    );

    let err = Runner::run(
        agent,
        "loop",
        RunConfig::default().with_client(client.clone()).with_max_turns(1),
    )
    .await
    .expect_err("turn limit");

    assert!(matches!(err, AgentError::MaxTurnsExceeded { turns: 1 }));
    assert_eq!(client.requests().len(), 1, "exactly one model call");
}

#[tokio::test]
async fn zero_max_turns_is_rejected() {
    let client = ScriptedClient::with_completions(vec![]);
    let agent = Arc::new(Agent::<()>::builder("any").build().expect("agent"));
    let err = Runner::run(
        agent,
        "hi",
        RunConfig::default().with_client(client).with_max_turns(0),
    )
    .await
    .expect_err("invalid config");
    assert!(matches!(err, AgentError::InvalidConfig { .. }));
}

fn streaming_script() -> Vec<Value> {
    vec![
        json!({
            "type": "response.created",
            "response": {"id": "resp_s1", "model": "gpt-4.1", "created_at": 1.0},
        }),
        json!({"type": "response.in_progress"}),
        json!({"type": "response.output_text.delta", "delta": "hi", "content_index": 0}),
        json!({
            "type": "response.completed",
            "response": {"usage": {"input_tokens": 2, "output_tokens": 1, "total_tokens": 3}},
        }),
        json!({"type": "done"}),
    ]
}

#[tokio::test]
async fn streaming_transcript_event_sequence() {
    let client = ScriptedClient::with_streams(vec![streaming_script()]);
    let agent = Arc::new(
        Agent::<()>::builder("greeter")
            .instructions("say hi")
            .build()
            .expect("agent"),
    );

    let mut run = Runner::stream(
        agent,
        "say hi",
        RunConfig::default().with_client(client),
    );

    let mut events = Vec::new();
    loop {
        match run.next_timeout(Duration::from_secs(1)).await {
            Next::Event(event) => events.push(event),
            Next::Done => break,
            Next::TimedOut => panic!("stream stalled"),
        }
    }

    assert!(matches!(
        events[0],
        StreamEvent::ResponseCreated { ref response_id, .. } if response_id == "resp_s1"
    ));
    assert!(matches!(
        events[1],
        StreamEvent::TextDelta { ref text, .. } if text == "hi"
    ));
    assert!(matches!(
        events[2],
        StreamEvent::ResponseCompleted { usage, .. } if !usage.is_zero()
    ));
    assert_eq!(events[3], StreamEvent::StreamComplete);
    assert_eq!(events.len(), 4, "in_progress frames stay suppressed");
}

#[tokio::test]
async fn streamed_deltas_concatenate_to_the_sync_output() {
    // Same reply, once as a stream of deltas and once as a single body.
    let streaming = ScriptedClient::with_streams(vec![vec![
        json!({"type": "response.created", "response": {"id": "r", "model": "m"}}),
        json!({"type": "response.output_text.delta", "delta": "The answer", "content_index": 0}),
        json!({"type": "response.output_text.delta", "delta": " is 42.", "content_index": 0}),
        json!({
            "type": "response.completed",
            "response": {"usage": {"input_tokens": 1, "output_tokens": 1, "total_tokens": 2}},
        }),
        json!({"type": "done"}),
    ]]);
    let sync = ScriptedClient::with_completions(vec![response(
        vec![Item::Text {
            text: "The answer is 42.".into(),
        }],
        Usage::new(1, 1, 2),
    )]);

    let agent = Arc::new(Agent::<()>::builder("oracle").build().expect("agent"));

    let streamed = Runner::stream(
        Arc::clone(&agent),
        "question",
        RunConfig::default().with_client(streaming),
    )
    .result()
    .await
    .expect("streamed run");
    let direct = Runner::run(agent, "question", RunConfig::default().with_client(sync))
        .await
        .expect("sync run");

    assert_eq!(streamed.output, direct.output);
}

#[tokio::test]
async fn streaming_tool_calls_execute_locally_then_follow_up() {
    // Turn 1 streams a completed function call; the engine must still run
    // the tool itself and drive a second streamed turn into the same buffer.
    let turn_one = vec![
        json!({"type": "response.created", "response": {"id": "r1", "model": "m"}}),
        json!({
            "type": "response.output_item.added",
            "item": {"type": "function_call", "id": "c1", "name": "add", "arguments": ""},
        }),
        json!({
            "type": "response.function_call_arguments.delta",
            "item_id": "c1",
            "delta": "{\"a\":2,\"b\":3}",
            "output_index": 0,
        }),
        json!({"type": "response.function_call_arguments.done", "item_id": "c1"}),
        json!({
            "type": "response.completed",
            "response": {"usage": {"input_tokens": 5, "output_tokens": 3, "total_tokens": 8}},
        }),
        json!({"type": "done"}),
    ];
    let turn_two = vec![
        json!({"type": "response.created", "response": {"id": "r2", "model": "m"}}),
        json!({"type": "response.output_text.delta", "delta": "The sum is 5.", "content_index": 0}),
        json!({
            "type": "response.completed",
            "response": {"usage": {"input_tokens": 9, "output_tokens": 4, "total_tokens": 13}},
        }),
        json!({"type": "done"}),
    ];
    let client = ScriptedClient::with_streams(vec![turn_one, turn_two]);
    let agent = Arc::new(
        Agent::<()>::builder("calculator")
            .tool(add_tool())
            .build()
            .expect("agent"),
    );

    let run = Runner::stream(
        agent,
        "what is 2+3?",
        RunConfig::default().with_client(client.clone()),
    );
    let result = run.result().await.expect("streamed tool run");

    assert_eq!(result.output, "The sum is 5.");
    assert_eq!(result.usage, Usage::new(14, 7, 21));

    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].input.iter().any(|item| matches!(
        item,
        Item::FunctionCallOutput { call_id, output } if call_id == "c1" && output == r#"{"sum":5}"#
    )));
}

#[tokio::test]
async fn run_async_handle_resolves() {
    let client = ScriptedClient::with_completions(vec![response(
        vec![Item::Text { text: "ok".into() }],
        Usage::new(1, 1, 2),
    )]);
    let agent = Arc::new(Agent::<()>::builder("bg").build().expect("agent"));

    let handle = Runner::run_async(agent, "hi", RunConfig::default().with_client(client));
    let result = handle.join().await.expect("async run");
    assert_eq!(result.output, "ok");
}

#[tokio::test]
async fn unexpected_response_aborts() {
    let client = ScriptedClient::with_completions(vec![response(vec![], Usage::default())]);
    let agent = Arc::new(Agent::<()>::builder("confused").build().expect("agent"));
    let err = Runner::run(agent, "hi", RunConfig::default().with_client(client))
        .await
        .expect_err("no actionable items");
    assert!(matches!(err, AgentError::UnexpectedResponse(_)));
}

#[tokio::test]
async fn unknown_handoff_target_is_fatal() {
    let client = ScriptedClient::with_completions(vec![response(
        vec![Item::function_call("c1", "handoff_to_ghost", "{}")],
        Usage::default(),
    )]);
    let agent = Arc::new(Agent::<()>::builder("router").build().expect("agent"));
    let err = Runner::run(agent, "hi", RunConfig::default().with_client(client))
        .await
        .expect_err("unknown target");
    assert!(matches!(err, AgentError::Handoff(_)));
}
