//! Run tracing — optional spans exported to the traces ingest endpoint.
//!
//! Every API here is fire-and-forget: callers enqueue messages onto an
//! unbounded channel owned by a single background task, which batches and
//! exports finished traces. Nothing in this module can block or fail the
//! turn loop.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use switchboard_core::{config, ApiConfig};

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(5);
const EXPORT_ATTEMPTS: u32 = 3;
const EXPORT_BACKOFF_BASE: Duration = Duration::from_secs(1);

pub fn new_trace_id() -> String {
    format!("trace_{}", Uuid::new_v4().simple())
}

pub fn new_span_id() -> String {
    format!("span_{}", Uuid::new_v4().simple())
}

pub fn new_group_id() -> String {
    format!("group_{}", Uuid::new_v4().simple())
}

/// Span classification, mirrored onto the wire as `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Agent,
    Function,
    Generation,
    Response,
    Handoff,
    Guardrail,
    Tool,
    ApiRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub id: String,
    pub trace_id: String,
    #[serde(rename = "type")]
    pub kind: SpanKind,
    pub data: Value,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// One run's trace; owns its spans, transferred by value to the exporter
/// once ended.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub agent: String,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    pub spans: Vec<SpanRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Destination for finished traces.
#[async_trait]
pub trait TraceExport: Send + Sync {
    /// Deliver one batch. Implementations should return `Err` only for
    /// failures worth retrying (the worker retries with backoff).
    async fn export(&self, traces: Vec<TraceRecord>) -> anyhow::Result<()>;
}

/// POSTs batches to `<base_url>/traces/ingest`.
pub struct HttpTraceExport {
    config: ApiConfig,
    http: reqwest::Client,
}

impl HttpTraceExport {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct IngestBody {
    traces: Vec<TraceRecord>,
    exported_at: String,
}

#[async_trait]
impl TraceExport for HttpTraceExport {
    async fn export(&self, traces: Vec<TraceRecord>) -> anyhow::Result<()> {
        let body = IngestBody {
            traces,
            exported_at: chrono::Utc::now().to_rfc3339(),
        };
        let response = self
            .http
            .post(format!("{}/traces/ingest", self.config.base_url))
            .header("authorization", format!("Bearer {}", self.config.api_key))
            .header("OpenAI-Beta", "traces=v1")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            anyhow::bail!("traces ingest returned {status}");
        }
        if !status.is_success() {
            // Client errors will not improve on retry.
            warn!(%status, "Trace export rejected");
        }
        Ok(())
    }
}

enum TraceMessage {
    StartTrace(TraceRecord),
    StartSpan { trace_id: String, span: SpanRecord },
    EndSpan {
        trace_id: String,
        span_id: String,
        result: Value,
        ended_at: String,
    },
    EndTrace {
        trace_id: String,
        result: Value,
        ended_at: String,
    },
}

/// Handle to the process-wide trace worker.
pub struct TraceProcessor {
    tx: mpsc::UnboundedSender<TraceMessage>,
}

impl TraceProcessor {
    /// Spawn a worker with the default batch policy (100 traces / 5 s).
    pub fn spawn(export: Arc<dyn TraceExport>) -> Arc<Self> {
        Self::spawn_with(export, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT)
    }

    pub fn spawn_with(
        export: Arc<dyn TraceExport>,
        batch_size: usize,
        batch_timeout: Duration,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(rx, export, batch_size, batch_timeout));
        Arc::new(Self { tx })
    }

    pub fn start_trace(
        &self,
        agent: &str,
        group_id: Option<String>,
        metadata: Option<Value>,
    ) -> String {
        let trace_id = new_trace_id();
        let record = TraceRecord {
            id: trace_id.clone(),
            group_id,
            agent: agent.to_string(),
            started_at: now(),
            ended_at: None,
            spans: Vec::new(),
            metadata,
            result: None,
        };
        let _ = self.tx.send(TraceMessage::StartTrace(record));
        trace_id
    }

    pub fn record_span(&self, trace_id: &str, kind: SpanKind, data: Value) -> String {
        let span_id = new_span_id();
        let span = SpanRecord {
            id: span_id.clone(),
            trace_id: trace_id.to_string(),
            kind,
            data,
            started_at: now(),
            ended_at: None,
            result: None,
        };
        let _ = self.tx.send(TraceMessage::StartSpan {
            trace_id: trace_id.to_string(),
            span,
        });
        span_id
    }

    pub fn end_span(&self, trace_id: &str, span_id: &str, result: Value) {
        let _ = self.tx.send(TraceMessage::EndSpan {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            result,
            ended_at: now(),
        });
    }

    pub fn end_trace(&self, trace_id: &str, result: Value) {
        let _ = self.tx.send(TraceMessage::EndTrace {
            trace_id: trace_id.to_string(),
            result,
            ended_at: now(),
        });
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<TraceMessage>,
    export: Arc<dyn TraceExport>,
    batch_size: usize,
    batch_timeout: Duration,
) {
    let mut open: HashMap<String, TraceRecord> = HashMap::new();
    let mut pending: Vec<TraceRecord> = Vec::new();
    let mut ticker = tokio::time::interval(batch_timeout);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => {
                    handle(&mut open, &mut pending, message);
                    if pending.len() >= batch_size {
                        flush(&export, &mut pending).await;
                    }
                }
                None => {
                    // All processor handles dropped; drain and exit.
                    pending.extend(open.drain().map(|(_, trace)| trace));
                    flush(&export, &mut pending).await;
                    return;
                }
            },
            _ = ticker.tick() => flush(&export, &mut pending).await,
        }
    }
}

fn handle(
    open: &mut HashMap<String, TraceRecord>,
    pending: &mut Vec<TraceRecord>,
    message: TraceMessage,
) {
    match message {
        TraceMessage::StartTrace(record) => {
            open.insert(record.id.clone(), record);
        }
        TraceMessage::StartSpan { trace_id, span } => {
            if let Some(trace) = open.get_mut(&trace_id) {
                trace.spans.push(span);
            }
        }
        TraceMessage::EndSpan {
            trace_id,
            span_id,
            result,
            ended_at,
        } => {
            if let Some(span) = open
                .get_mut(&trace_id)
                .and_then(|trace| trace.spans.iter_mut().find(|span| span.id == span_id))
            {
                span.result = Some(result);
                span.ended_at = Some(ended_at);
            }
        }
        TraceMessage::EndTrace {
            trace_id,
            result,
            ended_at,
        } => {
            if let Some(mut trace) = open.remove(&trace_id) {
                trace.result = Some(result);
                trace.ended_at = Some(ended_at);
                pending.push(trace);
            }
        }
    }
}

async fn flush(export: &Arc<dyn TraceExport>, pending: &mut Vec<TraceRecord>) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    let count = batch.len();
    for attempt in 0..EXPORT_ATTEMPTS {
        match export.export(batch.clone()).await {
            Ok(()) => {
                debug!(count, "Exported trace batch");
                return;
            }
            Err(err) if attempt + 1 < EXPORT_ATTEMPTS => {
                let backoff = EXPORT_BACKOFF_BASE * 2u32.pow(attempt);
                warn!(%err, attempt, "Trace export failed, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                warn!(%err, count, "Dropping trace batch after retries");
                return;
            }
        }
    }
}

static GLOBAL: OnceLock<Option<Arc<TraceProcessor>>> = OnceLock::new();

/// The process-wide processor, spun up on first use. `None` when tracing is
/// disabled via `OPENAI_AGENTS_DISABLE_TRACING` or no API key is configured.
pub fn global() -> Option<Arc<TraceProcessor>> {
    GLOBAL
        .get_or_init(|| {
            if config::tracing_disabled() {
                return None;
            }
            let api = ApiConfig::from_env().ok()?;
            Some(TraceProcessor::spawn(Arc::new(HttpTraceExport::new(api))))
        })
        .clone()
}

/// Per-run tracing handle: a processor (or nothing) plus the run's trace id.
/// Every method is a no-op when tracing is off.
pub(crate) struct RunTracer {
    processor: Option<Arc<TraceProcessor>>,
    trace_id: Option<String>,
}

impl RunTracer {
    pub(crate) fn start(
        processor: Option<Arc<TraceProcessor>>,
        agent: &str,
        group_id: Option<String>,
        metadata: Option<Value>,
    ) -> Self {
        let trace_id = processor
            .as_ref()
            .map(|processor| processor.start_trace(agent, group_id, metadata));
        Self {
            processor,
            trace_id,
        }
    }

    pub(crate) fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub(crate) fn span(&self, kind: SpanKind, data: Value) -> Option<String> {
        match (&self.processor, &self.trace_id) {
            (Some(processor), Some(trace_id)) => {
                Some(processor.record_span(trace_id, kind, data))
            }
            _ => None,
        }
    }

    pub(crate) fn end_span(&self, span_id: Option<String>, result: Value) {
        if let (Some(processor), Some(trace_id), Some(span_id)) =
            (&self.processor, &self.trace_id, span_id)
        {
            processor.end_span(trace_id, &span_id, result);
        }
    }

    pub(crate) fn end(&self, result: Value) {
        if let (Some(processor), Some(trace_id)) = (&self.processor, &self.trace_id) {
            processor.end_trace(trace_id, result);
        }
    }
}
