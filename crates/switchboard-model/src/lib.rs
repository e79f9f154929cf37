//! Wire-level adapter for the Responses endpoint.
//!
//! [`ResponsesClient`] serialises a [`Request`], POSTs it, and returns either
//! a normalised [`ModelResponse`] or a lazy sequence of raw wire events
//! (Server-Sent Events, one JSON object per frame). The runner consumes wire
//! events through [`normalise::normalise_event`].

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use switchboard_core::Result;

pub mod client;
pub mod normalise;
pub mod sse;
pub mod types;

pub use client::ResponsesClient;
pub use normalise::{normalise_event, ResponseAccumulator};
pub use types::{
    FunctionSpec, ModelResponse, NamedTool, Request, TextFormat, TextOptions, ToolChoice, ToolSpec,
};

/// Raw wire events as parsed from the SSE body; the `[DONE]` sentinel is
/// rewritten to `{"type":"done"}`.
pub type WireEventStream = Pin<Box<dyn Stream<Item = Result<serde_json::Value>> + Send>>;

/// The model endpoint as the engine sees it.
///
/// The HTTP implementation is [`ResponsesClient`]; tests substitute scripted
/// clients that replay recorded fixtures.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Single POST; blocks until the full response body is parsed.
    async fn create_completion(&self, request: &Request) -> Result<ModelResponse>;

    /// POST with `stream=true`; resolves once headers arrive, then yields
    /// wire events as the body streams in.
    async fn create_stream(&self, request: &Request) -> Result<WireEventStream>;
}
