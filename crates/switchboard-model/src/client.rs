//! HTTP client for the Responses endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use switchboard_core::{AgentError, ApiConfig, Result};

use crate::sse::frame_stream;
use crate::types::{ModelResponse, RawResponse, Request};
use crate::{ModelClient, WireEventStream};

const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// Talks to `POST <base_url>/responses`, in both single-shot and SSE modes.
pub struct ResponsesClient {
    config: ApiConfig,
    http: reqwest::Client,
    stream_timeout: Duration,
}

impl ResponsesClient {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
        }
    }

    /// Reuse an existing connection pool (one pool per process).
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Maximum silence between stream frames before the sequence is
    /// terminated with a network error.
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.config.base_url)
    }

    fn post(&self, request: &Request) -> reqwest::RequestBuilder {
        self.http
            .post(self.endpoint())
            .header("authorization", format!("Bearer {}", self.config.api_key))
            .json(request)
    }
}

#[async_trait]
impl ModelClient for ResponsesClient {
    async fn create_completion(&self, request: &Request) -> Result<ModelResponse> {
        debug!(model = %request.model, items = request.input.len(), "Responses request");

        let response = self
            .post(request)
            .send()
            .await
            .map_err(|err| AgentError::Network(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| AgentError::Network(err.to_string()))?;

        if !status.is_success() {
            return Err(AgentError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let raw: RawResponse =
            serde_json::from_str(&body).map_err(|err| AgentError::Decode(err.to_string()))?;
        Ok(raw.normalise())
    }

    async fn create_stream(&self, request: &Request) -> Result<WireEventStream> {
        let mut request = request.clone();
        request.stream = Some(true);

        debug!(model = %request.model, "Responses stream request");

        let response = self
            .post(&request)
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|err| AgentError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let frames = Box::pin(
            frame_stream(Box::pin(response.bytes_stream())).timeout(self.stream_timeout),
        );
        let timeout = self.stream_timeout;

        let events = futures::stream::unfold(
            (frames, false),
            move |(mut frames, terminated)| async move {
                if terminated {
                    return None;
                }
                loop {
                    match frames.next().await {
                        None => return None,
                        Some(Err(_elapsed)) => {
                            let err = AgentError::Network(format!(
                                "stream stalled for {}s",
                                timeout.as_secs()
                            ));
                            return Some((Err(err), (frames, true)));
                        }
                        Some(Ok(Err(err))) => return Some((Err(err), (frames, true))),
                        Some(Ok(Ok(frame))) => {
                            let data = frame.data.trim();
                            if data == "[DONE]" {
                                return Some((Ok(json!({"type": "done"})), (frames, false)));
                            }
                            match serde_json::from_str::<serde_json::Value>(data) {
                                Ok(event) => return Some((Ok(event), (frames, false))),
                                Err(err) => {
                                    // Malformed frames are dropped, not fatal.
                                    trace!(%err, data, "Skipping malformed SSE frame");
                                }
                            }
                        }
                    }
                }
            },
        );

        Ok(Box::pin(events))
    }
}
