//! Server-Sent-Events framing.
//!
//! A push-based line parser: feed body chunks in, take completed frames out.
//! `data:` lines accumulate until a blank line dispatches the frame; comment
//! lines (leading `:`) and unknown fields are ignored.

use std::collections::VecDeque;

use futures::Stream;
use tokio_stream::StreamExt;

use switchboard_core::{AgentError, Result};

/// One dispatched SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental parser state. Bytes may split anywhere, including inside a
/// UTF-8 sequence or a field name; the parser buffers across pushes.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    ready: VecDeque<SseFrame>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the response body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        // Only decode up to the last complete UTF-8 boundary.
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                self.buffer.push_str(text);
                self.pending.clear();
            }
            Err(err) => {
                let valid = err.valid_up_to();
                if valid > 0 {
                    let text = std::str::from_utf8(&self.pending[..valid])
                        .unwrap_or_default()
                        .to_string();
                    self.buffer.push_str(&text);
                    self.pending.drain(..valid);
                }
            }
        }
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=pos);
            self.take_line(&line);
        }
    }

    /// Dispatch any frame still buffered when the body ends mid-frame.
    pub fn finish(&mut self) {
        self.dispatch();
    }

    pub fn next_frame(&mut self) -> Option<SseFrame> {
        self.ready.pop_front()
    }

    fn take_line(&mut self, line: &str) {
        if line.is_empty() {
            self.dispatch();
            return;
        }
        if line.starts_with(':') {
            return;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        } else if let Some(value) = line.strip_prefix("event:") {
            self.event = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            self.id = Some(value.trim_start().to_string());
        }
    }

    fn dispatch(&mut self) {
        if self.data.is_empty() {
            self.event = None;
            return;
        }
        self.ready.push_back(SseFrame {
            event: self.event.take(),
            data: self.data.join("\n"),
            id: self.id.take(),
        });
        self.data.clear();
    }
}

/// Adapt a byte stream (a `reqwest` body) into a stream of SSE frames.
pub fn frame_stream<S>(body: S) -> impl Stream<Item = Result<SseFrame>>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    futures::stream::unfold(
        (SseParser::new(), body, false),
        |(mut parser, mut body, mut done)| async move {
            loop {
                if let Some(frame) = parser.next_frame() {
                    return Some((Ok(frame), (parser, body, done)));
                }
                if done {
                    return None;
                }
                match body.next().await {
                    Some(Ok(chunk)) => parser.push(&chunk),
                    Some(Err(err)) => {
                        return Some((
                            Err(AgentError::Network(err.to_string())),
                            (parser, body, done),
                        ));
                    }
                    None => {
                        parser.finish();
                        done = true;
                    }
                }
            }
        },
    )
}
