//! Stream buffer — the FIFO + completion primitive between the runner and
//! one external event consumer.
//!
//! The producer half lives inside the runner; the consumer half is handed to
//! the caller of `stream`. Completion is signalled by dropping the producer:
//! events already queued are still delivered, then the consumer sees `Done`.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;

use switchboard_core::StreamEvent;

pub(crate) const DEFAULT_CAPACITY: usize = 256;

/// Producer half. Emits block once the queue holds `capacity` undelivered
/// events, which is what back-pressures the wire stream against a slow
/// consumer.
pub(crate) struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    /// Queue one event. Returns `false` if the consumer is gone, which the
    /// runner treats as cancellation.
    pub(crate) async fn emit(&self, event: StreamEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Outcome of a single [`EventStream::next_timeout`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Event(StreamEvent),
    /// The buffer completed and drained; no further events will arrive.
    Done,
    TimedOut,
}

/// Consumer half: a single reader pulling events in emit order.
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
}

impl EventStream {
    /// Wait for the next event, up to `timeout`.
    pub async fn next_timeout(&mut self, timeout: Duration) -> Next {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(event)) => Next::Event(event),
            Ok(None) => Next::Done,
            Err(_) => Next::TimedOut,
        }
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        self.rx.poll_recv(cx)
    }
}

pub(crate) fn channel(capacity: usize) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSink { tx }, EventStream { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::TextDelta {
            text: text.into(),
            index: 0,
        }
    }

    #[tokio::test]
    async fn delivers_in_emit_order() {
        let (sink, mut stream) = channel(8);
        assert!(sink.emit(delta("a")).await);
        assert!(sink.emit(delta("b")).await);
        assert!(sink.emit(delta("c")).await);

        for expected in ["a", "b", "c"] {
            match stream.next_timeout(Duration::from_millis(50)).await {
                Next::Event(StreamEvent::TextDelta { text, .. }) => assert_eq!(text, expected),
                other => panic!("expected delta, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn empty_buffer_times_out() {
        let (_sink, mut stream) = channel(8);
        assert_eq!(
            stream.next_timeout(Duration::from_millis(10)).await,
            Next::TimedOut
        );
    }

    #[tokio::test]
    async fn pending_events_survive_completion() {
        let (sink, mut stream) = channel(8);
        assert!(sink.emit(delta("tail")).await);
        drop(sink);

        assert!(matches!(
            stream.next_timeout(Duration::from_millis(50)).await,
            Next::Event(_)
        ));
        assert_eq!(
            stream.next_timeout(Duration::from_millis(50)).await,
            Next::Done
        );
        assert_eq!(
            stream.next_timeout(Duration::from_millis(50)).await,
            Next::Done
        );
    }

    #[tokio::test]
    async fn suspended_reader_wakes_on_emit() {
        let (sink, mut stream) = channel(8);
        let reader = tokio::spawn(async move {
            stream.next_timeout(Duration::from_secs(5)).await
        });
        tokio::task::yield_now().await;
        assert!(sink.emit(delta("late")).await);
        let next = reader.await.expect("reader task");
        assert!(matches!(next, Next::Event(StreamEvent::TextDelta { .. })));
    }

    #[tokio::test]
    async fn emit_fails_after_reader_drops() {
        let (sink, stream) = channel(8);
        drop(stream);
        assert!(!sink.emit(delta("orphan")).await);
        assert!(sink.is_closed());
    }
}
