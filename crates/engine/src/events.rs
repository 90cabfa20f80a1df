//! The turn event channel.
//!
//! Producers never block: events go into a bounded broadcast channel
//! (capacity 16) and a slow subscriber loses the oldest events rather than
//! stalling the engine loop.

use tokio::sync::broadcast;

use wick_domain::stream::StreamEvent;

/// Channel capacity before the oldest events are dropped.
pub const EVENT_BUFFER: usize = 16;

#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventSink {
    pub fn new() -> (Self, broadcast::Receiver<StreamEvent>) {
        let (tx, rx) = broadcast::channel(EVENT_BUFFER);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Never blocks; events without a live subscriber are
    /// discarded.
    pub fn emit(&self, event: StreamEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscriber_in_order() {
        let (sink, mut rx) = EventSink::new();
        sink.emit(StreamEvent::Error { error: "one".into() });
        sink.emit(StreamEvent::Error { error: "two".into() });

        match rx.recv().await.unwrap() {
            StreamEvent::Error { error } => assert_eq!(error, "one"),
            other => panic!("unexpected event {other:?}"),
        }
        match rx.recv().await.unwrap() {
            StreamEvent::Error { error } => assert_eq!(error, "two"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let (sink, mut rx) = EventSink::new();
        for i in 0..EVENT_BUFFER + 4 {
            sink.emit(StreamEvent::Error { error: i.to_string() });
        }

        // The lag error reports how many events were lost.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert_eq!(n, 4),
            other => panic!("expected lag, got {other:?}"),
        }
        // The next received event is the oldest survivor.
        match rx.recv().await.unwrap() {
            StreamEvent::Error { error } => assert_eq!(error, "4"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscriber_is_silent() {
        let (sink, rx) = EventSink::new();
        drop(rx);
        sink.emit(StreamEvent::Error { error: "ignored".into() });
    }
}
