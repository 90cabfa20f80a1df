//! In-memory span accumulation for traced turns.

use std::collections::HashMap;

use parking_lot::RwLock;

use wick_domain::trace::TraceSpan;

/// Spans kept per thread before the oldest are dropped.
const MAX_SPANS_PER_THREAD: usize = 1024;

#[derive(Default)]
pub struct TraceRecorder {
    spans: RwLock<HashMap<String, Vec<TraceSpan>>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, thread_id: &str, span: TraceSpan) {
        let mut spans = self.spans.write();
        let entry = spans.entry(thread_id.to_string()).or_default();
        if entry.len() >= MAX_SPANS_PER_THREAD {
            entry.remove(0);
        }
        entry.push(span);
    }

    /// All spans recorded for a thread, in arrival order.
    pub fn query(&self, thread_id: &str) -> Vec<TraceSpan> {
        self.spans.read().get(thread_id).cloned().unwrap_or_default()
    }

    pub fn clear(&self, thread_id: &str) {
        self.spans.write().remove(thread_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wick_domain::trace::SpanKind;

    #[test]
    fn record_and_query() {
        let recorder = TraceRecorder::new();
        let mut span = TraceSpan::start("llm", SpanKind::Model, None);
        span.finish();
        recorder.record("t1", span);

        let spans = recorder.query("t1");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "llm");
        assert!(recorder.query("other").is_empty());
    }

    #[test]
    fn clear_removes_thread() {
        let recorder = TraceRecorder::new();
        recorder.record("t1", TraceSpan::start("x", SpanKind::Tool, None));
        recorder.clear("t1");
        assert!(recorder.query("t1").is_empty());
    }

    #[test]
    fn cap_drops_oldest() {
        let recorder = TraceRecorder::new();
        for i in 0..MAX_SPANS_PER_THREAD + 2 {
            recorder.record("t1", TraceSpan::start(format!("s{i}"), SpanKind::Hook, None));
        }
        let spans = recorder.query("t1");
        assert_eq!(spans.len(), MAX_SPANS_PER_THREAD);
        assert_eq!(spans[0].name, "s2");
    }
}
