//! Span types accumulated by the trace recorder during a traced turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Turn,
    Model,
    Tool,
    Hook,
}

/// One recorded span. `parent` links tool/model spans to their turn span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSpan {
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub name: String,
    pub kind: SpanKind,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl TraceSpan {
    pub fn start(name: impl Into<String>, kind: SpanKind, parent: Option<String>) -> Self {
        Self {
            span_id: uuid::Uuid::new_v4().to_string(),
            parent,
            name: name.into(),
            kind,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            data: serde_json::Value::Null,
        }
    }

    /// Close the span, computing its duration.
    pub fn finish(&mut self) {
        let ended = Utc::now();
        self.duration_ms = Some(
            ended
                .signed_duration_since(self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.ended_at = Some(ended);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_sets_duration() {
        let mut span = TraceSpan::start("llm", SpanKind::Model, None);
        assert!(span.ended_at.is_none());
        span.finish();
        assert!(span.ended_at.is_some());
        assert!(span.duration_ms.is_some());
    }

    #[test]
    fn serde_skips_open_fields() {
        let span = TraceSpan::start("exec", SpanKind::Tool, Some("t1".into()));
        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["kind"], "tool");
        assert_eq!(json["parent"], "t1");
        assert!(json.get("ended_at").is_none());
    }
}
