//! Shared SSE parsing for streaming HTTP responses.
//!
//! Chat-completions streams and downstream MCP servers both deliver
//! `text/event-stream` bodies: events delimited by blank lines, payloads on
//! `data:` lines. [`drain_data_lines`] pulls complete payloads out of an
//! accumulating buffer, leaving any trailing partial event for the next read.

/// Extract complete `data:` payloads from an SSE buffer.
///
/// CRLF is normalized to LF before splitting; `event:`, `id:` and `retry:`
/// lines are ignored, as are comment lines (`: keep-alive`).
pub fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    if buffer.contains('\r') {
        *buffer = buffer.replace("\r\n", "\n");
    }

    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2); // remove the \n\n delimiter

        // Multi-line data: accumulation within one event block.
        let mut data = String::new();
        for line in block.lines() {
            let line = line.trim_start();
            if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim());
            }
        }
        if !data.is_empty() {
            data_lines.push(data);
        }
    }

    data_lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_single_complete_event() {
        let mut buf = String::from("event: message\ndata: {\"hello\":\"world\"}\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["{\"hello\":\"world\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_multiple_events() {
        let mut buf = String::from("data: first\n\ndata: second\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["first", "second"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_partial_event_stays_in_buffer() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["complete"]);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn drain_normalizes_crlf() {
        let mut buf = String::from("data: payload\r\n\r\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["payload"]);
    }

    #[test]
    fn drain_accumulates_multiline_data() {
        let mut buf = String::from("data: line one\ndata: line two\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["line one\nline two"]);
    }

    #[test]
    fn drain_skips_comment_keepalives() {
        let mut buf = String::from(": keep-alive\n\ndata: real\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["real"]);
    }

    #[test]
    fn drain_done_sentinel_preserved() {
        let mut buf = String::from("data: [DONE]\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["[DONE]"]);
    }

    #[test]
    fn drain_incremental_buffering() {
        let mut buf = String::from("data: chunk1");
        assert!(drain_data_lines(&mut buf).is_empty());
        buf.push_str("\n\ndata: chunk2\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["chunk1", "chunk2"]);
        assert!(buf.is_empty());
    }
}
