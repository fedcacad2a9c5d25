/// SSE (Server-Sent Events) line parser.
///
/// Handles the low-level parsing of SSE frames from text, including
/// buffering partial lines and handling field semantics per the
/// [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html).
use memchr::memchr_iter;

/// Payload the completion API sends as its final frame.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A parsed SSE frame from the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// Incremental SSE line parser.
///
/// Feed it text chunks (potentially split at arbitrary boundaries) and it
/// yields fully-assembled [`SseEvent`] frames once their blank-line
/// terminator has been seen.
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
    last_event_id: Option<String>,
    retry: Option<u64>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            event_type: None,
            data_buffer: String::new(),
            has_data: false,
            last_event_id: None,
            retry: None,
        }
    }

    /// Feed raw text and return any complete events parsed.
    ///
    /// - `event:` sets the event type for the next frame
    /// - `data:` appends to the data buffer (one leading space stripped);
    ///   repeated `data:` lines are joined with `\n`
    /// - an empty line terminates the frame
    /// - `:` starts a comment (keep-alive) line, ignored
    /// - `id:` sets the last event ID, `retry:` the reconnection delay
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = &buffer[processed_up_to..line_end];
            self.process_line(line.strip_suffix('\r').unwrap_or(line), out);
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == buffer.len() {
            buffer.clear();
            self.read_offset = 0;
        } else {
            let should_compact = self.read_offset > 0
                && (self.read_offset >= buffer.len() / 2 || self.read_offset >= 8 * 1024);
            if should_compact {
                buffer.drain(..self.read_offset);
                self.read_offset = 0;
            }
        }
        self.buffer = buffer;
    }

    /// Bytes of an incomplete line still waiting for its terminator.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() - self.read_offset
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if self.has_data {
                events.push(SseEvent {
                    event: self.event_type.take(),
                    data: std::mem::take(&mut self.data_buffer),
                    id: self.last_event_id.clone(),
                    retry: self.retry,
                });
                self.has_data = false;
            } else {
                self.event_type = None;
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.data_buffer.push('\n');
                } else {
                    self.has_data = true;
                }
                self.data_buffer.push_str(value);
            }
            "event" => self.event_type = Some(value.to_string()),
            "id" => self.last_event_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.trim().parse::<u64>() {
                    self.retry = Some(ms);
                }
            }
            // Unknown field names are ignored
            _ => {}
        }
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if an [`SseEvent`] is the terminal `[DONE]` event.
#[must_use]
pub fn is_done_event(event: &SseEvent) -> bool {
    event.data.trim() == DONE_SENTINEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_data_frame() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: hello world\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello world");
        assert!(events[0].event.is_none());
    }

    #[test]
    fn test_parse_named_event() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: completion\ndata: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("completion"));
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn test_event_type_does_not_leak_into_next_frame() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: first\ndata: a\n\ndata: b\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("first"));
        assert!(events[1].event.is_none());
    }

    #[test]
    fn test_parse_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: line1\ndata: line2\ndata: line3\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2\nline3");
    }

    #[test]
    fn test_parse_ignores_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(": keep-alive\n\n: another\ndata: hello\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn test_parse_incremental_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: hel").is_empty());
        assert_eq!(parser.buffered_len(), 9);
        assert!(parser.feed("lo\n").is_empty());
        let events = parser.feed("\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn test_parse_crlf_line_endings() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: hello\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn test_parse_data_no_space_after_colon() {
        let mut parser = SseParser::new();
        let events = parser.feed("data:nospace\n\n");
        assert_eq!(events[0].data, "nospace");
    }

    #[test]
    fn test_parse_data_keeps_colons_in_value() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: {\"k\":\"v:w\"}\n\n");
        assert_eq!(events[0].data, "{\"k\":\"v:w\"}");
    }

    #[test]
    fn test_parse_id_and_retry_fields() {
        let mut parser = SseParser::new();
        let events = parser.feed("id: 42\nretry: 1500\ndata: hello\n\n");
        assert_eq!(events[0].id.as_deref(), Some("42"));
        assert_eq!(events[0].retry, Some(1500));
    }

    #[test]
    fn test_empty_lines_without_data_dont_emit() {
        let mut parser = SseParser::new();
        assert!(parser.feed("\n\n\n").is_empty());
    }

    #[test]
    fn test_done_detection() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: [DONE]\n\ndata:  [DONE] \n\ndata: {}\n\n");
        assert!(is_done_event(&events[0]));
        assert!(is_done_event(&events[1]));
        assert!(!is_done_event(&events[2]));
    }

    #[test]
    fn test_parse_openai_sequence() {
        let mut parser = SseParser::new();
        let input = "\
data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\
\n\
data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\
\n\
data: [DONE]\n\
\n";
        let events = parser.feed(input);
        assert_eq!(events.len(), 3);
        assert!(is_done_event(&events[2]));
    }

    #[test]
    fn test_feed_into_appends_without_clearing_output() {
        let mut parser = SseParser::new();
        let mut out = vec![SseEvent {
            data: "seed".to_string(),
            ..SseEvent::default()
        }];
        parser.feed_into("data: a\n\n", &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].data, "seed");
        assert_eq!(out[1].data, "a");
    }

    #[test]
    fn test_long_partial_line_survives_compaction() {
        let mut parser = SseParser::new();
        let filler = "x".repeat(10_000);
        assert!(parser.feed(&format!("data: a\n\ndata: {filler}")).len() == 1);
        let events = parser.feed("\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.len(), 10_000);
    }
}
