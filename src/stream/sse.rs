//! SSE frame parsing and encoding (spec §4.6 "Parsing"/"Encoding").
//!
//! An incremental line parser fed arbitrary byte chunks, following the
//! WHATWG SSE field semantics: `data:`/`event:`/`id:`/`retry:` fields
//! accumulate until a blank line dispatches one event; `:`-prefixed lines
//! are comments.

use memchr::memchr_iter;

/// A single parsed SSE event.
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental SSE line parser. Feed it raw text chunks and it yields
/// fully-assembled [`SseEvent`] frames.
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
    last_event_id: Option<String>,
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
        }
    }

    /// Feed raw text and return any complete events parsed.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        for rel_pos in memchr_iter(b'\n', &bytes[processed_up_to..]) {
            let line_end = processed_up_to + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            self.process_line(line, &mut out);
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
        } else if self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024 {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
        out
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if self.has_data {
                out.push(SseEvent {
                    event: self.event_type.take(),
                    data: std::mem::take(&mut self.data_buffer),
                    id: self.last_event_id.clone(),
                });
                self.has_data = false;
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if self.has_data {
                self.data_buffer.push('\n');
            } else {
                self.has_data = true;
            }
            self.data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.event_type = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.last_event_id = Some(value.to_string());
        }
        // `retry:` and unrecognized fields are ignored; this relay never
        // needs to instruct the client to change its reconnect delay.
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a canonical SSE frame (spec §4.6 "Encoding":
/// `event: <type>\ndata: <json>\n\n`).
#[must_use]
pub fn encode_sse_event(event_type: &str, data: &serde_json::Value) -> String {
    format!("event: {event_type}\ndata: {data}\n\n")
}

/// `true` if this raw SSE data payload is the OpenAI-dialect terminal
/// sentinel (`data: [DONE]`).
#[must_use]
pub fn is_done_sentinel(data: &str) -> bool {
    data.trim() == "[DONE]"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_event_across_two_feeds() {
        let mut parser = SseParser::new();
        assert!(parser.feed("event: message_start\ndata: {\"a\":1").is_empty());
        let events = parser.feed("}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn ignores_comment_lines() {
        let mut parser = SseParser::new();
        let events = parser.feed(": keep-alive\ndata: hi\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hi");
    }

    #[test]
    fn multiple_data_lines_join_with_newline() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: line1\ndata: line2\n\n");
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn detects_done_sentinel() {
        assert!(is_done_sentinel("[DONE]"));
        assert!(!is_done_sentinel("{\"foo\":1}"));
    }

    #[test]
    fn handles_multiple_events_in_one_feed() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: one\n\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].data, "two");
    }
}
