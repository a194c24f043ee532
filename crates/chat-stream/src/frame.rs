//! Event frame parsing for line-oriented completion streams.
//!
//! Two layers live here: [`LineBuffer`] turns arbitrary byte chunks into runs
//! of complete lines, and [`FrameParser`] turns complete lines into
//! [`DeltaRecord`]s. A stream always ends in exactly one terminate record;
//! once the parser has emitted it, every later line is ignored.

use tracing::warn;

use crate::errors::StreamFailure;

/// Prefix marking server-sent-event data lines.
pub const DATA_PREFIX: &str = "data:";
/// Payload signalling a normal end of stream.
pub const TERMINATOR: &str = "[DONE]";

/// One incremental content fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    /// Text to append to the in-flight message. May be empty.
    pub content: String,
    /// Finish reason reported alongside the fragment, when present.
    pub finish_reason: Option<String>,
}

/// A parsed unit of stream data: a content fragment or a control signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaRecord {
    Delta(Delta),
    /// Explicit end-of-stream sentinel.
    TerminateNormal,
    /// Transport failure or explicit error event.
    TerminateError(StreamFailure),
}

impl DeltaRecord {
    /// Builds a content record without a finish reason.
    pub fn content(text: impl Into<String>) -> Self {
        Self::Delta(Delta {
            content: text.into(),
            finish_reason: None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Delta(_))
    }
}

/// Wire shape of one streamed completion chunk.
#[derive(Debug, serde::Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, serde::Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

impl ChunkPayload {
    fn into_delta(self) -> Delta {
        let Some(choice) = self.choices.into_iter().next() else {
            return Delta::default();
        };
        Delta {
            content: choice.delta.and_then(|d| d.content).unwrap_or_default(),
            finish_reason: choice.finish_reason,
        }
    }
}

/// Decodes complete stream lines into delta records.
#[derive(Debug, Default)]
pub struct FrameParser {
    finished: bool,
    skipped: u64,
    error_event: bool,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a lazy iterator over the records in a chunk of complete lines.
    ///
    /// Iteration stops at the first terminate record.
    pub fn parse_chunk<'p, 'c>(&'p mut self, chunk: &'c str) -> Frames<'p, 'c> {
        Frames {
            parser: self,
            lines: chunk.lines(),
        }
    }

    /// Decodes one line. Returns `None` for lines that carry no record.
    pub fn parse_line(&mut self, line: &str) -> Option<DeltaRecord> {
        if self.finished {
            return None;
        }
        let line = line.trim();
        if line.is_empty() {
            // a blank line dispatches the event; its type does not carry over
            self.error_event = false;
            return None;
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(name) = line.strip_prefix("event:") {
            self.error_event = name.trim() == "error";
            return None;
        }
        if line.starts_with("id:") || line.starts_with("retry:") {
            return None;
        }

        let payload = line
            .strip_prefix(DATA_PREFIX)
            .map(str::trim_start)
            .unwrap_or(line);
        let error_event = std::mem::take(&mut self.error_event);

        if payload == TERMINATOR {
            self.finished = true;
            return Some(DeltaRecord::TerminateNormal);
        }
        if error_event {
            self.finished = true;
            return Some(DeltaRecord::TerminateError(StreamFailure::provider(
                error_message(payload),
            )));
        }

        match serde_json::from_str::<ChunkPayload>(payload) {
            Ok(chunk) => match chunk.error {
                Some(error) if !error.is_null() => {
                    self.finished = true;
                    Some(DeltaRecord::TerminateError(StreamFailure::provider(
                        error_value_message(&error).unwrap_or_else(|| error.to_string()),
                    )))
                }
                _ => Some(DeltaRecord::Delta(chunk.into_delta())),
            },
            Err(err) => {
                self.skipped = self.skipped.saturating_add(1);
                warn!(error = %err, line = payload, "skipping malformed stream line");
                None
            }
        }
    }

    /// True once a terminate record has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of malformed lines skipped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

fn error_message(payload: &str) -> String {
    serde_json::from_str::<serde_json::Value>(payload)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(error_value_message)
                .or_else(|| error_value_message(&value))
        })
        .unwrap_or_else(|| payload.to_string())
}

fn error_value_message(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(message) => Some(message.clone()),
        other => other
            .get("message")
            .and_then(|v| v.as_str())
            .map(ToOwned::to_owned),
    }
}

/// Lazy record iterator returned by [`FrameParser::parse_chunk`].
pub struct Frames<'p, 'c> {
    parser: &'p mut FrameParser,
    lines: std::str::Lines<'c>,
}

impl Iterator for Frames<'_, '_> {
    type Item = DeltaRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.parser.finished {
                return None;
            }
            let line = self.lines.next()?;
            if let Some(record) = self.parser.parse_line(line) {
                return Some(record);
            }
        }
    }
}

/// Buffers raw bytes and releases only complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Adds a chunk and returns every complete line buffered so far, newline
    /// terminated. Returns an empty string when no line is complete yet.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> String {
        self.buf.extend_from_slice(chunk);
        let Some(last_newline) = self.buf.iter().rposition(|b| *b == b'\n') else {
            return String::new();
        };
        let complete: Vec<u8> = self.buf.drain(..=last_newline).collect();
        String::from_utf8_lossy(&complete).into_owned()
    }

    /// Drains the trailing unterminated line at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.buf);
        String::from_utf8_lossy(&rest).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(content: &str) -> String {
        format!(
            "data: {}\n",
            serde_json::json!({"choices":[{"delta":{"content":content}}]})
        )
    }

    #[test]
    fn strips_data_prefix_and_discards_blank_lines() {
        let chunk = format!("\n   \n{}\n{}", data("Hi"), data(" there"));
        let mut parser = FrameParser::new();
        let records: Vec<_> = parser.parse_chunk(&chunk).collect();
        assert_eq!(
            records,
            vec![DeltaRecord::content("Hi"), DeltaRecord::content(" there")]
        );
    }

    #[test]
    fn terminator_ends_the_sequence() {
        let chunk = format!("{}data: [DONE]\n{}", data("a"), data("ignored"));
        let mut parser = FrameParser::new();
        let records: Vec<_> = parser.parse_chunk(&chunk).collect();
        assert_eq!(
            records,
            vec![DeltaRecord::content("a"), DeltaRecord::TerminateNormal]
        );
        assert!(parser.is_finished());
        assert_eq!(parser.parse_chunk(&data("later")).count(), 0);
    }

    #[test]
    fn missing_content_yields_empty_delta_with_finish_reason() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let mut parser = FrameParser::new();
        assert_eq!(
            parser.parse_line(line),
            Some(DeltaRecord::Delta(Delta {
                content: String::new(),
                finish_reason: Some("stop".into()),
            }))
        );
        assert_eq!(
            parser.parse_line(r#"data: {"id":"x"}"#),
            Some(DeltaRecord::content(""))
        );
    }

    #[test]
    fn malformed_lines_are_skipped_and_counted() {
        let chunk = format!("{}data: {{not json\n{}", data("a"), data("b"));
        let mut parser = FrameParser::new();
        let records: Vec<_> = parser.parse_chunk(&chunk).collect();
        assert_eq!(
            records,
            vec![DeltaRecord::content("a"), DeltaRecord::content("b")]
        );
        assert_eq!(parser.skipped(), 1);
        assert!(!parser.is_finished());
    }

    #[test]
    fn error_object_terminates_with_provider_failure() {
        let mut parser = FrameParser::new();
        let record = parser.parse_line(r#"data: {"error":{"message":"quota exceeded"}}"#);
        assert_eq!(
            record,
            Some(DeltaRecord::TerminateError(StreamFailure::Provider {
                message: "quota exceeded".into()
            }))
        );
        assert!(parser.is_finished());
    }

    #[test]
    fn error_event_field_marks_next_data_line_as_error() {
        let chunk = "event: error\ndata: {\"message\":\"overloaded\"}\n";
        let mut parser = FrameParser::new();
        let records: Vec<_> = parser.parse_chunk(chunk).collect();
        assert_eq!(
            records,
            vec![DeltaRecord::TerminateError(StreamFailure::Provider {
                message: "overloaded".into()
            })]
        );
    }

    #[test]
    fn error_event_type_ends_at_blank_line() {
        let chunk = format!("event: error\n\n{}", data("ok"));
        let mut parser = FrameParser::new();
        let records: Vec<_> = parser.parse_chunk(&chunk).collect();
        assert_eq!(records, vec![DeltaRecord::content("ok")]);
        assert!(!parser.is_finished());
    }

    #[test]
    fn comments_and_sse_fields_are_not_malformed() {
        let chunk = format!(": keep-alive\nid: 7\nretry: 100\nevent: message\n{}", data("x"));
        let mut parser = FrameParser::new();
        let records: Vec<_> = parser.parse_chunk(&chunk).collect();
        assert_eq!(records, vec![DeltaRecord::content("x")]);
        assert_eq!(parser.skipped(), 0);
    }

    #[test]
    fn line_buffer_holds_partial_lines_across_chunks() {
        let mut lines = LineBuffer::default();
        assert_eq!(lines.push_chunk(b"data: {\"choices\":[{\"delta\":{\"con"), "");
        let complete = lines.push_chunk(b"tent\":\"hel\"}}]}\ndata: [DO");
        let mut parser = FrameParser::new();
        let records: Vec<_> = parser.parse_chunk(&complete).collect();
        assert_eq!(records, vec![DeltaRecord::content("hel")]);
        assert!(!lines.is_empty());

        let rest = lines.push_chunk(b"NE]");
        assert_eq!(rest, "");
        let tail = lines.finish();
        assert_eq!(
            parser.parse_chunk(&tail).collect::<Vec<_>>(),
            vec![DeltaRecord::TerminateNormal]
        );
        assert!(lines.is_empty());
    }

    #[test]
    fn line_buffer_reassembles_split_utf8() {
        let line = data("héllo");
        let bytes = line.as_bytes();
        let split = line.find('é').expect("accent") + 1;
        let mut lines = LineBuffer::default();
        assert_eq!(lines.push_chunk(&bytes[..split]), "");
        let complete = lines.push_chunk(&bytes[split..]);
        let mut parser = FrameParser::new();
        assert_eq!(
            parser.parse_chunk(&complete).collect::<Vec<_>>(),
            vec![DeltaRecord::content("héllo")]
        );
    }

    #[test]
    fn crlf_lines_are_accepted() {
        let mut parser = FrameParser::new();
        let chunk = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\r\n\r\ndata: [DONE]\r\n";
        assert_eq!(
            parser.parse_chunk(chunk).collect::<Vec<_>>(),
            vec![DeltaRecord::content("a"), DeltaRecord::TerminateNormal]
        );
    }
}
