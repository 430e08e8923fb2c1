/// Structured records read from the agent's activity log.
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Tag describing what kind of activity a record represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Message,
    ToolUse,
    ToolResult,
    Other(String),
}

impl EventKind {
    fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(str::trim) {
            None | Some("") | Some("message") => EventKind::Message,
            Some("tool_use") => EventKind::ToolUse,
            Some("tool_result") => EventKind::ToolResult,
            Some(other) => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Message => "message",
            EventKind::ToolUse => "tool_use",
            EventKind::ToolResult => "tool_result",
            EventKind::Other(tag) => tag,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed log record. Never mutated after the tailer creates it.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Position in the process-wide delivery order; never reset.
    pub seq: u64,
    /// Byte offset of the record's first byte in the log file.
    pub offset: u64,
    pub kind: EventKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub project: Option<String>,
    pub session_id: Option<String>,
}

/// Wire shape of a log line. Accepts both the generic field names and the
/// ones written by Claude Code's `history.jsonl`.
#[derive(Debug, Deserialize)]
struct LogRecord {
    #[serde(default, alias = "type")]
    kind: Option<String>,
    #[serde(alias = "display")]
    content: String,
    timestamp: i64,
    #[serde(default)]
    project: Option<String>,
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
}

/// Reasons a log line could not become an [`Event`].
#[derive(Debug)]
pub enum ParseError {
    Json(serde_json::Error),
    Timestamp(i64),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Json(e) => write!(f, "invalid record: {e}"),
            ParseError::Timestamp(ms) => write!(f, "timestamp out of range: {ms}"),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Json(e) => Some(e),
            ParseError::Timestamp(_) => None,
        }
    }
}

impl Event {
    /// Parse one JSON line into an event positioned at `offset`.
    pub fn parse_line(line: &str, seq: u64, offset: u64) -> Result<Self, ParseError> {
        let record: LogRecord = serde_json::from_str(line).map_err(ParseError::Json)?;
        let timestamp = DateTime::from_timestamp_millis(record.timestamp)
            .ok_or(ParseError::Timestamp(record.timestamp))?;
        Ok(Event {
            seq,
            offset,
            kind: EventKind::from_tag(record.kind.as_deref()),
            content: record.content,
            timestamp,
            project: record.project,
            session_id: record.session_id,
        })
    }

    /// Content cut to at most `max_chars` characters, with an ellipsis when cut.
    pub fn preview(&self, max_chars: usize) -> String {
        truncate_chars(&self.content, max_chars)
    }
}

/// Cut `text` to `max_chars` characters on a char boundary, appending "..."
/// when anything was dropped.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_generic_record() {
        let line = r#"{"kind":"tool_use","content":"cargo test","timestamp":1700000000000}"#;
        let event = Event::parse_line(line, 3, 128).unwrap();
        assert_eq!(event.seq, 3);
        assert_eq!(event.offset, 128);
        assert_eq!(event.kind, EventKind::ToolUse);
        assert_eq!(event.content, "cargo test");
        assert_eq!(event.timestamp.timestamp_millis(), 1_700_000_000_000);
        assert!(event.project.is_none());
    }

    #[test]
    fn parse_claude_history_record() {
        let line = r#"{"display":"fix the failing build","pastedContents":{},"timestamp":1759000000123,"project":"/home/dev/app","sessionId":"abc-123"}"#;
        let event = Event::parse_line(line, 0, 0).unwrap();
        assert_eq!(event.kind, EventKind::Message);
        assert_eq!(event.content, "fix the failing build");
        assert_eq!(event.project.as_deref(), Some("/home/dev/app"));
        assert_eq!(event.session_id.as_deref(), Some("abc-123"));
        assert_eq!(event.timestamp.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn type_alias_sets_kind() {
        let line = r#"{"type":"tool_result","content":"ok","timestamp":1}"#;
        let event = Event::parse_line(line, 0, 0).unwrap();
        assert_eq!(event.kind, EventKind::ToolResult);
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let line = r#"{"kind":"thinking","content":"hmm","timestamp":1}"#;
        let event = Event::parse_line(line, 0, 0).unwrap();
        assert_eq!(event.kind, EventKind::Other("thinking".to_string()));
        assert_eq!(event.kind.to_string(), "thinking");
    }

    #[test]
    fn missing_content_is_an_error() {
        let err = Event::parse_line(r#"{"timestamp":1}"#, 0, 0).unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }

    #[test]
    fn missing_timestamp_is_an_error() {
        assert!(Event::parse_line(r#"{"content":"x"}"#, 0, 0).is_err());
    }

    #[test]
    fn out_of_range_timestamp_is_an_error() {
        let line = format!(r#"{{"content":"x","timestamp":{}}}"#, i64::MAX);
        let err = Event::parse_line(&line, 0, 0).unwrap_err();
        assert!(matches!(err, ParseError::Timestamp(_)));
    }

    #[test]
    fn not_json_is_an_error() {
        assert!(Event::parse_line("hello world", 0, 0).is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé...");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("exact", 5), "exact");
    }
}
