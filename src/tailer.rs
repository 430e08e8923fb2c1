//! Incremental reader for an append-only JSONL activity log.
//!
//! A [`LogCursor`] remembers how many bytes of the log have been consumed.
//! Each poll reads only what was appended since, turns complete lines into
//! [`Event`]s and keeps a trailing partial line buffered until its newline
//! arrives. The cursor lives in memory only.

use crate::config::StartAt;
use crate::event::Event;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Errors that stop a single poll. The next poll retries from the same cursor.
#[derive(Debug)]
pub enum TailError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for TailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TailError::Io { path, source } => {
                write!(f, "failed to read log {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for TailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TailError::Io { source, .. } => Some(source),
        }
    }
}

/// Identity of the file behind a path, used to notice replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_meta: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

/// Read position in the log.
#[derive(Debug, Clone)]
pub struct LogCursor {
    path: PathBuf,
    /// Bytes consumed from the file, including any buffered partial line.
    offset: u64,
    /// Bytes after the last newline, waiting for the rest of their line.
    partial: Vec<u8>,
    identity: Option<FileIdentity>,
    next_seq: u64,
}

impl LogCursor {
    /// Position a cursor on `path`. With [`StartAt::End`] existing content is
    /// skipped; a missing file starts at zero either way.
    pub fn open(path: impl Into<PathBuf>, start_at: StartAt) -> Self {
        let path = path.into();
        let (offset, identity) = match (start_at, std::fs::metadata(&path)) {
            (StartAt::End, Ok(meta)) => (meta.len(), FileIdentity::of(&meta)),
            (StartAt::Beginning, Ok(meta)) => (0, FileIdentity::of(&meta)),
            (_, Err(_)) => (0, None),
        };
        debug!(path = %path.display(), offset, "log cursor opened");
        Self {
            path,
            offset,
            partial: Vec::new(),
            identity,
            next_seq: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of the log consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Return the events appended since this cursor and the cursor positioned
    /// after them. `self` is left untouched, so polling the same cursor twice
    /// over an unchanged file yields the same events both times.
    pub fn poll(&self) -> Result<(Vec<Event>, LogCursor), TailError> {
        let mut next = self.clone();
        let events = next.advance()?;
        Ok((events, next))
    }

    /// Read everything appended since the last call and move past it.
    pub fn advance(&mut self) -> Result<Vec<Event>, TailError> {
        let meta = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        let len = meta.len();
        let identity = FileIdentity::of(&meta);
        let replaced = matches!((self.identity, identity), (Some(old), Some(new)) if old != new);
        if len < self.offset || replaced {
            warn!(
                path = %self.path.display(),
                previous_offset = self.offset,
                len,
                replaced,
                "log truncated or replaced; rereading from the start"
            );
            self.offset = 0;
            self.partial.clear();
        }
        self.identity = identity;

        if len == self.offset {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path).map_err(|e| self.io_error(e))?;
        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| self.io_error(e))?;
        let mut appended = Vec::new();
        file.take(len - self.offset)
            .read_to_end(&mut appended)
            .map_err(|e| self.io_error(e))?;

        let base = self.offset - self.partial.len() as u64;
        self.offset += appended.len() as u64;

        let mut data = std::mem::take(&mut self.partial);
        data.extend_from_slice(&appended);
        let events = self.split_lines(&data, base);
        Ok(events)
    }

    /// Parse every complete line in `data` (which starts at file offset
    /// `base`) and keep the unterminated remainder as the new partial line.
    fn split_lines(&mut self, data: &[u8], base: u64) -> Vec<Event> {
        let mut events = Vec::new();
        let mut start = 0usize;

        for (idx, b) in data.iter().enumerate() {
            if *b != b'\n' {
                continue;
            }
            let line_offset = base + start as u64;
            let raw = &data[start..idx];
            start = idx + 1;

            let line = match std::str::from_utf8(raw) {
                Ok(s) => s.trim(),
                Err(e) => {
                    warn!(path = %self.path.display(), offset = line_offset, error = %e, "skipping non-UTF-8 log line");
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            match Event::parse_line(line, self.next_seq, line_offset) {
                Ok(event) => {
                    self.next_seq += 1;
                    events.push(event);
                }
                Err(e) => {
                    // Avoid logging the line itself; it may hold user content.
                    warn!(path = %self.path.display(), offset = line_offset, error = %e, "skipping malformed log line");
                }
            }
        }

        self.partial = data[start..].to_vec();
        events
    }

    fn io_error(&self, source: std::io::Error) -> TailError {
        TailError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn record(content: &str) -> String {
        format!(r#"{{"content":"{content}","timestamp":1700000000000}}"#)
    }

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    fn contents(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.content.as_str()).collect()
    }

    #[test]
    fn reads_appended_lines_from_beginning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        append(&path, &format!("{}\n{}\n", record("one"), record("two")));

        let cursor = LogCursor::open(&path, StartAt::Beginning);
        let (events, cursor) = cursor.poll().unwrap();
        assert_eq!(contents(&events), vec!["one", "two"]);
        assert_eq!(events[0].seq, 0);
        assert_eq!(events[1].seq, 1);
        assert_eq!(events[0].offset, 0);
        assert_eq!(events[1].offset, record("one").len() as u64 + 1);
        assert_eq!(cursor.offset(), std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn start_at_end_skips_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        append(&path, &format!("{}\n", record("old")));

        let mut cursor = LogCursor::open(&path, StartAt::End);
        assert!(cursor.advance().unwrap().is_empty());

        append(&path, &format!("{}\n", record("new")));
        assert_eq!(contents(&cursor.advance().unwrap()), vec!["new"]);
    }

    #[test]
    fn same_cursor_over_unchanged_file_yields_nothing_new() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        append(&path, &format!("{}\n{}\n{}\n", record("a"), record("b"), record("c")));

        let start = LogCursor::open(&path, StartAt::Beginning);
        let (events, after) = start.poll().unwrap();
        assert_eq!(events.len(), 3);

        let (again, after_again) = after.poll().unwrap();
        assert!(again.is_empty());
        assert_eq!(after_again.offset(), after.offset());
    }

    #[test]
    fn partial_line_is_buffered_until_complete() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        let line = record("split");
        let (head, tail) = line.split_at(10);
        append(&path, head);

        let mut cursor = LogCursor::open(&path, StartAt::Beginning);
        assert!(cursor.advance().unwrap().is_empty());

        append(&path, &format!("{tail}\n"));
        let events = cursor.advance().unwrap();
        assert_eq!(contents(&events), vec!["split"]);
        assert_eq!(events[0].offset, 0);
    }

    #[test]
    fn malformed_lines_are_skipped_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        append(
            &path,
            &format!(
                "{}\nnot json\n\n{{\"content\":\"no timestamp\"}}\n{}\n",
                record("first"),
                record("second")
            ),
        );

        let mut cursor = LogCursor::open(&path, StartAt::Beginning);
        let events = cursor.advance().unwrap();
        assert_eq!(contents(&events), vec!["first", "second"]);
        assert_eq!(events[1].seq, 1);
    }

    #[test]
    fn invalid_utf8_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        let mut bytes = vec![0xff, 0xfe, b'\n'];
        bytes.extend_from_slice(format!("{}\n", record("fine")).as_bytes());
        std::fs::write(&path, bytes).unwrap();

        let mut cursor = LogCursor::open(&path, StartAt::Beginning);
        assert_eq!(contents(&cursor.advance().unwrap()), vec!["fine"]);
    }

    #[test]
    fn truncation_resets_to_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        append(&path, &format!("{}\n{}\n", record("long-one"), record("long-two")));

        let mut cursor = LogCursor::open(&path, StartAt::Beginning);
        assert_eq!(cursor.advance().unwrap().len(), 2);

        std::fs::write(&path, format!("{}\n", record("x"))).unwrap();
        let events = cursor.advance().unwrap();
        assert_eq!(contents(&events), vec!["x"]);
        assert_eq!(events[0].offset, 0);
        // seq keeps counting across the reset
        assert_eq!(events[0].seq, 2);
    }

    #[cfg(unix)]
    #[test]
    fn replaced_file_is_reread() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        append(&path, &format!("{}\n", record("before")));

        let mut cursor = LogCursor::open(&path, StartAt::Beginning);
        assert_eq!(cursor.advance().unwrap().len(), 1);

        // Same length, different inode.
        let replacement = dir.path().join("rotated.jsonl");
        append(&replacement, &format!("{}\n", record("after!")));
        std::fs::rename(&replacement, &path).unwrap();

        assert_eq!(contents(&cursor.advance().unwrap()), vec!["after!"]);
    }

    #[test]
    fn missing_file_yields_nothing_until_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("later.jsonl");

        let mut cursor = LogCursor::open(&path, StartAt::End);
        assert!(cursor.advance().unwrap().is_empty());

        append(&path, &format!("{}\n", record("hello")));
        assert_eq!(contents(&cursor.advance().unwrap()), vec!["hello"]);
    }

    #[test]
    fn crlf_lines_are_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        append(&path, &format!("{}\r\n", record("windows")));

        let mut cursor = LogCursor::open(&path, StartAt::Beginning);
        assert_eq!(contents(&cursor.advance().unwrap()), vec!["windows"]);
    }
}
