pub mod polling;
pub mod reactive;

pub use polling::PollingSource;
pub use reactive::ReactiveSource;

use crate::config::SourceMode;
use crate::event::Event;
use crate::tailer::LogCursor;
use std::future::Future;

/// A stream of new log events.
///
/// The monitor only depends on this trait; whether lines are discovered by
/// polling or by filesystem notifications is invisible to it.
pub trait EventSource: Send {
    /// Which strategy this source uses (for logging).
    fn mode(&self) -> SourceMode;

    /// Wait until at least one new event is available and return all of them.
    ///
    /// Implementations must be cancel-safe: dropping the returned future
    /// must not lose events that were already read from the log.
    fn next_batch(&mut self) -> impl Future<Output = Vec<Event>> + Send;
}

/// Advance `cursor`, logging (not propagating) read failures so the caller
/// can simply try again on its next wakeup.
fn drain(cursor: &mut LogCursor) -> Vec<Event> {
    match cursor.poll() {
        Ok((events, next)) => {
            if !events.is_empty() {
                tracing::trace!(events = events.len(), offset = next.offset(), "log advanced");
            }
            *cursor = next;
            events
        }
        Err(e) => {
            tracing::warn!(error = %e, "log read failed, will retry");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StartAt;

    #[test]
    fn drain_moves_the_cursor_past_what_it_returned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let body = "{\"content\":\"one\",\"timestamp\":1}\n{\"content\":\"tw";
        std::fs::write(&path, body).unwrap();

        let mut cursor = LogCursor::open(&path, StartAt::Beginning);
        let events = drain(&mut cursor);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content, "one");
        assert_eq!(cursor.offset(), body.len() as u64);
        assert!(drain(&mut cursor).is_empty());
    }
}
