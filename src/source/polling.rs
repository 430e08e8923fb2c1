use super::{drain, EventSource};
use crate::config::SourceMode;
use crate::event::Event;
use crate::tailer::LogCursor;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

/// Re-reads the log on a fixed interval. Works on any filesystem.
pub struct PollingSource {
    cursor: LogCursor,
    interval: Interval,
}

impl PollingSource {
    pub fn new(cursor: LogCursor, every: Duration) -> Self {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { cursor, interval }
    }
}

impl EventSource for PollingSource {
    fn mode(&self) -> SourceMode {
        SourceMode::Polling
    }

    fn next_batch(&mut self) -> impl Future<Output = Vec<Event>> + Send {
        async move {
            loop {
                self.interval.tick().await;
                let events = drain(&mut self.cursor);
                if !events.is_empty() {
                    return events;
                }
            }
        }
    }
}
