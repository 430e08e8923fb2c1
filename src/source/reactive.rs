use super::{drain, EventSource};
use crate::config::SourceMode;
use crate::event::Event;
use crate::tailer::LogCursor;
use notify::event::EventKind;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::debug;

/// Re-reads the log whenever the filesystem reports a change to it.
///
/// The parent directory is watched rather than the file itself so that the
/// log being created, replaced or truncated is still noticed. A slow fallback
/// tick covers notifications the backend drops.
pub struct ReactiveSource {
    cursor: LogCursor,
    wake: Arc<Notify>,
    fallback: Interval,
    // Dropping the watcher stops notifications.
    _watcher: RecommendedWatcher,
}

impl ReactiveSource {
    /// Start watching the cursor's log. Fails when the platform watcher
    /// cannot be created or the log's directory cannot be watched; callers
    /// fall back to [`super::PollingSource`].
    pub fn new(cursor: LogCursor, fallback_every: Duration) -> Result<Self, notify::Error> {
        let wake = Arc::new(Notify::new());
        let file_name = cursor.path().file_name().map(|n| n.to_os_string());

        let cb_wake = Arc::clone(&wake);
        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                let event = match res {
                    Ok(e) => e,
                    Err(err) => {
                        debug!(error = %err, "log watcher error");
                        cb_wake.notify_one();
                        return;
                    }
                };

                // Our own reads show up as access events; waking on them would spin.
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }

                let relevant = event.paths.is_empty()
                    || matches!(event.kind, EventKind::Other)
                    || event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == file_name.as_deref());
                if relevant {
                    cb_wake.notify_one();
                }
            })?;

        let dir = watch_dir(cursor.path());
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        debug!(dir = %dir.display(), "watching log directory");

        let mut fallback = tokio::time::interval(fallback_every);
        fallback.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Self {
            cursor,
            wake,
            fallback,
            _watcher: watcher,
        })
    }
}

fn watch_dir(log: &Path) -> PathBuf {
    match log.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

impl EventSource for ReactiveSource {
    fn mode(&self) -> SourceMode {
        SourceMode::Reactive
    }

    fn next_batch(&mut self) -> impl Future<Output = Vec<Event>> + Send {
        async move {
            loop {
                tokio::select! {
                    _ = self.wake.notified() => {}
                    _ = self.fallback.tick() => {}
                }
                let events = drain(&mut self.cursor);
                if !events.is_empty() {
                    return events;
                }
            }
        }
    }
}
