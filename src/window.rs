/// Rolling window of recent activity and the policy that decides when the
/// oracle should look at it.
use crate::config::WindowConfig;
use crate::event::Event;
use crate::question::QuestionDetector;
use std::collections::VecDeque;

/// Questions waiting for the oracle beyond this many are dropped, oldest first.
const MAX_PENDING_QUESTIONS: usize = 8;

/// Bounded FIFO of the most recent events.
#[derive(Debug)]
pub struct Window {
    events: VecDeque<Event>,
    capacity: usize,
    generation: u64,
}

/// Owned copy of the window taken when a job is dispatched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowSnapshot {
    /// Number of events ever pushed when the snapshot was taken.
    pub generation: u64,
    pub events: Vec<Event>,
}

impl WindowSnapshot {
    /// The newest event, i.e. the activity that caused the job.
    pub fn latest(&self) -> Option<&Event> {
        self.events.last()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Window {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
            generation: 0,
        }
    }

    /// Append an event, returning the one evicted to make room, if any.
    pub fn push(&mut self, event: Event) -> Option<Event> {
        self.generation += 1;
        self.events.push_back(event);
        if self.events.len() > self.capacity {
            self.events.pop_front()
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            generation: self.generation,
            events: self.events.iter().cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Phrases that suggest the agent is promising work it will never do.
#[derive(Debug, Clone)]
pub struct SuspiciousPatterns {
    phrases: Vec<String>,
}

impl SuspiciousPatterns {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| normalize(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        Self { phrases }
    }

    /// The first configured phrase contained in `text`.
    pub fn find(&self, text: &str) -> Option<&str> {
        let haystack = normalize(text);
        self.phrases
            .iter()
            .find(|p| haystack.contains(p.as_str()))
            .map(String::as_str)
    }
}

/// Lowercase and fold typographic apostrophes so "I’ll" matches "i'll".
fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerReason {
    /// Enough events arrived since the last evaluation.
    Batch,
    /// The newest event contained a suspicious phrase.
    Suspicious { phrase: String },
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerReason::Batch => f.write_str("batch"),
            TriggerReason::Suspicious { phrase } => write!(f, "suspicious phrase {phrase:?}"),
        }
    }
}

/// Work handed to the oracle. At most one is outstanding at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Evaluate {
        reason: TriggerReason,
        snapshot: WindowSnapshot,
    },
    Answer {
        question: String,
        snapshot: WindowSnapshot,
    },
}

/// Owns the window and serializes oracle work.
///
/// Callers feed every event through [`WindowManager::on_event`] and report
/// each finished job with [`WindowManager::complete`]; both return the next
/// job to run, if one is ready.
#[derive(Debug)]
pub struct WindowManager {
    window: Window,
    batch_size: usize,
    patterns: SuspiciousPatterns,
    questions: Option<QuestionDetector>,
    since_last: usize,
    in_flight: bool,
    pending_eval: Option<TriggerReason>,
    pending_questions: VecDeque<String>,
}

impl WindowManager {
    pub fn new(config: &WindowConfig, detect_questions: bool) -> Self {
        Self {
            window: Window::new(config.capacity),
            batch_size: config.batch_size,
            patterns: SuspiciousPatterns::new(&config.suspicious_patterns),
            questions: detect_questions.then(QuestionDetector::new),
            since_last: 0,
            in_flight: false,
            pending_eval: None,
            pending_questions: VecDeque::new(),
        }
    }

    pub fn on_event(&mut self, event: Event) -> Option<Job> {
        let question = self.questions.and_then(|d| d.extract(&event.content));
        let suspicious = self.patterns.find(&event.content).map(str::to_string);

        self.window.push(event);
        self.since_last += 1;

        if let Some(question) = question {
            self.enqueue_question(question);
        }

        let reason = match suspicious {
            Some(phrase) => Some(TriggerReason::Suspicious { phrase }),
            None if self.since_last >= self.batch_size => Some(TriggerReason::Batch),
            None => None,
        };
        if let Some(reason) = reason {
            self.since_last = 0;
            self.queue_evaluation(reason);
        }

        self.dispatch()
    }

    /// Mark the outstanding job finished and hand out the next queued one.
    pub fn complete(&mut self) -> Option<Job> {
        self.in_flight = false;
        self.dispatch()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn pending_questions(&self) -> usize {
        self.pending_questions.len()
    }

    fn enqueue_question(&mut self, question: String) {
        if self.pending_questions.len() == MAX_PENDING_QUESTIONS {
            if let Some(dropped) = self.pending_questions.pop_front() {
                tracing::warn!(question = %dropped, "question queue full, dropping oldest");
            }
        }
        self.pending_questions.push_back(question);
    }

    // Queued evaluations coalesce; a suspicious reason is never downgraded.
    fn queue_evaluation(&mut self, reason: TriggerReason) {
        self.pending_eval = match (self.pending_eval.take(), reason) {
            (Some(queued @ TriggerReason::Suspicious { .. }), TriggerReason::Batch) => Some(queued),
            (_, reason) => Some(reason),
        };
    }

    fn dispatch(&mut self) -> Option<Job> {
        if self.in_flight || self.window.is_empty() {
            return None;
        }

        let job = if let Some(question) = self.pending_questions.pop_front() {
            Job::Answer {
                question,
                snapshot: self.window.snapshot(),
            }
        } else if let Some(reason) = self.pending_eval.take() {
            Job::Evaluate {
                reason,
                snapshot: self.window.snapshot(),
            }
        } else {
            return None;
        };

        self.in_flight = true;
        Some(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use chrono::Utc;

    fn event(seq: u64, content: &str) -> Event {
        Event {
            seq,
            offset: seq * 100,
            kind: EventKind::Message,
            content: content.to_string(),
            timestamp: Utc::now(),
            project: None,
            session_id: None,
        }
    }

    fn manager(capacity: usize, batch_size: usize) -> WindowManager {
        let config = WindowConfig {
            capacity,
            batch_size,
            ..Default::default()
        };
        WindowManager::new(&config, true)
    }

    #[test]
    fn test_window_is_bounded_and_evicts_oldest() {
        let mut window = Window::new(10);
        let mut evicted = Vec::new();
        for seq in 0..15 {
            if let Some(old) = window.push(event(seq, "x")) {
                evicted.push(old.seq);
            }
        }
        assert_eq!(evicted, vec![0, 1, 2, 3, 4]);
        let snap = window.snapshot();
        let seqs: Vec<u64> = snap.events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (5..15).collect::<Vec<_>>());
        assert_eq!(snap.generation, 15);
    }

    #[test]
    fn test_snapshot_is_an_owned_copy() {
        let mut window = Window::new(3);
        window.push(event(0, "a"));
        let snap = window.snapshot();
        window.push(event(1, "b"));
        assert_eq!(snap.events.len(), 1);
        assert_eq!(snap.generation, 1);
        assert_eq!(snap.latest().map(|e| e.content.as_str()), Some("a"));
    }

    #[test]
    fn test_suspicious_phrase_triggers_immediately() {
        let mut wm = manager(10, 3);
        let job = wm.on_event(event(0, "I'll monitor this later")).unwrap();
        match job {
            Job::Evaluate { reason, snapshot } => {
                assert_eq!(
                    reason,
                    TriggerReason::Suspicious {
                        phrase: "i'll monitor".to_string()
                    }
                );
                assert_eq!(snapshot.events.len(), 1);
            }
            other => panic!("expected evaluation, got {other:?}"),
        }
    }

    #[test]
    fn test_typographic_apostrophe_matches() {
        let mut wm = manager(10, 3);
        let job = wm.on_event(event(0, "I\u{2019}ll check the logs"));
        assert!(matches!(
            job,
            Some(Job::Evaluate {
                reason: TriggerReason::Suspicious { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_batch_triggers_at_batch_size() {
        let mut wm = manager(10, 3);
        assert!(wm.on_event(event(0, "edit src/lib.rs")).is_none());
        assert!(wm.on_event(event(1, "run cargo fmt")).is_none());
        match wm.on_event(event(2, "commit")).unwrap() {
            Job::Evaluate { reason, snapshot } => {
                assert_eq!(reason, TriggerReason::Batch);
                assert_eq!(snapshot.generation, 3);
            }
            other => panic!("expected evaluation, got {other:?}"),
        }
    }

    #[test]
    fn test_only_one_job_in_flight_with_queued_follow_up() {
        let mut wm = manager(10, 1);
        assert!(wm.on_event(event(0, "first")).is_some());
        assert!(wm.in_flight());

        // Both trigger, neither dispatches; the suspicious reason wins.
        assert!(wm.on_event(event(1, "I will track that continuously")).is_none());
        assert!(wm.on_event(event(2, "plain")).is_none());

        let next = wm.complete().unwrap();
        match next {
            Job::Evaluate { reason, snapshot } => {
                assert!(matches!(reason, TriggerReason::Suspicious { .. }));
                assert_eq!(snapshot.generation, 3);
            }
            other => panic!("expected evaluation, got {other:?}"),
        }
        assert!(wm.in_flight());
        assert!(wm.complete().is_none());
        assert!(!wm.in_flight());
    }

    #[test]
    fn test_counter_resets_after_trigger() {
        let mut wm = manager(10, 2);
        assert!(wm.on_event(event(0, "a")).is_none());
        assert!(wm.on_event(event(1, "b")).is_some());
        wm.complete();
        assert!(wm.on_event(event(2, "c")).is_none());
        assert!(wm.on_event(event(3, "d")).is_some());
    }

    #[test]
    fn test_empty_window_never_dispatches() {
        let mut wm = manager(10, 1);
        assert!(wm.complete().is_none());
        assert!(!wm.in_flight());
        assert!(wm.window.is_empty());
    }

    #[test]
    fn test_huge_capacity_is_not_preallocated() {
        let mut wm = manager(usize::MAX, 2);
        assert!(wm.on_event(event(0, "a")).is_none());
        assert!(wm.on_event(event(1, "b")).is_some());
        assert_eq!(wm.window.snapshot().events.len(), 2);
    }

    #[test]
    fn test_questions_dispatch_before_evaluations() {
        let mut wm = manager(10, 1);
        assert!(wm.on_event(event(0, "working")).is_some());
        assert!(wm.on_event(event(1, "Should I delete the old migration?")).is_none());
        assert_eq!(wm.pending_questions(), 1);

        match wm.complete().unwrap() {
            Job::Answer { question, .. } => {
                assert_eq!(question, "Should I delete the old migration?")
            }
            other => panic!("expected answer, got {other:?}"),
        }
        assert!(matches!(wm.complete(), Some(Job::Evaluate { .. })));
    }

    #[test]
    fn test_question_queue_is_bounded() {
        let mut wm = manager(10, 100);
        wm.in_flight = true;
        for i in 0..(MAX_PENDING_QUESTIONS as u64 + 3) {
            wm.on_event(event(i, &format!("Should I do step {i}?")));
        }
        assert_eq!(wm.pending_questions(), MAX_PENDING_QUESTIONS);
        match wm.complete().unwrap() {
            Job::Answer { question, .. } => assert_eq!(question, "Should I do step 3?"),
            other => panic!("expected answer, got {other:?}"),
        }
    }

    #[test]
    fn test_questions_ignored_when_disabled() {
        let config = WindowConfig {
            batch_size: 5,
            ..Default::default()
        };
        let mut wm = WindowManager::new(&config, false);
        assert!(wm.on_event(event(0, "Should I continue?")).is_none());
        assert_eq!(wm.pending_questions(), 0);
    }
}
