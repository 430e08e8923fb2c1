/// Question detection: spot agent output that is waiting on the user.
///
/// Looks for patterns like:
/// - Direct asks: `Should I ...`, `Would you like ...`, `Please confirm ...`
/// - Choices: `... or ...?`, `... prefer ...?`
/// - Any line ending in `?`
///
/// Lines that read like the agent thinking aloud (`What is ...`, `Why does ...`,
/// `Let me check ...`) disqualify the text.
use regex::Regex;
use std::sync::LazyLock;

/// Patterns that indicate the agent is asking for input.
static QUESTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?im)\?$").unwrap(),
        Regex::new(r"(?im)^Should I\b").unwrap(),
        Regex::new(r"(?im)^Which\b").unwrap(),
        Regex::new(r"(?im)^Do you want").unwrap(),
        Regex::new(r"(?im)^Would you like").unwrap(),
        Regex::new(r"(?im)^Can I\b").unwrap(),
        Regex::new(r"(?im)^May I\b").unwrap(),
        Regex::new(r"(?im)^Could you\b").unwrap(),
        Regex::new(r"(?im)^Would you\b").unwrap(),
        Regex::new(r"(?im)^Please (?:confirm|choose|select|specify|clarify)").unwrap(),
        Regex::new(r"(?im)\bconfirm\?").unwrap(),
        Regex::new(r"(?im)\bchoose\b.*\?").unwrap(),
        Regex::new(r"(?im)\bprefer\b.*\?").unwrap(),
        Regex::new(r"(?im)\bor\b.*\?").unwrap(),
    ]
});

/// Question-shaped text that is analysis, not a request for input.
static RHETORICAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?im)^What (?:is|are|was|were|does|did)").unwrap(),
        Regex::new(r"(?im)^How (?:does|did|can|should) (?:this|that|it)").unwrap(),
        Regex::new(r"(?im)^Why (?:is|are|does|did)").unwrap(),
        Regex::new(r"(?im)^Let me (?:check|see|verify|analyze)").unwrap(),
    ]
});

#[derive(Debug, Clone, Copy, Default)]
pub struct QuestionDetector;

impl QuestionDetector {
    pub fn new() -> Self {
        Self
    }

    /// Whether `text` contains a question aimed at the user.
    pub fn is_question(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        if RHETORICAL_PATTERNS.iter().any(|p| p.is_match(text)) {
            return false;
        }
        QUESTION_PATTERNS.iter().any(|p| {
            let hit = p.is_match(text);
            if hit {
                tracing::debug!(pattern = %p, "question pattern matched");
            }
            hit
        })
    }

    /// The first line that is itself a question, or the whole trimmed text
    /// when only a `?` somewhere marks it as one.
    pub fn extract(&self, text: &str) -> Option<String> {
        if !self.is_question(text) {
            return None;
        }

        let first = text
            .split('\n')
            .map(str::trim)
            .find(|line| self.is_question(line));

        match first {
            Some(line) => Some(line.to_string()),
            None if text.contains('?') => Some(text.trim().to_string()),
            None => None,
        }
    }
}
