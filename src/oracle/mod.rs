/// Oracle gateway: asks an external model whether the agent is on task and,
/// optionally, to answer questions the agent put to the user.
pub mod chat;
pub mod parse;
pub mod prompt;

pub use chat::ChatOracle;

use crate::checklist::Checklist;
use crate::window::WindowSnapshot;
use std::future::Future;

/// The oracle's judgment of one window. Parsed from untrusted output, so
/// every field has a default.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub on_task: bool,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub reasoning: String,
    pub issues: Vec<String>,
    pub action: Option<String>,
}

impl Verdict {
    /// The verdict used when the oracle said nothing usable: on task, no confidence.
    pub fn neutral() -> Self {
        Self {
            on_task: true,
            confidence: 0.0,
            reasoning: String::new(),
            issues: Vec::new(),
            action: None,
        }
    }
}

/// The oracle's attempt at answering a question from the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerAttempt {
    pub answer: String,
    pub confidence: f64,
    pub reasoning: String,
}

impl AnswerAttempt {
    pub fn empty() -> Self {
        Self {
            answer: String::new(),
            confidence: 0.0,
            reasoning: String::new(),
        }
    }
}

/// Everything the oracle sees for one request. Built fresh per job.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub instruction: Option<String>,
    pub snapshot: WindowSnapshot,
    pub checklist: Checklist,
}

/// Failure to obtain any response from the oracle. Distinct from a response
/// that could not be understood, which yields a neutral verdict instead.
#[derive(Debug)]
pub enum OracleError {
    /// The HTTP client could not be constructed.
    Client(reqwest::Error),
    Transport(reqwest::Error),
    Timeout,
    Status { code: u16, body: String },
    /// The response was not a chat-completions envelope.
    Protocol(String),
}

impl std::fmt::Display for OracleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleError::Client(e) => write!(f, "failed to build http client: {e}"),
            OracleError::Transport(e) => write!(f, "oracle request failed: {e}"),
            OracleError::Timeout => write!(f, "oracle request timed out"),
            OracleError::Status { code, body } => {
                write!(f, "oracle returned HTTP {code}: {body}")
            }
            OracleError::Protocol(msg) => write!(f, "unexpected oracle response: {msg}"),
        }
    }
}

impl std::error::Error for OracleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OracleError::Client(e) | OracleError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// A judgment oracle. Implementations must be shareable across tasks; the
/// monitor holds one behind an `Arc` and runs each request in its own task.
pub trait Oracle: Send + Sync + 'static {
    fn evaluate(
        &self,
        ctx: &EvaluationContext,
    ) -> impl Future<Output = Result<Verdict, OracleError>> + Send;

    fn answer(
        &self,
        question: &str,
        ctx: &EvaluationContext,
    ) -> impl Future<Output = Result<AnswerAttempt, OracleError>> + Send;
}
