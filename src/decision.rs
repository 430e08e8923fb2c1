/// Decision policy: turn an oracle verdict into "intervene" or "leave it".
use crate::config::DecisionConfig;
use crate::oracle::Verdict;
use std::fmt::Write;

const DEFAULT_ACTION: &str = "Return to the original task immediately.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Band for a confidence already known to be at or above the threshold.
    fn for_confidence(confidence: f64) -> Self {
        if confidence >= 0.9 {
            Severity::Critical
        } else if confidence >= 0.8 {
            Severity::High
        } else {
            Severity::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterventionDecision {
    pub severity: Severity,
    pub confidence: f64,
    /// Generation of the window snapshot the verdict was about. Zero when
    /// produced by [`DecisionPolicy::classify`] alone.
    pub generation: u64,
    /// Directive written to the mailbox.
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    NoIntervention,
    Intervene(InterventionDecision),
    /// This snapshot already produced an intervention.
    Duplicate { generation: u64 },
}

#[derive(Debug)]
pub struct DecisionPolicy {
    threshold: f64,
    last_intervened: Option<u64>,
}

impl DecisionPolicy {
    pub fn new(config: &DecisionConfig) -> Self {
        Self {
            threshold: config.threshold,
            last_intervened: None,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Pure classification of a verdict.
    pub fn classify(&self, verdict: &Verdict) -> Decision {
        if verdict.on_task || verdict.confidence < self.threshold {
            return Decision::NoIntervention;
        }

        let severity = Severity::for_confidence(verdict.confidence);
        Decision::Intervene(InterventionDecision {
            severity,
            confidence: verdict.confidence,
            generation: 0,
            message: format_directive(severity, verdict),
        })
    }

    /// Classify, suppressing a second intervention for the same snapshot.
    pub fn decide(&mut self, generation: u64, verdict: &Verdict) -> Decision {
        match self.classify(verdict) {
            Decision::Intervene(_) if self.last_intervened.is_some_and(|g| generation <= g) => {
                tracing::debug!(generation, "intervention already sent for this window");
                Decision::Duplicate { generation }
            }
            Decision::Intervene(mut decision) => {
                decision.generation = generation;
                self.last_intervened = Some(generation);
                Decision::Intervene(decision)
            }
            other => other,
        }
    }
}

/// The text the agent sees, phrased as an order from its supervisor.
fn format_directive(severity: Severity, verdict: &Verdict) -> String {
    let mut msg = format!(
        "STOP - supervisor intervention ({severity} severity, {:.0}% confidence you are off task).\n\n",
        verdict.confidence * 100.0
    );

    let reasoning = verdict.reasoning.trim();
    if reasoning.is_empty() {
        msg.push_str("Issue detected: your recent activity does not match the task you were given.\n\n");
    } else {
        let _ = write!(msg, "Issue detected: {reasoning}\n\n");
    }

    if !verdict.issues.is_empty() {
        msg.push_str("Problems:\n");
        for issue in &verdict.issues {
            let _ = writeln!(msg, "- {issue}");
        }
        msg.push('\n');
    }

    let action = verdict.action.as_deref().unwrap_or(DEFAULT_ACTION);
    let _ = write!(msg, "Action required: {action}");
    msg
}
