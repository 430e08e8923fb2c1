/// The monitoring pipeline: events in, oracle jobs out, interventions and
/// answers delivered through the mailbox.
///
/// Ingestion runs on the caller's task. Each oracle job runs in its own task
/// and reports back over a channel, so a slow oracle never stalls tailing.
use crate::checklist::Checklist;
use crate::config::MonitorConfig;
use crate::decision::{Decision, DecisionPolicy};
use crate::event::{truncate_chars, Event};
use crate::mailbox::Mailbox;
use crate::oracle::{AnswerAttempt, EvaluationContext, Oracle, OracleError, Verdict};
use crate::relay::{HumanRelay, RelayRequest};
use crate::source::EventSource;
use crate::window::{Job, TriggerReason, WindowManager, WindowSnapshot};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;

const CLARIFY_FALLBACK: &str = "Please clarify your question.";

/// Counters reported when the monitor stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub events: u64,
    pub evaluations: u64,
    pub failures: u64,
    pub interventions: u64,
    pub duplicates: u64,
    pub questions: u64,
    pub answers: u64,
    pub relayed: u64,
}

enum JobOutcome {
    Evaluated {
        generation: u64,
        reason: TriggerReason,
        result: Result<Verdict, OracleError>,
    },
    Answered {
        question: String,
        instruction: Option<String>,
        result: Result<AnswerAttempt, OracleError>,
    },
    /// An oracle task panicked before reporting.
    Aborted { error: JoinError },
    /// The operator relay finished. It never held the oracle slot.
    Relayed { question: String, reply: String },
}

impl JobOutcome {
    fn frees_oracle(&self) -> bool {
        !matches!(self, JobOutcome::Relayed { .. })
    }
}

pub struct Monitor<O: Oracle, R: HumanRelay> {
    oracle: Arc<O>,
    relay: Option<Arc<R>>,
    relay_busy: bool,
    windows: WindowManager,
    policy: DecisionPolicy,
    mailbox: Mailbox,
    instruction: Option<String>,
    adopt_first_event: bool,
    checklist: Option<PathBuf>,
    answer_threshold: f64,
    stats: RunStats,
}

/// One throwaway evaluation to confirm the oracle is reachable.
pub async fn probe<O: Oracle>(oracle: &O) -> Result<(), OracleError> {
    oracle.evaluate(&EvaluationContext::default()).await.map(|_| ())
}

/// Text written to the mailbox when answering an agent's question.
pub fn format_answer(question: &str, answer: &str) -> String {
    format!("Answer to your question (\"{question}\"):\n{answer}")
}

impl<O: Oracle, R: HumanRelay> Monitor<O, R> {
    pub fn new(config: &MonitorConfig, oracle: Arc<O>, relay: Option<R>) -> Self {
        Self {
            oracle,
            relay: relay.map(Arc::new),
            relay_busy: false,
            windows: WindowManager::new(&config.window, config.questions.enabled),
            policy: DecisionPolicy::new(&config.decision),
            mailbox: Mailbox::new(config.mailbox.path.clone()),
            instruction: config
                .task
                .instruction
                .clone()
                .filter(|s| !s.trim().is_empty()),
            adopt_first_event: config.task.adopt_first_event,
            checklist: config.task.checklist.clone(),
            answer_threshold: config.questions.confidence_threshold,
            stats: RunStats::default(),
        }
    }

    /// Consume events from `source` until `shutdown` resolves.
    pub async fn run<S: EventSource>(
        mut self,
        mut source: S,
        shutdown: impl Future<Output = ()>,
    ) -> RunStats {
        let (tx, mut rx) = mpsc::channel::<JobOutcome>(4);
        tokio::pin!(shutdown);

        tracing::info!(
            mode = ?source.mode(),
            mailbox = %self.mailbox.path().display(),
            threshold = self.policy.threshold(),
            instruction = self.instruction.as_deref().unwrap_or("(adopt from first event)"),
            "monitoring started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(outcome) = rx.recv() => {
                    let frees_oracle = outcome.frees_oracle();
                    self.handle_outcome(outcome, &tx);
                    if frees_oracle {
                        if let Some(job) = self.windows.complete() {
                            self.spawn_job(job, &tx);
                        }
                    }
                }
                events = source.next_batch() => {
                    for event in events {
                        self.ingest(event, &tx);
                    }
                }
            }
        }

        let s = self.stats;
        tracing::info!(
            events = s.events,
            evaluations = s.evaluations,
            failures = s.failures,
            interventions = s.interventions,
            duplicates = s.duplicates,
            questions = s.questions,
            answers = s.answers,
            relayed = s.relayed,
            in_flight = self.windows.in_flight(),
            pending_questions = self.windows.pending_questions(),
            "monitor stopped"
        );
        s
    }

    fn ingest(&mut self, event: Event, tx: &mpsc::Sender<JobOutcome>) {
        self.stats.events += 1;
        tracing::debug!(
            seq = event.seq,
            kind = %event.kind,
            content = %event.preview(100),
            "event"
        );

        if self.instruction.is_none() && self.adopt_first_event && !event.content.trim().is_empty()
        {
            tracing::info!(instruction = %event.preview(200), "tracking task from first event");
            self.instruction = Some(event.content.clone());
        }

        if let Some(job) = self.windows.on_event(event) {
            self.spawn_job(job, tx);
        }
    }

    fn context(&self, snapshot: WindowSnapshot) -> EvaluationContext {
        EvaluationContext {
            instruction: self.instruction.clone(),
            snapshot,
            checklist: self
                .checklist
                .as_deref()
                .map(Checklist::load)
                .unwrap_or_default(),
        }
    }

    fn spawn_job(&mut self, job: Job, tx: &mpsc::Sender<JobOutcome>) {
        let oracle = Arc::clone(&self.oracle);

        match job {
            Job::Evaluate { reason, snapshot } => {
                self.stats.evaluations += 1;
                let generation = snapshot.generation;
                tracing::debug!(%reason, generation, events = snapshot.events.len(), "evaluating window");
                let ctx = self.context(snapshot);
                spawn_reporting(
                    tx,
                    async move { oracle.evaluate(&ctx).await },
                    move |joined| match joined {
                        Ok(result) => JobOutcome::Evaluated {
                            generation,
                            reason,
                            result,
                        },
                        Err(error) => JobOutcome::Aborted { error },
                    },
                );
            }
            Job::Answer { question, snapshot } => {
                self.stats.questions += 1;
                tracing::info!(%question, "agent asked a question");
                let ctx = self.context(snapshot);
                spawn_reporting(
                    tx,
                    async move {
                        let result = oracle.answer(&question, &ctx).await;
                        (question, ctx.instruction, result)
                    },
                    |joined| match joined {
                        Ok((question, instruction, result)) => JobOutcome::Answered {
                            question,
                            instruction,
                            result,
                        },
                        Err(error) => JobOutcome::Aborted { error },
                    },
                );
            }
        }
    }

    fn handle_outcome(&mut self, outcome: JobOutcome, tx: &mpsc::Sender<JobOutcome>) {
        match outcome {
            JobOutcome::Evaluated {
                generation,
                reason,
                result,
            } => match result {
                Ok(verdict) => self.handle_verdict(generation, &reason, &verdict),
                Err(e) => {
                    self.stats.failures += 1;
                    tracing::warn!(error = %e, %reason, "oracle evaluation failed, skipping cycle");
                }
            },
            JobOutcome::Answered {
                question,
                instruction,
                result,
            } => {
                let attempt = result.unwrap_or_else(|e| {
                    self.stats.failures += 1;
                    tracing::warn!(error = %e, "oracle could not answer question");
                    AnswerAttempt::empty()
                });
                self.resolve_question(question, instruction, attempt, tx);
            }
            JobOutcome::Aborted { error } => {
                self.stats.failures += 1;
                tracing::error!(%error, "oracle task panicked, skipping cycle");
            }
            JobOutcome::Relayed { question, reply } => {
                self.relay_busy = false;
                if deliver_answer(&self.mailbox, &question, &reply) {
                    self.stats.answers += 1;
                }
            }
        }
    }

    fn handle_verdict(&mut self, generation: u64, reason: &TriggerReason, verdict: &Verdict) {
        tracing::info!(
            on_task = verdict.on_task,
            confidence = verdict.confidence,
            %reason,
            reasoning = %truncate_chars(&verdict.reasoning, 200),
            "verdict"
        );

        match self.policy.decide(generation, verdict) {
            Decision::NoIntervention => {}
            Decision::Duplicate { generation } => {
                self.stats.duplicates += 1;
                tracing::debug!(generation, "duplicate intervention suppressed");
            }
            Decision::Intervene(decision) => match self.mailbox.write(&decision.message) {
                Ok(()) => {
                    self.stats.interventions += 1;
                    tracing::warn!(
                        severity = %decision.severity,
                        confidence = decision.confidence,
                        generation = decision.generation,
                        "intervention sent"
                    );
                }
                Err(e) => tracing::error!(error = %e, "failed to deliver intervention"),
            },
        }
    }

    fn resolve_question(
        &mut self,
        question: String,
        instruction: Option<String>,
        attempt: AnswerAttempt,
        tx: &mpsc::Sender<JobOutcome>,
    ) {
        let answer = attempt.answer.trim().to_string();
        tracing::debug!(
            confidence = attempt.confidence,
            reasoning = %truncate_chars(&attempt.reasoning, 200),
            "oracle answer"
        );
        if attempt.confidence >= self.answer_threshold && !answer.is_empty() {
            tracing::info!(confidence = attempt.confidence, "answering question from oracle");
            if deliver_answer(&self.mailbox, &question, &answer) {
                self.stats.answers += 1;
            }
            return;
        }

        let fallback = if answer.is_empty() {
            CLARIFY_FALLBACK.to_string()
        } else {
            answer.clone()
        };

        let Some(relay) = &self.relay else {
            if deliver_answer(&self.mailbox, &question, &fallback) {
                self.stats.answers += 1;
            }
            return;
        };

        if self.relay_busy {
            tracing::info!("operator relay busy, using fallback answer");
            if deliver_answer(&self.mailbox, &question, &fallback) {
                self.stats.answers += 1;
            }
            return;
        }

        self.relay_busy = true;
        self.stats.relayed += 1;
        let relay = Arc::clone(relay);
        let request = RelayRequest {
            question: question.clone(),
            task: instruction,
            suggestion: (!answer.is_empty()).then_some(answer),
            suggestion_confidence: attempt.confidence,
        };
        let on_panic = fallback.clone();
        spawn_reporting(
            tx,
            async move {
                match relay.ask(&request).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        tracing::warn!(error = %e, "operator relay failed, using fallback answer");
                        fallback
                    }
                }
            },
            move |joined| JobOutcome::Relayed {
                question,
                reply: joined.unwrap_or_else(|error| {
                    tracing::error!(%error, "operator relay task panicked, using fallback answer");
                    on_panic
                }),
            },
        );
    }
}

/// Run `work` on its own task and send `report` of its result, or of its
/// panic, back to the monitor loop.
fn spawn_reporting<T, W, F>(tx: &mpsc::Sender<JobOutcome>, work: W, report: F)
where
    T: Send + 'static,
    W: Future<Output = T> + Send + 'static,
    F: FnOnce(Result<T, JoinError>) -> JobOutcome + Send + 'static,
{
    let tx = tx.clone();
    let handle = tokio::spawn(work);
    tokio::spawn(async move {
        let _ = tx.send(report(handle.await)).await;
    });
}

fn deliver_answer(mailbox: &Mailbox, question: &str, answer: &str) -> bool {
    match mailbox.write(&format_answer(question, answer)) {
        Ok(()) => {
            tracing::info!(%question, "answer delivered");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to deliver answer");
            false
        }
    }
}
