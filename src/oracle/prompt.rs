/// Prompt templates for the chat-completions oracle.
use super::EvaluationContext;
use crate::event::truncate_chars;
use std::fmt::Write;

pub const EVALUATION_SYSTEM_PROMPT: &str = r#"You are a monitoring agent that watches an AI coding assistant to make sure it stays on task.

Analyze the assistant's recent activity and determine whether it is:
1. Following the user's instructions
2. Making progress on the listed checklist items
3. Avoiding hallucinations or incorrect assumptions
4. Actually executing tasks rather than saying it will "monitor" or "check later" (which it cannot do)

Respond with JSON only, in this format:
{
  "on_task": true,
  "confidence": 0.0,
  "reasoning": "Brief explanation of your determination",
  "issues": ["list", "of", "specific", "problems"],
  "action": "What the assistant should do instead (null if on task)"
}

"confidence" is how sure you are that the assistant is OFF task, from 0.0 to 1.0.
Be strict but fair. The assistant should be actively working on the user's request."#;

pub const ANSWER_SYSTEM_PROMPT: &str = r#"You answer questions that an AI coding assistant asks its user.

Using the task and recent activity, provide:
1. Your best answer to the question
2. Your confidence (0.0 to 1.0) in that answer
3. Brief reasoning

Low-confidence answers are forwarded to a human instead.

Respond with JSON only, in this format:
{
  "answer": "Your answer to the question",
  "confidence": 0.85,
  "reasoning": "Why you chose this answer and what makes you uncertain"
}

Be conservative: only report confidence above 0.95 when the task context makes the answer clear."#;

const EVENT_PREVIEW_CHARS: usize = 100;
const CURRENT_PREVIEW_CHARS: usize = 500;

/// User prompt for an on-task evaluation.
pub fn evaluation_prompt(ctx: &EvaluationContext) -> String {
    let mut out = String::from("Analyze the assistant's activity.\n\nUSER INSTRUCTION:\n");
    out.push_str(instruction(ctx));
    out.push('\n');
    push_checklist(&mut out, ctx);

    out.push_str("\nRECENT ACTIVITY:\n");
    push_events(&mut out, ctx);

    out.push_str("\nCURRENT ACTIVITY:\n");
    match ctx.snapshot.latest() {
        Some(event) => out.push_str(&event.preview(CURRENT_PREVIEW_CHARS)),
        None => out.push_str("(no activity yet)"),
    }
    out.push_str("\n\nIs the assistant staying on task? Respond in JSON as specified.");
    out
}

/// User prompt asking the oracle to answer `question`.
pub fn answer_prompt(question: &str, ctx: &EvaluationContext) -> String {
    let mut out = format!("Task: {}\n", instruction(ctx));
    push_checklist(&mut out, ctx);

    out.push_str("\nRecent activity:\n");
    push_events(&mut out, ctx);

    let _ = write!(
        out,
        "\nThe assistant is asking:\n\"{question}\"\n\nProvide your answer, confidence and reasoning in JSON."
    );
    out
}

fn instruction(ctx: &EvaluationContext) -> &str {
    ctx.instruction
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("(not stated)")
}

fn push_checklist(out: &mut String, ctx: &EvaluationContext) {
    if ctx.checklist.is_empty() {
        return;
    }
    if !ctx.checklist.pending.is_empty() {
        out.push_str("\nPENDING ITEMS:\n");
        for item in &ctx.checklist.pending {
            let _ = writeln!(out, "- {item}");
        }
    }
    if !ctx.checklist.completed.is_empty() {
        out.push_str("\nCOMPLETED ITEMS:\n");
        for item in &ctx.checklist.completed {
            let _ = writeln!(out, "- {item}");
        }
    }
}

fn push_events(out: &mut String, ctx: &EvaluationContext) {
    if ctx.snapshot.is_empty() {
        out.push_str("(none)\n");
        return;
    }
    for event in &ctx.snapshot.events {
        let _ = writeln!(
            out,
            "- [{}] {}: {}",
            event.timestamp.format("%H:%M:%S"),
            event.kind,
            truncate_chars(&event.content, EVENT_PREVIEW_CHARS).replace('\n', " ")
        );
    }
}
