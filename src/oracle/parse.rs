/// Lenient parsing of oracle output.
///
/// Models wrap JSON in markdown fences, add prose around it, rename fields and
/// report confidence as percentages. Everything here degrades to a default
/// instead of failing.
use super::{AnswerAttempt, Verdict};
use serde_json::{Map, Value};

type Object = Map<String, Value>;

/// Locate the JSON object in a model reply.
///
/// Tries the reply with any ```` ``` ```` fence removed, then the span from the
/// first `{` to the last `}`.
pub fn extract_payload(content: &str) -> Option<Object> {
    let trimmed = content.trim();
    if let Some(obj) = parse_object(strip_fence(trimmed)) {
        return Some(obj);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(&trimmed[start..=end])
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

fn parse_object(text: &str) -> Option<Object> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

/// Interpret a reply to an evaluation request. A reply without a usable
/// payload yields [`Verdict::neutral`].
pub fn parse_verdict(content: &str) -> Verdict {
    let Some(obj) = extract_payload(content) else {
        tracing::warn!(
            response = %crate::event::truncate_chars(content, 200),
            "oracle reply had no JSON payload, treating as on task"
        );
        return Verdict::neutral();
    };

    Verdict {
        on_task: field(&obj, &["on_task", "is_on_task"])
            .and_then(as_bool)
            .unwrap_or(true),
        confidence: confidence(&obj),
        reasoning: string_field(&obj, &["reasoning"]).unwrap_or_default(),
        issues: field(&obj, &["issues", "detected_issues"])
            .map(as_string_list)
            .unwrap_or_default(),
        action: string_field(&obj, &["action", "recommended_action"])
            .filter(|a| !a.trim().is_empty()),
    }
}

/// Interpret a reply to a question. A reply without a usable payload yields
/// an empty answer with zero confidence.
pub fn parse_answer(content: &str) -> AnswerAttempt {
    let Some(obj) = extract_payload(content) else {
        tracing::warn!(
            response = %crate::event::truncate_chars(content, 200),
            "oracle answer had no JSON payload"
        );
        return AnswerAttempt::empty();
    };

    AnswerAttempt {
        answer: string_field(&obj, &["answer"]).unwrap_or_default(),
        confidence: confidence(&obj),
        reasoning: string_field(&obj, &["reasoning"]).unwrap_or_default(),
    }
}

/// Map a reported confidence into `[0, 1]`. Values in `(1, 100]` are read as
/// percentages; non-finite values become 0.
pub fn normalize_confidence(raw: f64) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    let value = if raw > 1.0 && raw <= 100.0 {
        raw / 100.0
    } else {
        raw
    };
    value.clamp(0.0, 1.0)
}

fn confidence(obj: &Object) -> f64 {
    let raw = match field(obj, &["confidence"]) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    raw.map(normalize_confidence).unwrap_or(0.0)
}

/// First present, non-null value among `keys`.
fn field<'a>(obj: &'a Object, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn string_field(obj: &Object, keys: &[&str]) -> Option<String> {
    field(obj, keys).and_then(|v| v.as_str()).map(str::to_string)
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}
