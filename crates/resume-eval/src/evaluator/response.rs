//! Validation of the model's reply.
//!
//! Nothing from the reply reaches the store unless every required field is
//! present and valid: a numeric score on 1..=10, a known recommendation
//! label and a non-empty summary.

use serde_json::Value;

use super::EvaluationError;
use crate::candidate::{Evaluation, FitScore, Recommendation};

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let inner = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"));
    match inner {
        Some(stripped) => stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start()),
        None => text,
    }
}

/// The outermost `{ ... }` span, tolerating prose around the object.
fn json_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn malformed(reason: impl Into<String>) -> EvaluationError {
    EvaluationError::MalformedResponse(reason.into())
}

pub fn parse_evaluation(content: &str) -> Result<Evaluation, EvaluationError> {
    let text = strip_json_fences(content);
    let object_text = json_object_span(text).ok_or_else(|| malformed("no JSON object in reply"))?;
    let value: Value = serde_json::from_str(object_text)
        .map_err(|e| malformed(format!("invalid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| malformed("reply is not a JSON object"))?;

    let raw_score = match object.get("fit_score") {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| malformed(format!("fit_score {} is not representable", n)))?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| malformed(format!("fit_score '{}' is not numeric", s)))?,
        Some(other) => return Err(malformed(format!("fit_score {} is not numeric", other))),
        None => return Err(malformed("missing field fit_score")),
    };
    let fit_score = FitScore::new(raw_score).map_err(malformed)?;

    let recommendation: Recommendation = match object.get("recommendation") {
        Some(Value::String(label)) => label.parse().map_err(malformed)?,
        Some(other) => {
            return Err(malformed(format!(
                "recommendation {} is not a string",
                other
            )))
        }
        None => return Err(malformed("missing field recommendation")),
    };

    let summary_text = match object.get("summary_text") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::String(_)) => return Err(malformed("summary_text is empty")),
        Some(_) => return Err(malformed("summary_text is not a string")),
        None => return Err(malformed("missing field summary_text")),
    };

    Ok(Evaluation {
        fit_score,
        recommendation,
        summary_text,
        strengths: string_list(object.get("strengths")),
        weaknesses: string_list(object.get("weaknesses")),
    })
}

/// Optional list fields; non-string entries are dropped.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
