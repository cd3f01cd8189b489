use crate::parser::StructuredRecord;

pub const SYSTEM_PROMPT: &str = "You are an expert resume evaluator. Always return valid JSON.";

/// Escapes chat-template control sequences so resume text cannot pose as a
/// system or assistant turn.
pub fn sanitize_for_prompt(text: &str) -> String {
    text.replace("<|", "< |")
        .replace("|>", "| >")
        .replace("[INST]", "[ INST ]")
        .replace("[/INST]", "[ / INST ]")
        .replace("<<SYS>>", "< < SYS > >")
        .replace("<</SYS>>", "< < / SYS > >")
}

/// First `max_chars` characters, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

pub fn build_prompt(
    job_description: &str,
    raw_text: &str,
    structured: &StructuredRecord,
    max_resume_chars: usize,
) -> String {
    let resume = sanitize_for_prompt(truncate_chars(raw_text, max_resume_chars));
    let structured_json =
        serde_json::to_string_pretty(structured).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"Evaluate this resume against the following job description.

JOB DESCRIPTION:
{job}

RESUME TEXT:
{resume}

STRUCTURED DATA:
{structured}

Respond with a single JSON object with exactly this structure:
{{
    "fit_score": <number from 1 to 10>,
    "recommendation": "Interview" | "Maybe" | "Reject",
    "strengths": ["strength1", "strength2", ...],
    "weaknesses": ["weakness1", "weakness2", ...],
    "summary_text": "<narrative summary of the candidate's qualifications, experience and fit for the role>"
}}
"#,
        job = job_description.trim(),
        resume = resume,
        structured = structured_json,
    )
}
