//! Fit evaluation against the deployment's job description.
//!
//! [`Evaluator`] is the seam the pipeline depends on; [`LlmEvaluator`] is the
//! production implementation over an OpenAI-compatible chat completions API.
//! A single call either yields a fully validated [`Evaluation`] or an
//! [`EvaluationError`] that says whether another attempt could succeed.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::candidate::Evaluation;
use crate::parser::StructuredRecord;

pub mod client;
pub mod prompt;
pub mod response;

pub use client::LlmEvaluator;
pub use prompt::{build_prompt, SYSTEM_PROMPT};
pub use response::parse_evaluation;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Evaluation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited (HTTP {status}): {message}")]
    RateLimited { status: u16, message: String },

    #[error("Model service unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Model quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Not authorized (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Evaluator not configured: {0}")]
    NotConfigured(String),
}

impl EvaluationError {
    /// Transient service conditions and nondeterministic bad output may
    /// succeed on a fresh call; auth, quota and request errors will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            EvaluationError::Timeout(_)
            | EvaluationError::Transport(_)
            | EvaluationError::RateLimited { .. }
            | EvaluationError::Unavailable { .. }
            | EvaluationError::MalformedResponse(_) => true,
            EvaluationError::QuotaExhausted(_)
            | EvaluationError::Unauthorized { .. }
            | EvaluationError::Rejected { .. }
            | EvaluationError::NotConfigured(_) => false,
        }
    }
}

/// Scores one resume against the job description the evaluator was built with.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        raw_text: &str,
        structured: &StructuredRecord,
    ) -> Result<Evaluation, EvaluationError>;

    /// Recorded with each result as `model_used`.
    fn model_name(&self) -> &str;
}
