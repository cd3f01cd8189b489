//! OpenAI-compatible chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::prompt::{build_prompt, SYSTEM_PROMPT};
use super::response::parse_evaluation;
use super::{EvaluationError, Evaluator};
use crate::candidate::Evaluation;
use crate::config::{EvaluationConfig, Provider};
use crate::parser::StructuredRecord;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
}

/// Maps a non-success HTTP status and body onto an [`EvaluationError`].
pub fn classify_status(status: u16, body: &str) -> EvaluationError {
    let parsed = serde_json::from_str::<ApiErrorEnvelope>(body).ok();
    let is_quota = parsed.as_ref().is_some_and(|e| {
        e.error.code.as_deref() == Some("insufficient_quota")
            || e.error.error_type.as_deref() == Some("insufficient_quota")
    }) || body.contains("insufficient_quota");
    let message = parsed
        .map(|e| e.error.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| crate::sanitize::truncate_for_log(body.trim(), 200));

    match status {
        429 if is_quota => EvaluationError::QuotaExhausted(message),
        429 => EvaluationError::RateLimited { status, message },
        408 | 500..=599 => EvaluationError::Unavailable { status, message },
        401 | 403 => EvaluationError::Unauthorized { status, message },
        _ => EvaluationError::Rejected { status, message },
    }
}

/// Production evaluator. Cheap to clone; clones share the HTTP pool.
#[derive(Clone)]
pub struct LlmEvaluator {
    client: Client,
    url: String,
    provider: Provider,
    model: String,
    api_key: Option<SecretString>,
    temperature: Option<f32>,
    timeout: Duration,
    max_resume_chars: usize,
    job_description: String,
}

impl LlmEvaluator {
    /// A missing API key is not an error here: every evaluation then fails
    /// with [`EvaluationError::NotConfigured`], which is not retried.
    pub fn new(
        config: &EvaluationConfig,
        api_key: Option<SecretString>,
        job_description: String,
    ) -> Result<Self, EvaluationError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EvaluationError::NotConfigured(format!("HTTP client: {}", e)))?;

        if api_key.is_none() {
            tracing::warn!(
                provider = ?config.provider,
                "No API key configured for the evaluation model"
            );
        }

        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.endpoint.trim_end_matches('/')),
            provider: config.provider,
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            timeout,
            max_resume_chars: config.max_resume_chars,
            job_description,
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String, EvaluationError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| EvaluationError::NotConfigured("API key is not set".to_string()))?;

        let request_body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            temperature: self.temperature,
        };

        let request = self.client.post(&self.url).json(&request_body);
        let request = match self.provider {
            Provider::OpenAi => request.bearer_auth(api_key.expose_secret()),
            Provider::Azure => request.header("api-key", api_key.expose_secret()),
        };

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify_status(status.as_u16(), &body);
            tracing::warn!(status = status.as_u16(), error = %error, "Model API call failed");
            return Err(error);
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| EvaluationError::MalformedResponse(format!("response body: {}", e)))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| EvaluationError::MalformedResponse("empty completion".to_string()))
    }

    fn transport_error(&self, e: reqwest::Error) -> EvaluationError {
        if e.is_timeout() {
            EvaluationError::Timeout(self.timeout)
        } else {
            EvaluationError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    async fn evaluate(
        &self,
        raw_text: &str,
        structured: &StructuredRecord,
    ) -> Result<Evaluation, EvaluationError> {
        let prompt = build_prompt(
            &self.job_description,
            raw_text,
            structured,
            self.max_resume_chars,
        );
        let content = self.complete(&prompt).await?;
        parse_evaluation(&content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
