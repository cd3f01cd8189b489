use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// Used when neither `job_description` nor a readable `job_description_file`
/// is configured.
pub const DEFAULT_JOB_DESCRIPTION: &str = "\
We are looking for a talented software engineer with experience in:
- Python, JavaScript, or similar programming languages
- Web development frameworks
- Database design and management
- API development
- Cloud technologies

The ideal candidate should have strong problem-solving skills,
excellent communication abilities, and a passion for technology.
";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.retry.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "retry.max_attempts must be at least 1".to_string(),
        });
    }

    if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
        return Err(ConfigError::Validation {
            message: format!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                config.retry.initial_backoff_ms, config.retry.max_backoff_ms
            ),
        });
    }

    if config.evaluation.max_concurrent_requests == 0 {
        return Err(ConfigError::Validation {
            message: "evaluation.max_concurrent_requests must be at least 1".to_string(),
        });
    }

    if let Some(t) = config.evaluation.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(ConfigError::Validation {
                message: format!("evaluation.temperature {} outside [0, 2]", t),
            });
        }
    }

    if config.extraction.ocr.enabled && config.extraction.ocr.languages.is_empty() {
        return Err(ConfigError::Validation {
            message: "extraction.ocr.languages must not be empty when OCR is enabled".to_string(),
        });
    }

    Ok(())
}

/// Inline text first, then the file, then [`DEFAULT_JOB_DESCRIPTION`].
/// An unreadable file is logged and skipped.
pub fn load_job_description(config: &Config) -> String {
    if let Some(text) = config
        .job_description
        .as_deref()
        .filter(|t| !t.trim().is_empty())
    {
        return text.to_string();
    }

    if let Some(path) = config.job_description_file.as_deref() {
        let expanded = crate::secrets::expand_home(path);
        match std::fs::read_to_string(&expanded) {
            Ok(text) if !text.trim().is_empty() => return text,
            Ok(_) => tracing::warn!(path = %expanded, "Job description file is empty, using default"),
            Err(e) => {
                tracing::warn!(path = %expanded, error = %e, "Job description file unreadable, using default")
            }
        }
    }

    DEFAULT_JOB_DESCRIPTION.to_string()
}
