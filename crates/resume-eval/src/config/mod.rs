pub mod loader;
pub mod schema;

pub use loader::{
    load_config, load_config_from_str, load_job_description, validate_config,
    DEFAULT_JOB_DESCRIPTION,
};
pub use schema::{
    Config, EvaluationConfig, ExtractionConfig, LogFormat, LoggingConfig, OcrConfig, Provider,
    RetryConfig,
};
