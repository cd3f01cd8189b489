use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::processor::StrategyFailure;

#[derive(Error, Debug)]
pub enum ResumeEvalError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] crate::evaluator::EvaluationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Status store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Failure of a single extraction strategy.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to load PDF: {0}")]
    LoadPdf(String),

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("{tool} failed: {stderr}")]
    ToolFailed { tool: String, stderr: String },

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of the extraction chain as a whole.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to read resume '{path}': {source}")]
    SourceMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("All extraction strategies failed: {}", format_failures(.failures))]
    AllStrategiesFailed { failures: Vec<StrategyFailure> },

    #[error("Extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Extraction task aborted: {0}")]
    Aborted(String),
}

impl ExtractionError {
    /// Only a missing source document is permanent; everything else may
    /// succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExtractionError::SourceMissing { .. })
    }
}

fn format_failures(failures: &[StrategyFailure]) -> String {
    if failures.is_empty() {
        return "no strategies configured".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Worker pool is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, ResumeEvalError>;
