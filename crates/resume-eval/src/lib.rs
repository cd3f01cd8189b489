pub mod candidate;
pub mod config;
pub mod db;
pub mod error;
pub mod evaluator;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod processor;
pub mod sanitize;
pub mod secrets;
pub mod service;
pub mod storage;
pub mod store;
pub mod worker;

pub use candidate::{
    Candidate, CandidateId, CandidateStatus, Evaluation, FitScore, Recommendation, ResultView,
    StatusView,
};
pub use config::{load_config, Config};
pub use error::{
    ConfigError, ExtractionError, ProcessError, Result, ResumeEvalError, StorageError,
    WorkerError,
};
pub use evaluator::{EvaluationError, Evaluator, LlmEvaluator};
pub use pipeline::{Pipeline, PipelineConfig};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use service::CandidateService;
pub use store::{StatusStore, StoreError};
pub use worker::{Job, JobOutcome, JobResult, WorkerPool};
