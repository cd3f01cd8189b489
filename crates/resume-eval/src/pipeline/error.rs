use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::error::{ExtractionError, StorageError};
use crate::evaluator::EvaluationError;
use crate::store::StoreError;

/// The step of an attempt that failed, as written to the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Picking up the job: the attempt never started.
    Claim,
    Extraction,
    Evaluation,
    Persistence,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Claim => "claim",
            Stage::Extraction => "extraction",
            Stage::Evaluation => "evaluation",
            Stage::Persistence => "persistence",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed attempt. Parsing has no variant: it always yields a record.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{0}")]
    Extraction(#[from] ExtractionError),

    #[error("{0}")]
    Evaluation(#[from] EvaluationError),

    #[error("{0}")]
    Persistence(String),

    #[error("attempt {attempt} was superseded by attempt {current}")]
    Superseded { attempt: u32, current: u32 },
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Extraction(_) => Stage::Extraction,
            StageError::Evaluation(_) => Stage::Evaluation,
            StageError::Persistence(_) | StageError::Superseded { .. } => Stage::Persistence,
        }
    }

    /// Persistence is already retried in place, so reaching this level it
    /// is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            StageError::Extraction(e) => e.is_retryable(),
            StageError::Evaluation(e) => e.is_retryable(),
            StageError::Persistence(_) | StageError::Superseded { .. } => false,
        }
    }
}

impl From<StorageError> for StageError {
    fn from(e: StorageError) -> Self {
        StageError::Persistence(e.to_string())
    }
}

impl From<StoreError> for StageError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Superseded {
                attempt, current, ..
            } => StageError::Superseded { attempt, current },
            other => StageError::Persistence(other.to_string()),
        }
    }
}
