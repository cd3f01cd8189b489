//! Candidate domain types.
//!
//! A candidate's lifecycle state is a closed enum; the evaluation result only
//! exists inside [`CandidateState::Done`], so a finished candidate without a
//! score cannot be represented.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::parser::StructuredRecord;
use crate::processor::ExtractionMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(Uuid);

impl CandidateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CandidateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for CandidateId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl CandidateStatus {
    pub const ALL: [CandidateStatus; 4] = [
        CandidateStatus::Pending,
        CandidateStatus::Processing,
        CandidateStatus::Done,
        CandidateStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "PENDING",
            CandidateStatus::Processing => "PROCESSING",
            CandidateStatus::Done => "DONE",
            CandidateStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CandidateStatus::Done | CandidateStatus::Failed)
    }

    /// The complete transition table. Every status write goes through it.
    ///
    /// `Processing -> Processing` starts another attempt, `Done -> Done` is an
    /// idempotent re-commit of the same result, and `Done`/`Failed ->
    /// Pending` is a re-evaluation.
    pub fn can_transition_to(&self, next: CandidateStatus) -> bool {
        use CandidateStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Processing)
                | (Processing, Processing)
                | (Processing, Done)
                | (Processing, Failed)
                | (Done, Done)
                | (Done, Pending)
                | (Failed, Pending)
        )
    }

    /// Statuses from which `next` may be reached.
    pub fn sources_of(next: CandidateStatus) -> Vec<CandidateStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandidateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(CandidateStatus::Pending),
            "PROCESSING" => Ok(CandidateStatus::Processing),
            "DONE" => Ok(CandidateStatus::Done),
            "FAILED" => Ok(CandidateStatus::Failed),
            other => Err(format!("unknown candidate status '{}'", other)),
        }
    }
}

/// Fit score on the closed range 1..=10.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct FitScore(f64);

impl FitScore {
    pub const MIN: f64 = 1.0;
    pub const MAX: f64 = 10.0;

    pub fn new(value: f64) -> Result<Self, String> {
        if value.is_finite() && (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!(
                "fit_score {} outside [{}, {}]",
                value,
                Self::MIN,
                Self::MAX
            ))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl<'de> Deserialize<'de> for FitScore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        FitScore::new(value).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for FitScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recommendation {
    Interview,
    Maybe,
    Reject,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Interview => "Interview",
            Recommendation::Maybe => "Maybe",
            Recommendation::Reject => "Reject",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recommendation {
    type Err = String;

    /// Case-insensitive; `Decline` is accepted as a synonym for `Reject`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interview" => Ok(Recommendation::Interview),
            "maybe" => Ok(Recommendation::Maybe),
            "reject" | "decline" => Ok(Recommendation::Reject),
            _ => Err(format!(
                "unknown recommendation '{}' (expected Interview, Maybe or Reject)",
                s
            )),
        }
    }
}

/// Model verdict for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub fit_score: FitScore,
    pub recommendation: Recommendation,
    pub summary_text: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

/// Everything a successful run produces. Committed in one write.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateResult {
    pub raw_text: String,
    pub extraction_method: ExtractionMethod,
    pub structured: StructuredRecord,
    pub evaluation: Evaluation,
    pub model_used: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CandidateState {
    Pending,
    Processing,
    Done(Box<CandidateResult>),
    Failed,
}

impl CandidateState {
    pub fn status(&self) -> CandidateStatus {
        match self {
            CandidateState::Pending => CandidateStatus::Pending,
            CandidateState::Processing => CandidateStatus::Processing,
            CandidateState::Done(_) => CandidateStatus::Done,
            CandidateState::Failed => CandidateStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: CandidateId,
    pub original_filename: String,
    pub stored_path: PathBuf,
    pub state: CandidateState,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    pub fn status(&self) -> CandidateStatus {
        self.state.status()
    }

    pub fn result(&self) -> Option<&CandidateResult> {
        match &self.state {
            CandidateState::Done(result) => Some(&**result),
            _ => None,
        }
    }

    pub fn status_view(&self) -> StatusView {
        let result = self.result();
        StatusView {
            id: self.id,
            status: self.status(),
            fit_score: result.map(|r| r.evaluation.fit_score.value()),
            recommendation: result.map(|r| r.evaluation.recommendation),
            attempt_count: self.attempt_count,
            updated_at: self.updated_at,
        }
    }

    /// Result fields are all present for `DONE` and all null otherwise.
    pub fn result_view(&self) -> ResultView {
        let result = self.result();
        ResultView {
            id: self.id,
            status: self.status(),
            original_filename: self.original_filename.clone(),
            fit_score: result.map(|r| r.evaluation.fit_score.value()),
            recommendation: result.map(|r| r.evaluation.recommendation),
            summary_text: result.map(|r| r.evaluation.summary_text.clone()),
            structured_data: result.map(|r| r.structured.clone()),
            raw_text: result.map(|r| r.raw_text.clone()),
        }
    }
}

/// Status read interface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub id: CandidateId,
    pub status: CandidateStatus,
    pub fit_score: Option<f64>,
    pub recommendation: Option<Recommendation>,
    pub attempt_count: u32,
    pub updated_at: DateTime<Utc>,
}

/// Result read interface. Never carries failure causes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultView {
    pub id: CandidateId,
    pub status: CandidateStatus,
    pub original_filename: String,
    pub fit_score: Option<f64>,
    pub recommendation: Option<Recommendation>,
    pub summary_text: Option<String>,
    pub structured_data: Option<StructuredRecord>,
    pub raw_text: Option<String>,
}
