use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::candidate::{CandidateId, CandidateStatus, Recommendation};
use crate::pipeline::Stage;

/// One delivery of "process this candidate". Carries only the id: the
/// store is the source of truth for everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub candidate_id: CandidateId,
    /// 1 for the first delivery, incremented on every requeue.
    pub delivery: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(candidate_id: CandidateId) -> Self {
        Self {
            candidate_id,
            delivery: 1,
            enqueued_at: Utc::now(),
        }
    }

    /// The same job, delivered again.
    pub fn redeliver(&self) -> Self {
        Self {
            candidate_id: self.candidate_id,
            delivery: self.delivery + 1,
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Committed as `DONE`.
    Completed {
        fit_score: f64,
        recommendation: Recommendation,
    },
    /// Retryable failure; the job is requeued after `delay` and the
    /// candidate stays `PROCESSING`.
    Retrying {
        stage: Stage,
        error: String,
        #[serde(with = "duration_ms")]
        delay: Duration,
    },
    /// Committed as `FAILED`, or no attempt could be made.
    Failed { stage: Stage, error: String },
    /// Duplicate delivery for a candidate that is already settled.
    Skipped { status: CandidateStatus },
    /// Duplicate delivery while another delivery of the same candidate is
    /// running in this process. Nothing was changed.
    InFlight,
    /// A later attempt, started elsewhere, took the candidate over while
    /// this one ran. Its failure was audited; the candidate was not changed.
    Superseded { current_attempt: u32 },
    /// No candidate with this id.
    Missing,
}

impl JobOutcome {
    /// `false` when this pool will produce another result for the same
    /// candidate: after a retry, or while another delivery is running.
    pub fn is_final(&self) -> bool {
        !matches!(self, JobOutcome::Retrying { .. } | JobOutcome::InFlight)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub candidate_id: CandidateId,
    pub delivery: u32,
    /// Attempt number the store assigned; 0 when no attempt was started.
    pub attempt: u32,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

impl JobResult {
    pub fn new(job: &Job, attempt: u32, outcome: JobOutcome) -> Self {
        Self {
            candidate_id: job.candidate_id,
            delivery: job.delivery,
            attempt,
            outcome,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed { .. })
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
