//! Status store: typed candidate records over the SQLite repositories.
//!
//! Every status write is checked against
//! [`CandidateStatus::can_transition_to`] and executed as one conditional
//! statement, so concurrent writers cannot produce a state the table does
//! not allow. A `DONE` record is committed with all of its result fields in
//! the same write.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::candidate::{
    Candidate, CandidateId, CandidateResult, CandidateState, CandidateStatus, Evaluation,
    FitScore, Recommendation, ResultView, StatusView,
};
use crate::db::candidate_repo::{self, AttemptClaim, CandidateFilter, CandidateRow, CompletionRow};
use crate::db::failure_repo::{self, NewFailure};
use crate::db::{Database, DatabaseError};
use crate::parser::StructuredRecord;
use crate::processor::ExtractionMethod;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Candidate not found: {0}")]
    NotFound(CandidateId),

    #[error("Candidate {id}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        id: CandidateId,
        from: CandidateStatus,
        to: CandidateStatus,
    },

    #[error("Candidate {id}: attempt {attempt} was superseded by attempt {current}")]
    Superseded {
        id: CandidateId,
        attempt: u32,
        current: u32,
    },

    #[error("Candidate {id} has an unreadable record: {reason}")]
    Corrupt { id: String, reason: String },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(e) if e.is_transient())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub id: CandidateId,
    pub original_filename: String,
    pub stored_path: PathBuf,
}

/// Result of [`StatusStore::begin_attempt`].
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// Now `PROCESSING`; `attempt_count` includes this attempt.
    Started(Candidate),
    /// Attempt limit already reached. The candidate is unchanged.
    Exhausted(Candidate),
    /// Status does not allow processing (already `DONE` or `FAILED`).
    Skipped(Candidate),
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<CandidateStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// One failed attempt as written to the audit trail.
#[derive(Debug, Clone)]
pub struct FailureEvent<'a> {
    pub id: CandidateId,
    pub attempt: u32,
    pub stage: &'a str,
    pub cause: &'a str,
    pub retryable: bool,
    pub terminal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub attempt: u32,
    pub stage: String,
    pub cause: String,
    pub retryable: bool,
    pub terminal: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EvaluationDetails {
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
}

#[derive(Clone)]
pub struct StatusStore {
    db: Database,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn status_strs(statuses: &[CandidateStatus]) -> Vec<&'static str> {
    statuses.iter().map(|s| s.as_str()).collect()
}

impl StatusStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create(&self, new: &NewCandidate) -> StoreResult<Candidate> {
        let now = timestamp(Utc::now());
        let row = CandidateRow {
            id: new.id.to_string(),
            original_filename: new.original_filename.clone(),
            stored_path: new.stored_path.to_string_lossy().into_owned(),
            status: CandidateStatus::Pending.as_str().to_string(),
            attempt_count: 0,
            raw_text: None,
            structured_json: None,
            fit_score: None,
            recommendation: None,
            summary_text: None,
            evaluation_details: None,
            extraction_method: None,
            model_used: None,
            created_at: now.clone(),
            updated_at: now,
        };
        candidate_repo::insert(&self.db, &row)?;
        log::debug!("Created candidate {}", new.id);
        candidate_from_row(row)
    }

    pub fn get(&self, id: CandidateId) -> StoreResult<Candidate> {
        match candidate_repo::find_by_id(&self.db, &id.to_string())? {
            Some(row) => candidate_from_row(row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    pub fn status_view(&self, id: CandidateId) -> StoreResult<StatusView> {
        Ok(self.get(id)?.status_view())
    }

    pub fn result_view(&self, id: CandidateId) -> StoreResult<ResultView> {
        Ok(self.get(id)?.result_view())
    }

    /// Newest first, with the total number of matching candidates.
    pub fn list(&self, filter: &ListFilter) -> StoreResult<(Vec<Candidate>, u64)> {
        let (rows, total) = candidate_repo::query(
            &self.db,
            &CandidateFilter {
                status: filter.status.map(|s| s.as_str().to_string()),
                limit: filter.limit,
                offset: filter.offset,
            },
        )?;
        let candidates = rows
            .into_iter()
            .map(candidate_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((candidates, total))
    }

    pub fn count(&self, status: CandidateStatus) -> StoreResult<u64> {
        Ok(candidate_repo::count_by_status(&self.db, status.as_str())?)
    }

    /// Candidates a previous run left `PENDING` or `PROCESSING`, oldest first.
    pub fn unfinished(&self) -> StoreResult<Vec<CandidateId>> {
        let ids = candidate_repo::ids_with_status(
            &self.db,
            &status_strs(&[CandidateStatus::Pending, CandidateStatus::Processing]),
        )?;
        ids.into_iter()
            .map(|id| {
                id.parse().map_err(|e: uuid::Error| StoreError::Corrupt {
                    id,
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    /// Starts an attempt: `PROCESSING` and `attempt_count + 1`, atomically.
    pub fn begin_attempt(&self, id: CandidateId, max_attempts: u32) -> StoreResult<Claim> {
        let sources = CandidateStatus::sources_of(CandidateStatus::Processing);
        let claim = candidate_repo::begin_attempt(
            &self.db,
            &id.to_string(),
            &status_strs(&sources),
            max_attempts,
            &timestamp(Utc::now()),
        )?;

        match claim {
            AttemptClaim::Claimed(row) => Ok(Claim::Started(candidate_from_row(row)?)),
            AttemptClaim::Exhausted(row) => Ok(Claim::Exhausted(candidate_from_row(row)?)),
            AttemptClaim::NotClaimable(row) => Ok(Claim::Skipped(candidate_from_row(row)?)),
            AttemptClaim::NotFound => Err(StoreError::NotFound(id)),
        }
    }

    /// Commits `DONE` with every result field in one write, on behalf of
    /// `attempt`. Re-committing a candidate that is already `DONE` overwrites
    /// it with the same shape.
    pub fn complete(
        &self,
        id: CandidateId,
        attempt: u32,
        result: &CandidateResult,
    ) -> StoreResult<Candidate> {
        let details = EvaluationDetails {
            strengths: result.evaluation.strengths.clone(),
            weaknesses: result.evaluation.weaknesses.clone(),
        };
        let completion = CompletionRow {
            raw_text: result.raw_text.clone(),
            structured_json: serde_json::to_string(&result.structured).map_err(|e| {
                StoreError::Corrupt {
                    id: id.to_string(),
                    reason: format!("structured record not serializable: {}", e),
                }
            })?,
            fit_score: result.evaluation.fit_score.value(),
            recommendation: result.evaluation.recommendation.as_str().to_string(),
            summary_text: result.evaluation.summary_text.clone(),
            evaluation_details: serde_json::to_string(&details).map_err(|e| {
                StoreError::Corrupt {
                    id: id.to_string(),
                    reason: format!("evaluation details not serializable: {}", e),
                }
            })?,
            extraction_method: result.extraction_method.as_str().to_string(),
            model_used: result.model_used.clone(),
        };

        let sources = CandidateStatus::sources_of(CandidateStatus::Done);
        let changed = candidate_repo::complete(
            &self.db,
            &id.to_string(),
            attempt,
            &completion,
            &status_strs(&sources),
            &timestamp(Utc::now()),
        )?;
        self.after_transition(id, changed, CandidateStatus::Done, Some(attempt))
    }

    /// Terminal failure on behalf of `attempt`.
    pub fn fail(&self, id: CandidateId, attempt: u32) -> StoreResult<Candidate> {
        let sources = CandidateStatus::sources_of(CandidateStatus::Failed);
        let changed = candidate_repo::fail(
            &self.db,
            &id.to_string(),
            attempt,
            &status_strs(&sources),
            &timestamp(Utc::now()),
        )?;
        self.after_transition(id, changed, CandidateStatus::Failed, Some(attempt))
    }

    /// Back to `PENDING` with results cleared and a fresh attempt budget.
    /// Refused while an attempt is in flight.
    pub fn reset_for_reevaluation(&self, id: CandidateId) -> StoreResult<Candidate> {
        let sources = CandidateStatus::sources_of(CandidateStatus::Pending);
        let changed = candidate_repo::reset(
            &self.db,
            &id.to_string(),
            &status_strs(&sources),
            &timestamp(Utc::now()),
        )?;
        self.after_transition(id, changed, CandidateStatus::Pending, None)
    }

    fn after_transition(
        &self,
        id: CandidateId,
        changed: usize,
        to: CandidateStatus,
        owner: Option<u32>,
    ) -> StoreResult<Candidate> {
        let current = self.get(id)?;
        if changed == 0 {
            if let Some(attempt) = owner.filter(|a| *a != current.attempt_count) {
                return Err(StoreError::Superseded {
                    id,
                    attempt,
                    current: current.attempt_count,
                });
            }
            return Err(StoreError::InvalidTransition {
                id,
                from: current.status(),
                to,
            });
        }
        Ok(current)
    }

    pub fn record_failure(&self, event: &FailureEvent<'_>) -> StoreResult<()> {
        failure_repo::insert(
            &self.db,
            &NewFailure {
                candidate_id: &event.id.to_string(),
                attempt: event.attempt,
                stage: event.stage,
                cause: event.cause,
                retryable: event.retryable,
                terminal: event.terminal,
                created_at: &timestamp(Utc::now()),
            },
        )?;
        Ok(())
    }

    pub fn failures(&self, id: CandidateId) -> StoreResult<Vec<FailureRecord>> {
        failure_repo::list_for_candidate(&self.db, &id.to_string())?
            .into_iter()
            .map(|row| {
                Ok(FailureRecord {
                    attempt: row.attempt,
                    recorded_at: parse_timestamp(&row.candidate_id, &row.created_at)?,
                    stage: row.stage,
                    cause: row.cause,
                    retryable: row.retryable,
                    terminal: row.terminal,
                })
            })
            .collect()
    }
}

fn parse_timestamp(id: &str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("bad timestamp '{}': {}", value, e),
        })
}

fn candidate_from_row(row: CandidateRow) -> StoreResult<Candidate> {
    let corrupt = |reason: String| StoreError::Corrupt {
        id: row.id.clone(),
        reason,
    };

    let id: CandidateId = row
        .id
        .parse()
        .map_err(|e: uuid::Error| corrupt(e.to_string()))?;
    let status: CandidateStatus = row.status.parse().map_err(corrupt)?;
    let created_at = parse_timestamp(&row.id, &row.created_at)?;
    let updated_at = parse_timestamp(&row.id, &row.updated_at)?;

    let state = match status {
        CandidateStatus::Pending => CandidateState::Pending,
        CandidateStatus::Processing => CandidateState::Processing,
        CandidateStatus::Failed => CandidateState::Failed,
        CandidateStatus::Done => CandidateState::Done(Box::new(result_from_row(&row)?)),
    };

    Ok(Candidate {
        id,
        original_filename: row.original_filename,
        stored_path: PathBuf::from(row.stored_path),
        state,
        attempt_count: row.attempt_count,
        created_at,
        updated_at,
    })
}

fn result_from_row(row: &CandidateRow) -> StoreResult<CandidateResult> {
    let corrupt = |reason: String| StoreError::Corrupt {
        id: row.id.clone(),
        reason,
    };
    let missing = |field: &str| corrupt(format!("DONE without {}", field));

    let raw_text = row.raw_text.clone().ok_or_else(|| missing("raw_text"))?;
    let structured: StructuredRecord = row
        .structured_json
        .as_deref()
        .ok_or_else(|| missing("structured_json"))
        .and_then(|json| serde_json::from_str(json).map_err(|e| corrupt(e.to_string())))?;
    let fit_score = row
        .fit_score
        .ok_or_else(|| missing("fit_score"))
        .and_then(|v| FitScore::new(v).map_err(corrupt))?;
    let recommendation: Recommendation = row
        .recommendation
        .as_deref()
        .ok_or_else(|| missing("recommendation"))?
        .parse()
        .map_err(corrupt)?;
    let summary_text = row
        .summary_text
        .clone()
        .ok_or_else(|| missing("summary_text"))?;
    let details: EvaluationDetails = match row.evaluation_details.as_deref() {
        Some(json) => serde_json::from_str(json).map_err(|e| corrupt(e.to_string()))?,
        None => EvaluationDetails::default(),
    };
    let extraction_method: ExtractionMethod = match row.extraction_method.as_deref() {
        Some(method) => method.parse().map_err(corrupt)?,
        None => return Err(missing("extraction_method")),
    };

    Ok(CandidateResult {
        raw_text,
        extraction_method,
        structured,
        evaluation: Evaluation {
            fit_score,
            recommendation,
            summary_text,
            strengths: details.strengths,
            weaknesses: details.weaknesses,
        },
        model_used: row.model_used.clone().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> StatusStore {
        StatusStore::new(Database::open_in_memory().unwrap())
    }

    fn new_candidate(store: &StatusStore) -> CandidateId {
        let id = CandidateId::new();
        store
            .create(&NewCandidate {
                id,
                original_filename: "jane.pdf".to_string(),
                stored_path: PathBuf::from(format!("/data/candidates/{}/resume.pdf", id)),
            })
            .unwrap();
        id
    }

    fn sample_result(score: f64) -> CandidateResult {
        CandidateResult {
            raw_text: "Jane Roe, jane@example.com".to_string(),
            extraction_method: ExtractionMethod::Pdftotext,
            structured: StructuredRecord {
                name: Some("Jane Roe".to_string()),
                email: Some("jane@example.com".to_string()),
                phone: None,
                skills: vec!["Rust".to_string()],
            },
            evaluation: Evaluation {
                fit_score: FitScore::new(score).unwrap(),
                recommendation: Recommendation::Interview,
                summary_text: "Strong systems background".to_string(),
                strengths: vec!["Rust".to_string()],
                weaknesses: vec!["No cloud experience".to_string()],
            },
            model_used: "gpt-4o-mini".to_string(),
        }
    }

    fn start(store: &StatusStore, id: CandidateId) -> Candidate {
        match store.begin_attempt(id, 3).unwrap() {
            Claim::Started(c) => c,
            other => panic!("Expected Started, got {:?}", other),
        }
    }

    #[test]
    fn test_create_is_pending() {
        let store = test_store();
        let id = new_candidate(&store);
        let candidate = store.get(id).unwrap();
        assert_eq!(candidate.status(), CandidateStatus::Pending);
        assert_eq!(candidate.attempt_count, 0);
        assert!(candidate.result().is_none());
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let store = test_store();
        let id = CandidateId::new();
        match store.get(id) {
            Err(StoreError::NotFound(missing)) => assert_eq!(missing, id),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_full_success_lifecycle() {
        let store = test_store();
        let id = new_candidate(&store);

        let started = start(&store, id);
        assert_eq!(started.status(), CandidateStatus::Processing);
        assert_eq!(started.attempt_count, 1);

        let done = store.complete(id, 1, &sample_result(8.5)).unwrap();
        assert_eq!(done.status(), CandidateStatus::Done);
        assert_eq!(done.result(), Some(&sample_result(8.5)));

        let view = store.result_view(id).unwrap();
        assert_eq!(view.fit_score, Some(8.5));
        assert_eq!(view.structured_data.unwrap().skills, vec!["Rust"]);
    }

    #[test]
    fn test_complete_requires_processing() {
        let store = test_store();
        let id = new_candidate(&store);
        match store.complete(id, 0, &sample_result(5.0)) {
            Err(StoreError::InvalidTransition { from, to, .. }) => {
                assert_eq!(from, CandidateStatus::Pending);
                assert_eq!(to, CandidateStatus::Done);
            }
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
        assert!(store.result_view(id).unwrap().fit_score.is_none());
    }

    #[test]
    fn test_recommit_done_is_idempotent() {
        let store = test_store();
        let id = new_candidate(&store);
        start(&store, id);
        store.complete(id, 1, &sample_result(7.0)).unwrap();
        let again = store.complete(id, 1, &sample_result(7.0)).unwrap();
        assert_eq!(again.result(), Some(&sample_result(7.0)));
        assert_eq!(again.attempt_count, 1);
    }

    #[test]
    fn test_failed_is_terminal() {
        let store = test_store();
        let id = new_candidate(&store);
        start(&store, id);
        store.fail(id, 1).unwrap();

        assert!(matches!(
            store.begin_attempt(id, 3).unwrap(),
            Claim::Skipped(ref c) if c.status() == CandidateStatus::Failed
        ));
        assert!(matches!(
            store.complete(id, 1, &sample_result(9.0)),
            Err(StoreError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.fail(id, 1),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_superseded_attempt_is_refused() {
        let store = test_store();
        let id = new_candidate(&store);
        start(&store, id);
        start(&store, id);

        match store.fail(id, 1) {
            Err(StoreError::Superseded {
                attempt, current, ..
            }) => {
                assert_eq!(attempt, 1);
                assert_eq!(current, 2);
            }
            other => panic!("Expected Superseded, got {:?}", other),
        }
        assert!(matches!(
            store.complete(id, 1, &sample_result(6.0)),
            Err(StoreError::Superseded { .. })
        ));
        assert_eq!(store.get(id).unwrap().status(), CandidateStatus::Processing);

        let done = store.complete(id, 2, &sample_result(6.0)).unwrap();
        assert_eq!(done.status(), CandidateStatus::Done);
        assert_eq!(done.attempt_count, 2);
    }

    #[test]
    fn test_attempt_limit() {
        let store = test_store();
        let id = new_candidate(&store);
        for expected in 1..=3 {
            assert_eq!(start(&store, id).attempt_count, expected);
        }
        match store.begin_attempt(id, 3).unwrap() {
            Claim::Exhausted(c) => assert_eq!(c.attempt_count, 3),
            other => panic!("Expected Exhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_reset_for_reevaluation() {
        let store = test_store();
        let id = new_candidate(&store);
        start(&store, id);

        assert!(matches!(
            store.reset_for_reevaluation(id),
            Err(StoreError::InvalidTransition {
                from: CandidateStatus::Processing,
                ..
            })
        ));

        store.complete(id, 1, &sample_result(4.0)).unwrap();
        let reset = store.reset_for_reevaluation(id).unwrap();
        assert_eq!(reset.status(), CandidateStatus::Pending);
        assert_eq!(reset.attempt_count, 0);
        assert!(reset.result().is_none());
    }

    #[test]
    fn test_failure_audit_trail() {
        let store = test_store();
        let id = new_candidate(&store);
        store
            .record_failure(&FailureEvent {
                id,
                attempt: 1,
                stage: "evaluation",
                cause: "timed out after 120s",
                retryable: true,
                terminal: false,
            })
            .unwrap();

        let failures = store.failures(id).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, "evaluation");
        assert!(failures[0].retryable);

        // Failure causes never leak into the result view.
        let view = serde_json::to_string(&store.result_view(id).unwrap()).unwrap();
        assert!(!view.contains("timed out"));
    }

    #[test]
    fn test_list_and_unfinished() {
        let store = test_store();
        let a = new_candidate(&store);
        let b = new_candidate(&store);
        let c = new_candidate(&store);
        start(&store, b);
        start(&store, c);
        store.fail(c, 1).unwrap();

        let (all, total) = store.list(&ListFilter::default()).unwrap();
        assert_eq!(total, 3);
        assert_eq!(all.len(), 3);

        let (failed, total) = store
            .list(&ListFilter {
                status: Some(CandidateStatus::Failed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(failed[0].id, c);

        let mut unfinished = store.unfinished().unwrap();
        unfinished.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(unfinished, expected);
        assert_eq!(store.count(CandidateStatus::Processing).unwrap(), 1);
    }
}
