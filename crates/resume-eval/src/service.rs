//! Operations exposed to collaborators: upload, status and result reads,
//! re-evaluation and start-up recovery.
//!
//! Reads never expose failure causes; those stay in the audit trail
//! ([`CandidateService::failures`]).

use tracing::{info, warn};

use crate::candidate::{CandidateId, CandidateStatus, ResultView, StatusView};
use crate::error::{ResumeEvalError, Result};
use crate::sanitize;
use crate::storage::CandidateStorage;
use crate::store::{FailureRecord, ListFilter, NewCandidate, StatusStore};
use crate::worker::{Job, JobQueue};

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Clone)]
pub struct CandidateService {
    store: StatusStore,
    storage: CandidateStorage,
    queue: JobQueue,
}

impl CandidateService {
    pub fn new(store: StatusStore, storage: CandidateStorage, queue: JobQueue) -> Self {
        Self {
            store,
            storage,
            queue,
        }
    }

    /// Stores the PDF under a fresh id, creates the `PENDING` record and
    /// enqueues the first job.
    ///
    /// If enqueueing fails the record stays `PENDING` and is picked up by
    /// [`recover`](Self::recover) on the next start.
    pub async fn upload(&self, filename: &str, pdf_bytes: &[u8]) -> Result<StatusView> {
        if !pdf_bytes.starts_with(PDF_MAGIC) {
            return Err(ResumeEvalError::InvalidUpload(
                "file is not a PDF document".to_string(),
            ));
        }

        let id = CandidateId::new();
        let original_filename = sanitize::display_filename(filename);
        let stored_path = self.storage.save_resume(id, pdf_bytes)?;

        let candidate = match self.store.create(&NewCandidate {
            id,
            original_filename: original_filename.clone(),
            stored_path,
        }) {
            Ok(candidate) => candidate,
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(self.storage.candidate_dir(id)) {
                    warn!(candidate_id = %id, error = %cleanup, "Could not remove orphaned upload");
                }
                return Err(e.into());
            }
        };

        info!(
            candidate_id = %id,
            filename = %original_filename,
            bytes = pdf_bytes.len(),
            "Resume uploaded"
        );
        self.queue.submit(Job::new(id)).await?;
        Ok(candidate.status_view())
    }

    pub fn status(&self, id: CandidateId) -> Result<StatusView> {
        Ok(self.store.status_view(id)?)
    }

    pub fn result(&self, id: CandidateId) -> Result<ResultView> {
        Ok(self.store.result_view(id)?)
    }

    /// Newest first, with the total number of matches.
    pub fn list(&self, filter: &ListFilter) -> Result<(Vec<StatusView>, u64)> {
        let (candidates, total) = self.store.list(filter)?;
        Ok((
            candidates.iter().map(|c| c.status_view()).collect(),
            total,
        ))
    }

    /// Audit trail for operators.
    pub fn failures(&self, id: CandidateId) -> Result<Vec<FailureRecord>> {
        Ok(self.store.failures(id)?)
    }

    /// Back to `PENDING` with results and derived artifacts cleared, then
    /// enqueued. Refused while the candidate is `PROCESSING`. The stored
    /// PDF is kept.
    ///
    /// A `PENDING` candidate already has a job queued and has nothing to
    /// clear, so it is returned as is and not enqueued a second time.
    pub async fn reevaluate(&self, id: CandidateId) -> Result<StatusView> {
        let current = self.store.get(id)?;
        if current.status() == CandidateStatus::Pending {
            info!(
                candidate_id = %id,
                "Candidate is already queued, re-evaluation has nothing to do"
            );
            return Ok(current.status_view());
        }

        let candidate = self.store.reset_for_reevaluation(id)?;
        self.storage.clear_derived(id)?;
        info!(candidate_id = %id, "Re-evaluation requested");
        self.queue.submit(Job::new(id)).await?;
        Ok(candidate.status_view())
    }

    /// Enqueues every `PENDING` or `PROCESSING` candidate, oldest first, and
    /// returns their ids. `PROCESSING` ones were abandoned by a previous run.
    pub async fn recover(&self) -> Result<Vec<CandidateId>> {
        let ids = self.store.unfinished()?;
        for id in &ids {
            self.queue.submit(Job::new(*id)).await?;
        }
        if !ids.is_empty() {
            info!(count = ids.len(), "Re-enqueued unfinished candidates");
        }
        Ok(ids)
    }
}
