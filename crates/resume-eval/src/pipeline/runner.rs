use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::candidate::{Candidate, CandidateId, CandidateResult, Evaluation};
use crate::error::ExtractionError;
use crate::evaluator::{EvaluationError, Evaluator};
use crate::parser::{self, StructuredRecord};
use crate::processor::{CancelFlag, Extracted, ExtractionChain, ExtractionMethod, OcrProcessor};
use crate::sanitize;
use crate::storage::{Artifact, CandidateStorage};
use crate::store::{Claim, FailureEvent, StatusStore, StoreError};
use crate::worker::job::{Job, JobOutcome, JobResult};

use super::config::PipelineConfig;
use super::context::AttemptContext;
use super::error::{Stage, StageError};
use super::progress::{CandidateEvent, CandidatePhase, ProgressReporter};

/// In-place retries of the persistence step before the job fails.
const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BACKOFF: Duration = Duration::from_millis(100);

/// Shape of `evaluation.json`.
#[derive(Serialize)]
struct EvaluationArtifact<'a> {
    #[serde(flatten)]
    evaluation: &'a Evaluation,
    model_used: &'a str,
    extraction_method: ExtractionMethod,
    evaluated_at: DateTime<Utc>,
}

/// Candidates with a delivery currently being served by this pipeline.
#[derive(Default)]
struct InFlight(Mutex<HashSet<CandidateId>>);

impl InFlight {
    fn ids(&self) -> std::sync::MutexGuard<'_, HashSet<CandidateId>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `None` if the candidate is already in flight.
    fn enter(&self, id: CandidateId) -> Option<InFlightGuard<'_>> {
        let inserted = self.ids().insert(id);
        inserted.then(|| InFlightGuard { set: self, id })
    }
}

struct InFlightGuard<'a> {
    set: &'a InFlight,
    id: CandidateId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.ids().remove(&self.id);
    }
}

/// Runs one candidate job through extraction, parsing, evaluation and
/// persistence, and drives the status store through the attempt.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    store: StatusStore,
    storage: CandidateStorage,
    extraction: Arc<ExtractionChain>,
    evaluator: Arc<dyn Evaluator>,
    evaluation_permits: Arc<Semaphore>,
    in_flight: InFlight,
}

impl Pipeline {
    /// Production constructor: builds the extraction chain and artifact
    /// storage from config.
    pub fn from_config(
        config: Arc<PipelineConfig>,
        store: StatusStore,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        let ocr = config
            .ocr_enabled
            .then(|| OcrProcessor::new(&config.ocr_languages, config.ocr_dpi));
        let extraction =
            ExtractionChain::standard(config.min_text_chars, config.pdftotext_enabled, ocr);
        let storage = CandidateStorage::new(&config.storage_root);
        Self::new(config, store, storage, extraction, evaluator)
    }

    /// Inject specific sub-components.
    pub fn new(
        config: Arc<PipelineConfig>,
        store: StatusStore,
        storage: CandidateStorage,
        extraction: ExtractionChain,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        let evaluation_permits = Arc::new(Semaphore::new(config.max_concurrent_evaluations.max(1)));
        Self {
            config,
            store,
            storage,
            extraction: Arc::new(extraction),
            evaluator,
            evaluation_permits,
            in_flight: InFlight::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    pub fn storage(&self) -> &CandidateStorage {
        &self.storage
    }

    /// Serve one delivery of a job. Never fails: every problem ends up as a
    /// [`JobOutcome`] and, where a candidate exists, in its audit trail.
    pub async fn run(&self, job: &Job, progress: &dyn ProgressReporter) -> JobResult {
        let span = info_span!("pipeline",
            candidate_id = %job.candidate_id,
            delivery = job.delivery,
        );
        self.run_job(job, progress).instrument(span).await
    }

    async fn run_job(&self, job: &Job, progress: &dyn ProgressReporter) -> JobResult {
        // At most one attempt per candidate at a time in this process.
        let Some(_in_flight) = self.in_flight.enter(job.candidate_id) else {
            info!("Another delivery of this candidate is running, skipping");
            return JobResult::new(job, 0, JobOutcome::InFlight);
        };

        let claim = {
            let _step = info_span!("claim").entered();
            self.store
                .begin_attempt(job.candidate_id, self.config.retry.max_attempts)
        };

        let candidate = match claim {
            Ok(Claim::Started(candidate)) => candidate,
            Ok(Claim::Skipped(candidate)) => {
                info!(status = %candidate.status(), "Candidate already settled, skipping delivery");
                return JobResult::new(
                    job,
                    candidate.attempt_count,
                    JobOutcome::Skipped {
                        status: candidate.status(),
                    },
                );
            }
            Ok(Claim::Exhausted(candidate)) => {
                return self.fail_exhausted(job, candidate, progress);
            }
            Err(StoreError::NotFound(_)) => {
                warn!("No candidate record for job");
                return JobResult::new(job, 0, JobOutcome::Missing);
            }
            Err(e) => {
                error!(error = %e, "Could not start attempt");
                return JobResult::new(
                    job,
                    0,
                    JobOutcome::Failed {
                        stage: Stage::Claim,
                        error: e.to_string(),
                    },
                );
            }
        };

        let ctx = AttemptContext::new(job.clone(), candidate);
        info!(attempt = ctx.attempt(), "Attempt started");

        match self.run_attempt(&ctx, progress).await {
            Ok(result) => {
                let fit_score = result.evaluation.fit_score.value();
                let recommendation = result.evaluation.recommendation;
                info!(
                    attempt = ctx.attempt(),
                    fit_score,
                    recommendation = %recommendation,
                    elapsed_ms = ctx.elapsed().as_millis() as u64,
                    "Candidate evaluated"
                );
                progress.report(ctx.event(
                    CandidatePhase::Done,
                    format!("{} ({})", recommendation, fit_score),
                ));
                JobResult::new(
                    job,
                    ctx.attempt(),
                    JobOutcome::Completed {
                        fit_score,
                        recommendation,
                    },
                )
            }
            Err(e) => self.handle_failure(&ctx, e, progress),
        }
    }

    /// The four stages, strictly in order.
    async fn run_attempt(
        &self,
        ctx: &AttemptContext,
        progress: &dyn ProgressReporter,
    ) -> Result<CandidateResult, StageError> {
        // Step 1: Extract text
        progress.report(ctx.event(CandidatePhase::Extracting, "Extracting text from resume..."));
        let extracted = self
            .step_extract(&ctx.candidate)
            .instrument(info_span!("extraction"))
            .await?;

        // Step 2: Parse structured fields
        let structured = {
            let _step = info_span!("parsing").entered();
            progress.report(ctx.event(CandidatePhase::Parsing, "Parsing structured fields..."));
            self.step_parse(&extracted)
        };

        // Step 3: Evaluate against the job description
        progress.report(ctx.event(CandidatePhase::Evaluating, "Evaluating candidate fit..."));
        let evaluation = self
            .step_evaluate(&extracted.text, &structured)
            .instrument(info_span!("evaluation"))
            .await?;

        let result = CandidateResult {
            raw_text: extracted.text,
            extraction_method: extracted.method,
            structured,
            evaluation,
            model_used: self.evaluator.model_name().to_string(),
        };

        // Step 4: Persist artifacts and commit DONE
        progress.report(ctx.event(CandidatePhase::Persisting, "Saving results..."));
        self.step_persist(ctx, &result)
            .instrument(info_span!("persistence"))
            .await?;

        Ok(result)
    }

    async fn step_extract(&self, candidate: &Candidate) -> Result<Extracted, StageError> {
        let path = candidate.stored_path.clone();
        let pdf_bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExtractionError::SourceMissing {
                path: path.clone(),
                source: e,
            },
            _ => ExtractionError::Aborted(format!(
                "reading {}: {}",
                sanitize::redact_path(&path),
                e
            )),
        })?;

        let chain = Arc::clone(&self.extraction);
        let span = tracing::Span::current();
        let limit = self.config.extraction_timeout;
        let cancel = CancelFlag::new();
        let task = {
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                let _entered = span.enter();
                chain.extract_cancellable(&pdf_bytes, &cancel)
            })
        };

        // A blocking task cannot be aborted; the flag stops it at the next
        // strategy or OCR page and its output is discarded.
        let extracted = match tokio::time::timeout(limit, task).await {
            Err(_) => {
                cancel.cancel();
                return Err(ExtractionError::Timeout(limit).into());
            }
            Ok(Err(join_error)) => {
                return Err(ExtractionError::Aborted(join_error.to_string()).into())
            }
            Ok(Ok(result)) => result?,
        };

        debug!(
            method = %extracted.method,
            chars = extracted.text.chars().count(),
            "Text extracted"
        );
        Ok(extracted)
    }

    fn step_parse(&self, extracted: &Extracted) -> StructuredRecord {
        let record = parser::parse(&extracted.text);
        debug!(
            name_found = record.name.is_some(),
            email_found = record.email.is_some(),
            phone_found = record.phone.is_some(),
            skills = record.skills.len(),
            "Structured fields parsed"
        );
        record
    }

    async fn step_evaluate(
        &self,
        raw_text: &str,
        structured: &StructuredRecord,
    ) -> Result<Evaluation, StageError> {
        // Global ceiling on concurrent model calls across all workers.
        let _permit = self.evaluation_permits.acquire().await.map_err(|_| {
            EvaluationError::NotConfigured("evaluation limiter closed".to_string())
        })?;

        let limit = self.config.evaluation_timeout;
        match tokio::time::timeout(limit, self.evaluator.evaluate(raw_text, structured)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(EvaluationError::Timeout(limit).into()),
        }
    }

    async fn step_persist(
        &self,
        ctx: &AttemptContext,
        result: &CandidateResult,
    ) -> Result<(), StageError> {
        // Leave the artifacts alone if another attempt owns the candidate.
        // The conditional commit below is what actually enforces ownership.
        if let Some(current) = self.replacing_attempt(ctx) {
            return Err(StageError::Superseded {
                attempt: ctx.attempt(),
                current,
            });
        }

        let mut try_number = 1;
        loop {
            match self.persist_once(ctx.id(), ctx.attempt(), result) {
                Ok(()) => return Ok(()),
                Err(e @ StageError::Superseded { .. }) => return Err(e),
                Err(e) if try_number < PERSIST_ATTEMPTS => {
                    warn!(try_number, error = %e, "Persisting result failed, retrying");
                    tokio::time::sleep(PERSIST_BACKOFF * try_number).await;
                    try_number += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Artifacts first, then the `DONE` commit. Every write overwrites, so
    /// running this twice leaves the same state as running it once.
    fn persist_once(
        &self,
        id: CandidateId,
        attempt: u32,
        result: &CandidateResult,
    ) -> Result<(), StageError> {
        self.storage
            .write_text(id, Artifact::ExtractedText, &result.raw_text)?;
        self.storage
            .write_json(id, Artifact::Structured, &result.structured)?;
        self.storage.write_json(
            id,
            Artifact::Evaluation,
            &EvaluationArtifact {
                evaluation: &result.evaluation,
                model_used: &result.model_used,
                extraction_method: result.extraction_method,
                evaluated_at: Utc::now(),
            },
        )?;
        self.storage
            .write_text(id, Artifact::Summary, &result.evaluation.summary_text)?;
        self.store.complete(id, attempt, result)?;
        Ok(())
    }

    fn handle_failure(
        &self,
        ctx: &AttemptContext,
        err: StageError,
        progress: &dyn ProgressReporter,
    ) -> JobResult {
        let attempt = ctx.attempt();
        let stage = err.stage();
        let cause = err.to_string();
        let retryable = err.is_retryable();

        if let Some(current_attempt) = self.superseded_by(ctx, &err) {
            warn!(
                attempt,
                current_attempt,
                stage = %stage,
                cause = %cause,
                "Attempt was superseded, leaving candidate to the current attempt"
            );
            self.audit(ctx.id(), attempt, stage, &cause, retryable, false);
            return JobResult::new(&ctx.job, attempt, JobOutcome::Superseded { current_attempt });
        }

        if retryable && self.config.retry.allows_another(attempt) {
            let delay = self.config.retry.backoff(attempt);
            warn!(
                attempt,
                stage = %stage,
                cause = %cause,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, retrying"
            );
            self.audit(ctx.id(), attempt, stage, &cause, true, false);
            progress.report(ctx.event(
                CandidatePhase::Retrying,
                format!("{} failed, retrying in {:?}", stage, delay),
            ));
            return JobResult::new(
                &ctx.job,
                attempt,
                JobOutcome::Retrying {
                    stage,
                    error: cause,
                    delay,
                },
            );
        }

        error!(
            attempt,
            stage = %stage,
            cause = %cause,
            retryable,
            "Attempt failed, candidate failed"
        );
        self.audit(ctx.id(), attempt, stage, &cause, retryable, true);
        match self.store.fail(ctx.id(), attempt) {
            Ok(_) => {}
            Err(StoreError::Superseded { current, .. }) => {
                warn!(
                    current_attempt = current,
                    "Attempt was superseded before it could fail the candidate"
                );
                return JobResult::new(
                    &ctx.job,
                    attempt,
                    JobOutcome::Superseded {
                        current_attempt: current,
                    },
                );
            }
            Err(e) => error!(error = %e, "Could not mark candidate as failed"),
        }
        progress.report(ctx.event(CandidatePhase::Failed, format!("{} failed", stage)));
        JobResult::new(
            &ctx.job,
            attempt,
            JobOutcome::Failed {
                stage,
                error: cause,
            },
        )
    }

    /// A redelivered job whose candidate already used every attempt.
    fn fail_exhausted(
        &self,
        job: &Job,
        candidate: Candidate,
        progress: &dyn ProgressReporter,
    ) -> JobResult {
        let cause = format!(
            "attempt limit of {} reached before delivery {}",
            self.config.retry.max_attempts, job.delivery
        );
        warn!(attempt_count = candidate.attempt_count, "{}", cause);
        self.audit(
            candidate.id,
            candidate.attempt_count,
            Stage::Claim,
            &cause,
            false,
            true,
        );
        if let Err(e) = self.store.fail(candidate.id, candidate.attempt_count) {
            error!(error = %e, "Could not mark candidate as failed");
        }
        progress.report(CandidateEvent::new(
            candidate.id,
            candidate.attempt_count,
            CandidatePhase::Failed,
            "attempt limit reached",
        ));
        JobResult::new(
            job,
            candidate.attempt_count,
            JobOutcome::Failed {
                stage: Stage::Claim,
                error: cause,
            },
        )
    }

    /// The attempt that replaced this one, if the store no longer regards
    /// this one as current. Read errors count as still current; the
    /// conditional write decides in that case.
    fn superseded_by(&self, ctx: &AttemptContext, err: &StageError) -> Option<u32> {
        match err {
            StageError::Superseded { current, .. } => Some(*current),
            _ => self.replacing_attempt(ctx),
        }
    }

    fn replacing_attempt(&self, ctx: &AttemptContext) -> Option<u32> {
        match self.store.get(ctx.id()) {
            Ok(candidate) if candidate.attempt_count != ctx.attempt() => {
                Some(candidate.attempt_count)
            }
            _ => None,
        }
    }

    /// Writes the failure to the audit table and the candidate's `error.log`.
    /// Problems writing either are logged and otherwise ignored.
    fn audit(
        &self,
        id: CandidateId,
        attempt: u32,
        stage: Stage,
        cause: &str,
        retryable: bool,
        terminal: bool,
    ) {
        let event = FailureEvent {
            id,
            attempt,
            stage: stage.as_str(),
            cause,
            retryable,
            terminal,
        };
        if let Err(e) = self.store.record_failure(&event) {
            warn!(error = %e, "Could not record failure in audit trail");
        }

        let line = format!(
            "{} attempt={} stage={} retryable={} terminal={} {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            attempt,
            stage,
            retryable,
            terminal,
            cause
        );
        if let Err(e) = self.storage.append_text(id, Artifact::ErrorLog, &line) {
            warn!(error = %e, "Could not append to error log");
        }
    }
}
