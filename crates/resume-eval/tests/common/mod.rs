//! Shared test utilities for resume-eval integration tests.
//!
//! This module provides:
//! - `TestHarness` with an in-memory status store and a temp storage root
//! - `text_pdf` for building PDFs with a literal text layer
//! - Scripted evaluators standing in for the model service

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, Stream};
use tempfile::TempDir;

use resume_eval::candidate::{CandidateId, Evaluation, FitScore, Recommendation};
use resume_eval::db::Database;
use resume_eval::evaluator::{EvaluationError, Evaluator};
use resume_eval::parser::StructuredRecord;
use resume_eval::pipeline::{NoopProgress, Pipeline, PipelineConfig, RetryPolicy};
use resume_eval::service::CandidateService;
use resume_eval::storage::CandidateStorage;
use resume_eval::store::StatusStore;
use resume_eval::worker::{JobResult, WorkerPool};

/// Isolated environment: temp storage root plus an in-memory database.
pub struct TestHarness {
    temp_dir: TempDir,
    pub store: StatusStore,
    pub storage: CandidateStorage,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = StatusStore::new(Database::open_in_memory().expect("Failed to open database"));
        let storage = CandidateStorage::new(temp_dir.path());
        Self {
            temp_dir,
            store,
            storage,
        }
    }

    pub fn root(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// Text layer only, fast backoff, short timeouts.
    pub fn config(&self, max_attempts: u32) -> PipelineConfig {
        PipelineConfig {
            storage_root: self.root(),
            min_text_chars: 20,
            pdftotext_enabled: false,
            ocr_enabled: false,
            ocr_languages: vec!["eng".to_string()],
            ocr_dpi: 300,
            extraction_timeout: Duration::from_secs(10),
            evaluation_timeout: Duration::from_millis(200),
            max_concurrent_evaluations: 2,
            retry: RetryPolicy {
                max_attempts,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(40),
            },
        }
    }

    pub fn pipeline(&self, config: PipelineConfig, evaluator: Arc<dyn Evaluator>) -> Arc<Pipeline> {
        Arc::new(Pipeline::from_config(
            Arc::new(config),
            self.store.clone(),
            evaluator,
        ))
    }

    /// Worker pool and service over this harness's store and storage.
    pub fn start(
        &self,
        config: PipelineConfig,
        evaluator: Arc<dyn Evaluator>,
        workers: usize,
    ) -> (WorkerPool, CandidateService) {
        let pool = WorkerPool::new(
            self.pipeline(config, evaluator),
            workers,
            Arc::new(NoopProgress),
        );
        let service = CandidateService::new(self.store.clone(), self.storage.clone(), pool.queue());
        (pool, service)
    }
}

/// Collects results until every id in `ids` has a final outcome.
pub async fn settle(pool: &mut WorkerPool, ids: &[CandidateId]) -> HashMap<CandidateId, JobResult> {
    let mut settled = HashMap::new();
    while settled.len() < ids.len() {
        let result = tokio::time::timeout(Duration::from_secs(20), pool.recv_result())
            .await
            .expect("Timed out waiting for job results")
            .expect("Result channel closed");
        if result.outcome.is_final() && ids.contains(&result.candidate_id) {
            settled.insert(result.candidate_id, result);
        }
    }
    settled
}

fn escape(line: &str) -> String {
    line.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

/// One-page PDF whose text layer holds `lines`. No lines gives a blank page.
pub fn text_pdf(lines: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.new_object_id();
    let resources_id = doc.new_object_id();
    let content_id = doc.new_object_id();
    let page_id = doc.new_object_id();

    doc.objects.insert(
        font_id,
        Object::Dictionary(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        }),
    );
    doc.objects.insert(
        resources_id,
        Object::Dictionary(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        }),
    );

    let content: String = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            format!(
                "BT /F1 11 Tf 50 {} Td ({}) Tj ET\n",
                720 - (i as i64) * 14,
                escape(line)
            )
        })
        .collect();
    doc.objects.insert(
        content_id,
        Object::Stream(Stream::new(dictionary! {}, content.into_bytes())),
    );
    doc.objects.insert(
        page_id,
        Object::Dictionary(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        }),
    );
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("Failed to serialize PDF");
    bytes
}

pub fn verdict(score: f64, recommendation: Recommendation, summary: &str) -> Evaluation {
    Evaluation {
        fit_score: FitScore::new(score).expect("score in range"),
        recommendation,
        summary_text: summary.to_string(),
        strengths: vec![],
        weaknesses: vec![],
    }
}

/// Replays scripted replies in order; the last one repeats. An optional
/// delay before every reply simulates a slow model.
pub struct ScriptedEvaluator {
    replies: Mutex<VecDeque<Result<Evaluation, EvaluationError>>>,
    delay: Duration,
    calls: Mutex<u32>,
    seen_texts: Mutex<Vec<String>>,
}

impl ScriptedEvaluator {
    pub fn new(replies: Vec<Result<Evaluation, EvaluationError>>) -> Self {
        Self::with_delay(replies, Duration::ZERO)
    }

    pub fn with_delay(replies: Vec<Result<Evaluation, EvaluationError>>, delay: Duration) -> Self {
        assert!(!replies.is_empty(), "at least one scripted reply");
        Self {
            replies: Mutex::new(replies.into()),
            delay,
            calls: Mutex::new(0),
            seen_texts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }

    pub fn seen_texts(&self) -> Vec<String> {
        self.seen_texts.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Result<Evaluation, EvaluationError> {
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().cloned().unwrap()
        }
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(
        &self,
        raw_text: &str,
        _structured: &StructuredRecord,
    ) -> Result<Evaluation, EvaluationError> {
        *self.calls.lock().unwrap() += 1;
        self.seen_texts.lock().unwrap().push(raw_text.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.next_reply()
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}

/// Echoes the parsed name back in the summary, so a result can be traced
/// to the text it was computed from.
pub struct EchoEvaluator;

#[async_trait]
impl Evaluator for EchoEvaluator {
    async fn evaluate(
        &self,
        raw_text: &str,
        structured: &StructuredRecord,
    ) -> Result<Evaluation, EvaluationError> {
        // Yield so concurrent jobs interleave.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let name = structured.name.clone().unwrap_or_default();
        Ok(verdict(
            5.0 + (raw_text.len() % 5) as f64,
            Recommendation::Maybe,
            &format!("Evaluated {}", name),
        ))
    }

    fn model_name(&self) -> &str {
        "echo-model"
    }
}
