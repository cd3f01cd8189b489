mod common;

use std::sync::Arc;
use std::time::Duration;

use resume_eval::candidate::{CandidateStatus, Recommendation};
use resume_eval::error::WorkerError;
use resume_eval::evaluator::EvaluationError;
use resume_eval::pipeline::{BroadcastProgress, CandidatePhase, NoopProgress};
use resume_eval::store::NewCandidate;
use resume_eval::worker::{Job, JobOutcome, WorkerPool};
use resume_eval::CandidateId;

use common::{text_pdf, verdict, ScriptedEvaluator, TestHarness};

const RESUME: &str = "Maria Lopez, maria@example.org, Skills: Go, Docker";

fn seed(harness: &TestHarness) -> CandidateId {
    let id = CandidateId::new();
    let stored_path = harness.storage.save_resume(id, &text_pdf(&[RESUME])).unwrap();
    harness
        .store
        .create(&NewCandidate {
            id,
            original_filename: "maria.pdf".to_string(),
            stored_path,
        })
        .unwrap();
    id
}

#[tokio::test]
async fn test_pool_create_and_shutdown() {
    let harness = TestHarness::new();
    let evaluator = Arc::new(ScriptedEvaluator::new(vec![Ok(verdict(
        5.0,
        Recommendation::Maybe,
        "unused",
    ))]));
    let pool = WorkerPool::new(
        harness.pipeline(harness.config(3), evaluator),
        4,
        Arc::new(NoopProgress),
    );

    assert!(!pool.is_shutdown());
    pool.shutdown();
    assert!(pool.is_shutdown());

    tokio::time::timeout(Duration::from_secs(5), pool.wait())
        .await
        .expect("workers should stop within a poll interval");
}

#[tokio::test]
async fn test_submit_after_shutdown_is_rejected() {
    let harness = TestHarness::new();
    let evaluator = Arc::new(ScriptedEvaluator::new(vec![Ok(verdict(
        5.0,
        Recommendation::Maybe,
        "unused",
    ))]));
    let mut pool = WorkerPool::new(
        harness.pipeline(harness.config(3), evaluator),
        1,
        Arc::new(NoopProgress),
    );
    let queue = pool.queue();
    pool.shutdown();

    let id = seed(&harness);
    assert!(matches!(
        pool.submit(Job::new(id)).await,
        Err(WorkerError::ShuttingDown)
    ));
    assert!(matches!(
        queue.submit(Job::new(id)).await,
        Err(WorkerError::ShuttingDown)
    ));

    assert!(pool.try_recv_result().is_none());

    pool.wait().await;
    assert_eq!(
        harness.store.get(id).unwrap().status(),
        CandidateStatus::Pending
    );
}

#[tokio::test]
async fn test_retry_is_redelivered_after_backoff() {
    let harness = TestHarness::new();
    let evaluator = Arc::new(ScriptedEvaluator::new(vec![
        Err(EvaluationError::RateLimited {
            status: 429,
            message: "slow down".to_string(),
        }),
        Ok(verdict(7.0, Recommendation::Interview, "Good fit.")),
    ]));
    let progress = Arc::new(BroadcastProgress::new(64));
    let mut events = progress.subscribe();
    let mut pool = WorkerPool::new(
        harness.pipeline(harness.config(3), evaluator),
        2,
        Arc::clone(&progress) as _,
    );

    let id = seed(&harness);
    pool.submit(Job::new(id)).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(10), pool.recv_result())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.candidate_id, id);
    assert_eq!(first.delivery, 1);
    assert_eq!(first.attempt, 1);
    match &first.outcome {
        JobOutcome::Retrying { stage, delay, .. } => {
            assert_eq!(stage.as_str(), "evaluation");
            assert_eq!(*delay, Duration::from_millis(10));
        }
        other => panic!("Expected Retrying, got {:?}", other),
    }
    assert!(!first.outcome.is_final());

    let second = tokio::time::timeout(Duration::from_secs(10), pool.recv_result())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.delivery, 2);
    assert_eq!(second.attempt, 2);
    assert!(second.is_success());

    pool.shutdown();
    pool.wait().await;

    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.candidate_id, id);
        phases.push(event.phase);
    }
    assert_eq!(phases.first(), Some(&CandidatePhase::Queued));
    assert!(phases.contains(&CandidatePhase::Retrying));
    assert_eq!(phases.last(), Some(&CandidatePhase::Done));
    assert_eq!(
        phases
            .iter()
            .filter(|p| **p == CandidatePhase::Queued)
            .count(),
        2
    );
}

#[tokio::test]
async fn test_jobs_for_settled_candidates_are_skipped() {
    let harness = TestHarness::new();
    let evaluator = Arc::new(ScriptedEvaluator::new(vec![Ok(verdict(
        9.0,
        Recommendation::Interview,
        "Excellent.",
    ))]));
    let mut pool = WorkerPool::new(
        harness.pipeline(harness.config(3), Arc::clone(&evaluator) as _),
        1,
        Arc::new(NoopProgress),
    );

    let id = seed(&harness);
    pool.submit(Job::new(id)).await.unwrap();
    let first = pool.recv_result().await.unwrap();
    assert!(first.is_success());

    // Duplicate delivery of an already finished candidate.
    pool.submit(Job::new(id)).await.unwrap();
    let duplicate = pool.recv_result().await.unwrap();
    assert!(matches!(
        duplicate.outcome,
        JobOutcome::Skipped {
            status: CandidateStatus::Done
        }
    ));
    assert_eq!(evaluator.calls(), 1);
    assert_eq!(harness.store.get(id).unwrap().attempt_count, 1);

    // Unknown id.
    pool.submit(Job::new(CandidateId::new())).await.unwrap();
    let missing = pool.recv_result().await.unwrap();
    assert!(matches!(missing.outcome, JobOutcome::Missing));

    pool.shutdown();
    pool.wait().await;
}

#[tokio::test]
async fn test_two_jobs_for_one_candidate_run_one_attempt() {
    let harness = TestHarness::new();
    let evaluator = Arc::new(ScriptedEvaluator::with_delay(
        vec![Ok(verdict(8.0, Recommendation::Interview, "Solid."))],
        Duration::from_millis(150),
    ));
    let mut config = harness.config(3);
    config.evaluation_timeout = Duration::from_secs(5);
    let mut pool = WorkerPool::new(
        harness.pipeline(config, Arc::clone(&evaluator) as _),
        2,
        Arc::new(NoopProgress),
    );

    let id = seed(&harness);
    pool.submit(Job::new(id)).await.unwrap();
    pool.submit(Job::new(id)).await.unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let result = tokio::time::timeout(Duration::from_secs(10), pool.recv_result())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.candidate_id, id);
        outcomes.push(result.outcome);
    }

    assert_eq!(outcomes[0], JobOutcome::InFlight);
    assert!(matches!(outcomes[1], JobOutcome::Completed { .. }));
    assert_eq!(evaluator.calls(), 1);

    let candidate = harness.store.get(id).unwrap();
    assert_eq!(candidate.status(), CandidateStatus::Done);
    assert_eq!(candidate.attempt_count, 1);

    pool.shutdown();
    pool.wait().await;
}
