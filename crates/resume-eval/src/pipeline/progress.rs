//! Per-candidate progress events for observers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::candidate::CandidateId;

/// Phase of a candidate's processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CandidatePhase {
    Queued,
    Extracting,
    Parsing,
    Evaluating,
    Persisting,
    Retrying,
    Done,
    Failed,
}

impl fmt::Display for CandidatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidatePhase::Queued => write!(f, "Queued"),
            CandidatePhase::Extracting => write!(f, "Extracting text"),
            CandidatePhase::Parsing => write!(f, "Parsing"),
            CandidatePhase::Evaluating => write!(f, "Evaluating"),
            CandidatePhase::Persisting => write!(f, "Persisting"),
            CandidatePhase::Retrying => write!(f, "Retrying"),
            CandidatePhase::Done => write!(f, "Done"),
            CandidatePhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress event for one candidate. Never carries resume text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEvent {
    pub candidate_id: CandidateId,
    /// Attempt number; 0 before the first attempt starts.
    pub attempt: u32,
    pub phase: CandidatePhase,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl CandidateEvent {
    pub fn new(
        candidate_id: CandidateId,
        attempt: u32,
        phase: CandidatePhase,
        message: impl Into<String>,
    ) -> Self {
        Self {
            candidate_id,
            attempt,
            phase,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: CandidateEvent);
}

/// No-op reporter for tests and the one-shot CLI.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: CandidateEvent) {}
}

/// Fans events out over a broadcast channel. Events sent while nobody is
/// subscribed are dropped.
#[derive(Clone)]
pub struct BroadcastProgress {
    sender: broadcast::Sender<CandidateEvent>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CandidateEvent> {
        self.sender.subscribe()
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: CandidateEvent) {
        let _ = self.sender.send(event);
    }
}
