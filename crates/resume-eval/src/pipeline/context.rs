use std::time::{Duration, Instant};

use crate::candidate::{Candidate, CandidateId};
use crate::worker::job::Job;

use super::progress::{CandidateEvent, CandidatePhase};

/// One claimed attempt: the delivery being served and the record as it was
/// claimed.
pub struct AttemptContext {
    pub job: Job,

    /// `attempt_count` includes this attempt.
    pub candidate: Candidate,

    started: Instant,
}

impl AttemptContext {
    pub fn new(job: Job, candidate: Candidate) -> Self {
        Self {
            job,
            candidate,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> CandidateId {
        self.candidate.id
    }

    pub fn attempt(&self) -> u32 {
        self.candidate.attempt_count
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn event(&self, phase: CandidatePhase, message: impl Into<String>) -> CandidateEvent {
        CandidateEvent::new(self.id(), self.attempt(), phase, message)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;

    use super::*;
    use crate::candidate::CandidateState;

    #[test]
    fn test_event_carries_attempt() {
        let now = Utc::now();
        let candidate = Candidate {
            id: CandidateId::new(),
            original_filename: "cv.pdf".to_string(),
            stored_path: PathBuf::from("/tmp/cv.pdf"),
            state: CandidateState::Processing,
            attempt_count: 2,
            created_at: now,
            updated_at: now,
        };
        let ctx = AttemptContext::new(Job::new(candidate.id), candidate);

        let event = ctx.event(CandidatePhase::Evaluating, "scoring");
        assert_eq!(event.candidate_id, ctx.id());
        assert_eq!(event.attempt, 2);
        assert_eq!(event.phase, CandidatePhase::Evaluating);
        assert_eq!(event.message, "scoring");
    }
}
