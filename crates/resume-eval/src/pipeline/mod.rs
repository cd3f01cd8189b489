//! The per-candidate job runner.
//!
//! One [`Pipeline::run`] call serves one delivery of a job: it claims the
//! candidate (`PENDING`/`PROCESSING` to `PROCESSING`, one more attempt),
//! runs extraction, parsing, evaluation and persistence in order, and
//! settles the attempt as `DONE`, `FAILED`, or a retry with backoff.

pub mod config;
pub mod context;
pub mod error;
pub mod progress;
pub mod retry;
pub mod runner;

pub use config::PipelineConfig;
pub use context::AttemptContext;
pub use error::{Stage, StageError};
pub use progress::{
    BroadcastProgress, CandidateEvent, CandidatePhase, NoopProgress, ProgressReporter,
};
pub use retry::RetryPolicy;
pub use runner::Pipeline;
