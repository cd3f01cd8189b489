pub mod job;
pub mod pool;

pub use job::{Job, JobOutcome, JobResult};
pub use pool::{JobQueue, WorkerPool};
