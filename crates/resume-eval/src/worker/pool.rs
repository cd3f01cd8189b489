use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::WorkerError;
use crate::pipeline::progress::{CandidateEvent, CandidatePhase, ProgressReporter};
use crate::pipeline::Pipeline;
use crate::worker::job::{Job, JobOutcome, JobResult};

/// How long an idle worker waits for a job before re-checking shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sending half of the shared job queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
    shutdown: Arc<AtomicBool>,
    progress: Arc<dyn ProgressReporter>,
}

impl JobQueue {
    /// Waits for queue capacity when all workers are busy.
    pub async fn submit(&self, job: Job) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ShuttingDown);
        }

        self.progress.report(CandidateEvent::new(
            job.candidate_id,
            0,
            CandidatePhase::Queued,
            format!("Queued (delivery {})", job.delivery),
        ));
        self.sender
            .send(job)
            .await
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Delivers `job` again after `delay`. A job whose delay ends after
    /// shutdown is dropped; the candidate stays `PROCESSING` and is picked
    /// up by recovery on the next start.
    pub fn requeue_after(&self, job: Job, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let candidate_id = job.candidate_id;
            if let Err(e) = queue.submit(job).await {
                debug!("Dropped retry for candidate {}: {}", candidate_id, e);
            }
        });
    }
}

pub struct WorkerPool {
    queue: JobQueue,
    result_receiver: mpsc::UnboundedReceiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawns `worker_count` worker tasks (at least one) on the current
    /// tokio runtime.
    pub fn new(
        pipeline: Arc<Pipeline>,
        worker_count: usize,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let (job_sender, job_receiver) = mpsc::channel::<Job>(worker_count * 2);
        let (result_sender, result_receiver) = mpsc::unbounded_channel::<JobResult>();
        let job_receiver = Arc::new(Mutex::new(job_receiver));
        let shutdown = Arc::new(AtomicBool::new(false));

        let queue = JobQueue {
            sender: job_sender,
            shutdown: Arc::clone(&shutdown),
            progress: Arc::clone(&progress),
        };

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let handle = tokio::spawn(run_worker(
                worker_id,
                Arc::clone(&job_receiver),
                queue.clone(),
                result_sender.clone(),
                Arc::clone(&shutdown),
                Arc::clone(&pipeline),
                Arc::clone(&progress),
            ));

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Self {
            queue,
            result_receiver,
            workers,
            shutdown,
        }
    }

    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    pub async fn submit(&self, job: Job) -> Result<(), WorkerError> {
        self.queue.submit(job).await
    }

    pub fn try_recv_result(&mut self) -> Option<JobResult> {
        self.result_receiver.try_recv().ok()
    }

    /// One result per delivery, including intermediate
    /// [`JobOutcome::Retrying`] results.
    pub async fn recv_result(&mut self) -> Option<JobResult> {
        self.result_receiver.recv().await
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stops the pool and waits for every worker to finish its current job.
    /// Jobs still queued are not run.
    pub async fn wait(self) {
        if !self.is_shutdown() {
            self.shutdown();
        }

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

async fn run_worker(
    worker_id: usize,
    job_receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    queue: JobQueue,
    result_sender: mpsc::UnboundedSender<JobResult>,
    shutdown: Arc<AtomicBool>,
    pipeline: Arc<Pipeline>,
    progress: Arc<dyn ProgressReporter>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        let next = {
            let mut receiver = job_receiver.lock().await;
            tokio::time::timeout(POLL_INTERVAL, receiver.recv()).await
        };

        match next {
            Ok(Some(job)) => {
                debug!(
                    "Worker {} processing candidate {} (delivery {})",
                    worker_id, job.candidate_id, job.delivery
                );

                let result = pipeline.run(&job, progress.as_ref()).await;
                if let JobOutcome::Retrying { delay, .. } = &result.outcome {
                    queue.requeue_after(job.redeliver(), *delay);
                }

                if let Err(e) = result_sender.send(result) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Ok(None) => {
                debug!("Worker {} job channel closed", worker_id);
                break;
            }
            Err(_) => continue,
        }
    }

    debug!("Worker {} stopped", worker_id);
}
