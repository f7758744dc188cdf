// Job queue contract shared by the gateway and the workers
// Two FIFOs: inbound jobs and outbound results, correlated by submission id

use crate::types::{ExecutionResult, SubmissionJob};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(#[from] ::redis::RedisError),
    #[error("malformed queue payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Durable hand-off between submission and execution.
///
/// Implementations must make `dequeue_job` and `find_and_remove_result`
/// atomic: an element is handed to exactly one caller.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job to the inbound FIFO.
    async fn enqueue_job(&self, job: &SubmissionJob) -> Result<(), QueueError>;

    /// Wait up to `wait` for the oldest job and remove it.
    /// `Ok(None)` means the wait elapsed; callers loop to block indefinitely.
    async fn dequeue_job(&self, wait: Duration) -> Result<Option<SubmissionJob>, QueueError>;

    /// Make a result available to the gateway waiting on its submission id.
    async fn publish_result(&self, result: &ExecutionResult) -> Result<(), QueueError>;

    /// Remove and return the result for `submission_id`, if one has been published.
    async fn find_and_remove_result(&self, submission_id: &Uuid) -> Result<Option<ExecutionResult>, QueueError>;

    /// Number of jobs waiting in the inbound FIFO.
    async fn pending_jobs(&self) -> Result<usize, QueueError>;
}

/// In-process queue.
///
/// Same semantics as the Redis queue, minus durability. Used for tests and
/// for running gateway and worker inside one process.
#[derive(Default)]
pub struct MemoryQueue {
    jobs: Mutex<VecDeque<SubmissionJob>>,
    results: Mutex<HashMap<Uuid, VecDeque<ExecutionResult>>>,
    job_ready: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of results published but not yet collected.
    pub async fn pending_results(&self) -> usize {
        self.results.lock().await.values().map(VecDeque::len).sum()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue_job(&self, job: &SubmissionJob) -> Result<(), QueueError> {
        self.jobs.lock().await.push_back(job.clone());
        self.job_ready.notify_one();
        Ok(())
    }

    async fn dequeue_job(&self, wait: Duration) -> Result<Option<SubmissionJob>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            // Register interest before checking so a push between the check and the wait is not missed
            let notified = self.job_ready.notified();
            if let Some(job) = self.jobs.lock().await.pop_front() {
                return Ok(Some(job));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn publish_result(&self, result: &ExecutionResult) -> Result<(), QueueError> {
        self.results
            .lock()
            .await
            .entry(result.submission_id)
            .or_default()
            .push_back(result.clone());
        Ok(())
    }

    async fn find_and_remove_result(&self, submission_id: &Uuid) -> Result<Option<ExecutionResult>, QueueError> {
        let mut results = self.results.lock().await;
        let Some(pending) = results.get_mut(submission_id) else {
            return Ok(None);
        };
        let result = pending.pop_front();
        if pending.is_empty() {
            results.remove(submission_id);
        }
        Ok(result)
    }

    async fn pending_jobs(&self) -> Result<usize, QueueError> {
        Ok(self.jobs.lock().await.len())
    }
}
