//! Submission Gateway
//!
//! **Responsibility:**
//! The boundary external callers talk to. Validates a request, assigns a
//! submission id, enqueues the job and waits for the matching result.
//!
//! **Guarantees:**
//! - Invalid requests never reach the queue
//! - A caller only ever receives the result carrying its own submission id
//! - A caller never waits past the configured deadline
//!
//! The deadline bounds the caller's wait only. A worker that is still running
//! the job enforces its own execution limit.

use crate::config::GatewayConfig;
use crate::language::LanguageRegistry;
use crate::queue::{JobQueue, QueueError};
use crate::types::{ExecutionResult, LanguageId, SubmissionJob, UnsupportedLanguage};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A submission as received from the caller
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub code: String,
    #[serde(default)]
    pub input: Option<String>,
    pub language_id: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error(transparent)]
    UnsupportedLanguage(#[from] UnsupportedLanguage),
    #[error("source code is empty")]
    EmptyCode,
    #[error("source code exceeds maximum size of {0} bytes")]
    CodeTooLarge(usize),
    #[error("input exceeds maximum size of {0} bytes")]
    InputTooLarge(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid submission: {0}")]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("no result for submission {submission_id} within the deadline")]
    Timeout { submission_id: Uuid },
}

#[derive(Clone)]
pub struct Gateway {
    queue: Arc<dyn JobQueue>,
    registry: Arc<LanguageRegistry>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(queue: Arc<dyn JobQueue>, registry: Arc<LanguageRegistry>, config: GatewayConfig) -> Self {
        Self { queue, registry, config }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Check a request and turn it into a job. Touches nothing outside the gateway.
    pub fn validate(&self, request: SubmitRequest) -> Result<SubmissionJob, ValidationError> {
        let language = LanguageId::try_from(request.language_id)?;
        self.registry.resolve(language)?;

        if request.code.trim().is_empty() {
            return Err(ValidationError::EmptyCode);
        }
        if request.code.len() > self.config.max_source_bytes {
            return Err(ValidationError::CodeTooLarge(self.config.max_source_bytes));
        }
        if request.input.as_ref().is_some_and(|input| input.len() > self.config.max_stdin_bytes) {
            return Err(ValidationError::InputTooLarge(self.config.max_stdin_bytes));
        }

        Ok(SubmissionJob::new(language, request.code, request.input))
    }

    /// Validate and enqueue without waiting. Returns the submission id.
    pub async fn enqueue(&self, request: SubmitRequest) -> Result<Uuid, GatewayError> {
        let job = self.validate(request)?;
        self.queue.enqueue_job(&job).await?;

        info!(
            submission_id = %job.submission_id,
            language = %job.language_id,
            source_size = job.code.len(),
            has_input = job.stdin.is_some(),
            "Job queued"
        );
        Ok(job.submission_id)
    }

    /// Single non-blocking lookup for a result.
    pub async fn try_result(&self, submission_id: &Uuid) -> Result<Option<ExecutionResult>, GatewayError> {
        Ok(self.queue.find_and_remove_result(submission_id).await?)
    }

    /// Poll for a result until it appears or the deadline passes.
    pub async fn wait_for_result(&self, submission_id: Uuid) -> Result<ExecutionResult, GatewayError> {
        let deadline = Instant::now() + self.config.result_deadline;
        loop {
            if let Some(result) = self.try_result(&submission_id).await? {
                debug!(submission_id = %submission_id, error_kind = ?result.error_kind, "Result collected");
                return Ok(result);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    submission_id = %submission_id,
                    deadline_ms = self.config.result_deadline.as_millis() as u64,
                    "Gave up waiting for result"
                );
                return Err(GatewayError::Timeout { submission_id });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    /// Validate, enqueue and wait for the result.
    pub async fn submit(&self, request: SubmitRequest) -> Result<ExecutionResult, GatewayError> {
        let submission_id = self.enqueue(request).await?;
        self.wait_for_result(submission_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::types::ErrorKind;
    use std::time::Duration;

    fn gateway(queue: Arc<MemoryQueue>) -> Gateway {
        let config = GatewayConfig {
            result_deadline: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            ..GatewayConfig::default()
        };
        Gateway::new(queue, Arc::new(LanguageRegistry::builtin()), config)
    }

    fn request(language_id: u32, code: &str) -> SubmitRequest {
        SubmitRequest {
            code: code.to_string(),
            input: None,
            language_id,
        }
    }

    /// Stand-in worker: answers every job with its own source code as output.
    fn spawn_echo_worker(queue: Arc<MemoryQueue>, jobs: usize) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            for _ in 0..jobs {
                let job = loop {
                    if let Some(job) = queue.dequeue_job(Duration::from_secs(1)).await.unwrap() {
                        break job;
                    }
                };
                let result = ExecutionResult::new(job.submission_id, job.code.clone(), Some(0), ErrorKind::None);
                queue.publish_result(&result).await.unwrap();
            }
        })
    }

    #[tokio::test]
    async fn test_unsupported_language_never_enqueued() {
        let queue = Arc::new(MemoryQueue::new());
        let gateway = gateway(queue.clone());

        let err = gateway.submit(request(999, "print(1)")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Invalid(ValidationError::UnsupportedLanguage(_))));
        assert_eq!(queue.pending_jobs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_code_never_enqueued() {
        let queue = Arc::new(MemoryQueue::new());
        let gateway = gateway(queue.clone());

        let err = gateway.submit(request(71, "  \n\t")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Invalid(ValidationError::EmptyCode)));
        assert_eq!(queue.pending_jobs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_input_rejected() {
        let queue = Arc::new(MemoryQueue::new());
        let mut gateway = gateway(queue.clone());
        gateway.config.max_stdin_bytes = 4;

        let mut req = request(71, "print(input())");
        req.input = Some("hello".to_string());
        let err = gateway.submit(req).await.unwrap_err();
        assert!(matches!(err, GatewayError::Invalid(ValidationError::InputTooLarge(4))));
    }

    #[tokio::test]
    async fn test_validate_builds_job() {
        let gateway = gateway(Arc::new(MemoryQueue::new()));
        let mut req = request(54, "int main() {}");
        req.input = Some("1 2".to_string());

        let job = gateway.validate(req).unwrap();
        assert_eq!(job.language_id, LanguageId::Cpp);
        assert_eq!(job.stdin.as_deref(), Some("1 2"));
    }

    #[tokio::test]
    async fn test_submit_returns_matching_result() {
        let queue = Arc::new(MemoryQueue::new());
        let gateway = gateway(queue.clone());
        let worker = spawn_echo_worker(queue.clone(), 1);

        let result = gateway.submit(request(71, "print('hi')")).await.unwrap();
        assert_eq!(result.output, "print('hi')");
        assert_eq!(result.error_kind, ErrorKind::None);
        worker.await.unwrap();
        assert_eq!(queue.pending_results().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_do_not_cross_talk() {
        let queue = Arc::new(MemoryQueue::new());
        let gateway = gateway(queue.clone());
        let worker = spawn_echo_worker(queue.clone(), 8);

        let calls: Vec<_> = (0..8)
            .map(|i| {
                let gateway = gateway.clone();
                tokio::spawn(async move {
                    let code = format!("print({})", i);
                    let result = gateway.submit(request(71, &code)).await.unwrap();
                    (code, result)
                })
            })
            .collect();

        for call in calls {
            let (code, result) = call.await.unwrap();
            assert_eq!(result.output, code);
        }
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_at_deadline_not_before() {
        let queue = Arc::new(MemoryQueue::new());
        let gateway = gateway(queue.clone());

        let started = Instant::now();
        let err = gateway.submit(request(63, "while(true){}")).await.unwrap_err();
        let waited = started.elapsed();

        assert!(matches!(err, GatewayError::Timeout { .. }));
        assert!(waited >= Duration::from_secs(30));
        assert!(waited < Duration::from_secs(31));
        // The job stays queued for a worker; only the caller gave up
        assert_eq!(queue.pending_jobs().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_try_result_pending_then_ready() {
        let queue = Arc::new(MemoryQueue::new());
        let gateway = gateway(queue.clone());

        let id = gateway.enqueue(request(71, "print(1)")).await.unwrap();
        assert!(gateway.try_result(&id).await.unwrap().is_none());

        queue
            .publish_result(&ExecutionResult::new(id, "1\n", Some(0), ErrorKind::None))
            .await
            .unwrap();
        assert_eq!(gateway.try_result(&id).await.unwrap().unwrap().output, "1\n");
    }
}
