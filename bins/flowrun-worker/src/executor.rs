//! Execution Worker - per-job orchestration
//!
//! **Responsibility:**
//! Take one job at a time off the queue, run it in a sandbox, classify what
//! happened and publish exactly one result.
//!
//! **Per-job flow (linear):**
//! Dequeued → WorkspacePrepared → ImageEnsured → ContainerRan →
//! WorkspaceDestroyed → Classified → Published
//!
//! Any failure jumps straight to Classified with the matching error kind.
//! The workspace is destroyed on every path before the result goes out, so a
//! caller holding a result never sees its job's files still on disk.
//!
//! Failures inside a job never stop the loop. Only queue errors are retried
//! here, as a queue-level backoff, never as a re-run of a job.

use crate::config::WorkerConfig;
use crate::engine::{ContainerRuntime, RunOutput, SandboxRun};
use crate::workspace::Workspace;
use chrono::Utc;
use flowrun_common::language::{split_compile_output, CompileOutcome, LanguageRegistry, SandboxRuntimeSpec};
use flowrun_common::queue::JobQueue;
use flowrun_common::types::{ErrorKind, ExecutionResult, SubmissionJob};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Wait before retrying after a queue error
const QUEUE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How the sandbox phase ended, before classification
#[derive(Debug)]
enum SandboxOutcome {
    Finished(RunOutput),
    TimedOut(Duration),
    Failed(String),
}

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<LanguageRegistry>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<LanguageRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            runtime,
            registry,
            config,
        }
    }

    /// Process jobs until `shutdown` flips to true. A job already taken off
    /// the queue is always finished and published before returning.
    ///
    /// A dequeue is never abandoned midway: the job may already be off the
    /// queue when its reply is in flight. Shutdown is checked between
    /// bounded `dequeue_wait` slices instead.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            match self.queue.dequeue_job(self.config.dequeue_wait).await {
                Ok(Some(job)) => self.handle(job).await,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "Queue error while waiting for jobs");
                    tokio::time::sleep(QUEUE_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Execute one dequeued job and publish its result.
    pub async fn handle(&self, job: SubmissionJob) {
        let queued_ms = (Utc::now() - job.created_at).num_milliseconds().max(0);
        info!(
            submission_id = %job.submission_id,
            language = %job.language_id,
            source_size = job.code.len(),
            queued_ms,
            "Received job"
        );

        let start = Instant::now();
        let result = self.execute(&job).await;

        info!(
            submission_id = %result.submission_id,
            error_kind = ?result.error_kind,
            exit_code = ?result.exit_code,
            execution_ms = start.elapsed().as_millis() as u64,
            "Execution completed"
        );

        self.publish(&result).await;
    }

    /// Run a job through the sandbox. Never fails: every problem becomes a classified result.
    #[instrument(skip(self, job), fields(submission_id = %job.submission_id, language = %job.language_id))]
    pub async fn execute(&self, job: &SubmissionJob) -> ExecutionResult {
        let spec = match self.registry.resolve(job.language_id) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(error = %e, "No runtime configured for language");
                return ExecutionResult::failed(job.submission_id, ErrorKind::UnsupportedLanguage, e.to_string());
            }
        };

        let workspace = match Workspace::create(&self.config.workspace_root, job, spec) {
            Ok(workspace) => workspace,
            Err(e) => {
                error!(error = %e, "Workspace preparation failed");
                return ExecutionResult::failed(
                    job.submission_id,
                    ErrorKind::InfrastructureError,
                    format!("Execution error: {}", e),
                );
            }
        };

        let outcome = self.run_sandbox(job.submission_id, spec, &workspace).await;

        if let Err(e) = workspace.destroy() {
            error!(error = %e, "Failed to remove workspace");
        }

        classify(job.submission_id, spec, outcome)
    }

    async fn run_sandbox(&self, submission_id: Uuid, spec: &SandboxRuntimeSpec, workspace: &Workspace) -> SandboxOutcome {
        if let Err(e) = self.runtime.ensure_image(&spec.image).await {
            error!(image = %spec.image, error = %e, "Image unavailable");
            return SandboxOutcome::Failed(format!("Execution error: {}", e));
        }

        let run = SandboxRun {
            submission_id,
            spec,
            workspace_path: workspace.mount_path(),
            has_input: workspace.has_input(),
        };

        let limit = self.config.execution_timeout;
        match tokio::time::timeout(limit, self.runtime.run(&run)).await {
            Ok(Ok(output)) => SandboxOutcome::Finished(output),
            Ok(Err(e)) => {
                error!(error = %e, "Sandbox run failed");
                SandboxOutcome::Failed(format!("Execution error: {}", e))
            }
            Err(_) => {
                warn!(timeout_ms = limit.as_millis() as u64, "Execution timed out - removing container");
                match self.runtime.remove_submission_containers(&submission_id).await {
                    Ok(removed) => info!(removed, "Timed-out containers removed"),
                    Err(e) => error!(error = %e, "Failed to remove timed-out container"),
                }
                SandboxOutcome::TimedOut(limit)
            }
        }
    }

    /// Publish with a few retries; a dropped result would leave the caller waiting for nothing.
    async fn publish(&self, result: &ExecutionResult) {
        for attempt in 1..=self.config.publish_attempts {
            match self.queue.publish_result(result).await {
                Ok(()) => {
                    info!(submission_id = %result.submission_id, "Result published");
                    return;
                }
                Err(e) => {
                    error!(submission_id = %result.submission_id, attempt, error = %e, "Failed to publish result");
                    if attempt < self.config.publish_attempts {
                        tokio::time::sleep(self.config.publish_backoff).await;
                    }
                }
            }
        }
        error!(submission_id = %result.submission_id, "Result dropped after exhausting publish attempts");
    }
}

/// Turn the sandbox outcome into the published result.
fn classify(submission_id: Uuid, spec: &SandboxRuntimeSpec, outcome: SandboxOutcome) -> ExecutionResult {
    let run = match outcome {
        SandboxOutcome::Finished(run) => run,
        SandboxOutcome::TimedOut(limit) => {
            return ExecutionResult::failed(
                submission_id,
                ErrorKind::Timeout,
                format!("Execution timed out after {}ms", limit.as_millis()),
            );
        }
        SandboxOutcome::Failed(message) => {
            return ExecutionResult::failed(submission_id, ErrorKind::InfrastructureError, message);
        }
    };

    let mut output = if spec.is_compiled() {
        match split_compile_output(&run.output) {
            CompileOutcome::Failed(diagnostics) => {
                return ExecutionResult::failed(submission_id, ErrorKind::CompileError, diagnostics);
            }
            CompileOutcome::Succeeded(program_output) => program_output,
        }
    } else {
        run.output
    };

    // Special handling for common signals
    if run.oom_killed || run.exit_code == Some(137) {
        output.push_str("\n[Container killed: likely OOM or exceeded memory limit]");
    } else if run.exit_code == Some(139) {
        output.push_str("\n[Container killed: segmentation fault]");
    }

    let error_kind = match run.exit_code {
        Some(0) if !run.wrote_stderr => ErrorKind::None,
        _ => ErrorKind::RuntimeError,
    };

    ExecutionResult::new(submission_id, output, run.exit_code, error_kind)
}
