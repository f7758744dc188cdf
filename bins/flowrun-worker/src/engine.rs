//! Container Lifecycle Manager
//!
//! **Core Responsibility:**
//! Run one sandbox command in a throwaway container and hand back what it printed.
//!
//! **Lifecycle per run:**
//! 1. Create a container bound to the job workspace, network off, memory capped
//! 2. Attach to combined stdout/stderr, then start it
//! 3. Poll container state at a fixed interval until it stops running
//! 4. Read the exit code, fall back to retained logs if the attach stream was empty
//! 5. Remove the container, whatever happened above
//!
//! **Not Here:**
//! - Wall-clock limits (the worker cancels a run that outlives its deadline)
//! - Interpreting output (the worker classifies results)

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, InspectContainerOptions,
    ListContainersOptions, LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{ContainerState, HostConfig};
use bollard::Docker;
use flowrun_common::language::{SandboxRuntimeSpec, SANDBOX_WORKDIR};
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const LABEL_MANAGED: &str = "flowrun.managed";
pub const LABEL_SUBMISSION: &str = "flowrun.submission";
pub const LABEL_WORKER: &str = "flowrun.worker";

/// How long to keep reading the attach stream once the container has stopped
const STREAM_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to pull image {image}: {source}")]
    ImagePull {
        image: String,
        #[source]
        source: bollard::errors::Error,
    },
    #[error("failed to pull image {image}: {message}")]
    ImagePullRejected { image: String, message: String },
    #[error("container runtime error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

/// Everything needed to run one job's sandbox.
#[derive(Debug, Clone)]
pub struct SandboxRun<'a> {
    pub submission_id: Uuid,
    pub spec: &'a SandboxRuntimeSpec,
    pub workspace_path: &'a str,
    pub has_input: bool,
}

/// What a finished container left behind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutput {
    /// stdout and stderr interleaved in arrival order
    pub output: String,
    pub exit_code: Option<i64>,
    pub wrote_stderr: bool,
    pub oom_killed: bool,
}

/// Seam between the worker and the container daemon.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make sure `image` is present locally, pulling it when absent.
    async fn ensure_image(&self, image: &str) -> Result<(), EngineError>;

    /// Run the sandbox to completion. The container is removed before this returns.
    async fn run(&self, run: &SandboxRun<'_>) -> Result<RunOutput, EngineError>;

    /// Force-remove every container created for `submission_id`. Returns how many were removed.
    async fn remove_submission_containers(&self, submission_id: &Uuid) -> Result<usize, EngineError>;
}

/// Accumulates attach/log frames. Bytes are kept raw until the end so a
/// multi-byte character split across frames decodes correctly.
/// Anything past `limit` bytes is dropped and noted in the text.
struct OutputCapture {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
    wrote_stderr: bool,
}

impl OutputCapture {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
            wrote_stderr: false,
        }
    }

    fn push(&mut self, frame: LogOutput) {
        let message = match frame {
            LogOutput::StdOut { message } | LogOutput::Console { message } => message,
            LogOutput::StdErr { message } => {
                self.wrote_stderr |= !message.is_empty();
                message
            }
            LogOutput::StdIn { .. } => return,
        };

        let room = self.limit.saturating_sub(self.bytes.len());
        if message.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&message[..message.len().min(room)]);
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn into_text(self) -> (String, bool) {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str(&format!("\n[Output truncated at {} bytes]", self.limit));
        }
        (text, self.wrote_stderr)
    }
}

/// Container cleanup guard - guarantees container removal on drop
/// Covers panics and futures dropped mid-run (worker deadline)
struct ContainerGuard {
    docker: Docker,
    container_id: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: &Docker, container_id: String) -> Self {
        Self {
            docker: docker.clone(),
            container_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Best-effort cleanup - cannot be async in Drop
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = docker.remove_container(&container_id, Some(force_remove())).await {
                    warn!(container_id = %container_id, error = %e, "Failed to clean up container");
                }
            });
        }
    }
}

fn force_remove() -> RemoveContainerOptions {
    RemoveContainerOptions {
        force: true,
        v: true,
        ..Default::default()
    }
}

/// Docker-backed sandbox
pub struct DockerEngine {
    docker: Docker,
    worker_id: String,
    poll_interval: Duration,
    pids_limit: i64,
    max_output_bytes: usize,
}

impl DockerEngine {
    pub fn connect(
        worker_id: &str,
        poll_interval: Duration,
        pids_limit: i64,
        max_output_bytes: usize,
    ) -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            worker_id: worker_id.to_string(),
            poll_interval,
            pids_limit,
            max_output_bytes,
        })
    }

    /// Check the daemon answers before taking jobs.
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.docker.ping().await?;
        Ok(())
    }

    /// Remove containers a previous run of this worker left behind.
    pub async fn reap_stale_containers(&self) -> Result<usize, EngineError> {
        self.remove_labelled(&format!("{}={}", LABEL_WORKER, self.worker_id)).await
    }

    fn container_config(&self, run: &SandboxRun<'_>) -> Config<String> {
        let spec = run.spec;
        let command = spec.build_command(run.has_input);
        let memory = spec.memory_limit_bytes();

        let labels = HashMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_SUBMISSION.to_string(), run.submission_id.to_string()),
            (LABEL_WORKER.to_string(), self.worker_id.clone()),
        ]);

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["/bin/sh".to_string(), "-c".to_string(), command]),
            labels: Some(labels),
            working_dir: Some(SANDBOX_WORKDIR.to_string()),
            tty: Some(false),
            open_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true), // SECURITY: No network access
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{}:{}:rw", run.workspace_path, SANDBOX_WORKDIR)]),
                network_mode: Some("none".to_string()),
                memory: Some(memory),
                memory_swap: Some(memory), // no swap on top of the memory cap
                nano_cpus: Some(spec.nano_cpus()),
                pids_limit: Some(self.pids_limit),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Start the container and wait for it to stop, collecting output on the way.
    async fn drive(&self, container_id: &str) -> Result<RunOutput, EngineError> {
        // Attach before start so nothing printed early is lost
        let AttachContainerResults { mut output, .. } = self
            .docker
            .attach_container(
                container_id,
                Some(AttachContainerOptions::<String> {
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    ..Default::default()
                }),
            )
            .await?;

        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;

        let mut capture = OutputCapture::new(self.max_output_bytes);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attached = true;

        let state = loop {
            tokio::select! {
                frame = output.next(), if attached => match frame {
                    Some(Ok(frame)) => capture.push(frame),
                    Some(Err(e)) => {
                        debug!(container_id, error = %e, "Attach stream failed; relying on logs");
                        attached = false;
                    }
                    None => attached = false,
                },
                _ = ticker.tick() => {
                    if let Some(state) = self.stopped_state(container_id).await? {
                        break state;
                    }
                }
            }
        };

        if attached {
            while let Ok(Some(Ok(frame))) = tokio::time::timeout(STREAM_DRAIN_GRACE, output.next()).await {
                capture.push(frame);
            }
        }

        if capture.is_empty() {
            self.read_logs(container_id, &mut capture).await?;
        }

        let (text, wrote_stderr) = capture.into_text();
        Ok(RunOutput {
            output: text,
            exit_code: state.exit_code,
            wrote_stderr,
            oom_killed: state.oom_killed.unwrap_or(false),
        })
    }

    /// `Some(state)` once the container is no longer running.
    async fn stopped_state(&self, container_id: &str) -> Result<Option<ContainerState>, EngineError> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await?;
        let state = inspect.state.unwrap_or_default();
        Ok((!state.running.unwrap_or(false)).then_some(state))
    }

    async fn read_logs(&self, container_id: &str, capture: &mut OutputCapture) -> Result<(), EngineError> {
        let mut logs = self.docker.logs(
            container_id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        while let Some(frame) = logs.next().await {
            capture.push(frame?);
        }
        Ok(())
    }

    async fn remove_labelled(&self, label: &str) -> Result<usize, EngineError> {
        let filters = HashMap::from([("label".to_string(), vec![label.to_string()])]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        let mut removed = 0;
        for id in containers.into_iter().filter_map(|c| c.id) {
            match self.docker.remove_container(&id, Some(force_remove())).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(container_id = %id, error = %e, "Failed to remove container"),
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl ContainerRuntime for DockerEngine {
    /// Image cache check: list local images, pull only on a miss
    async fn ensure_image(&self, image: &str) -> Result<(), EngineError> {
        let filters = HashMap::from([("reference".to_string(), vec![image.to_string()])]);
        let local = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                filters,
                ..Default::default()
            }))
            .await?;

        if !local.is_empty() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut progress = self.docker.create_image(options, None, None);
        while let Some(step) = progress.next().await {
            let step = step.map_err(|source| EngineError::ImagePull {
                image: image.to_string(),
                source,
            })?;
            if let Some(message) = step.error {
                return Err(EngineError::ImagePullRejected {
                    image: image.to_string(),
                    message,
                });
            }
        }

        info!(image, "Image pulled");
        Ok(())
    }

    async fn run(&self, run: &SandboxRun<'_>) -> Result<RunOutput, EngineError> {
        let short_id = Uuid::new_v4().simple().to_string();
        let container_name = format!("flowrun-{}-{}", run.submission_id, &short_id[..8]);

        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.as_str(),
                    platform: None,
                }),
                self.container_config(run),
            )
            .await?;
        let container_id = container.id;

        // Set up the guard immediately so a cancelled run still removes the container
        let mut guard = ContainerGuard::new(&self.docker, container_id.clone());

        let outcome = self.drive(&container_id).await;

        match self.docker.remove_container(&container_id, Some(force_remove())).await {
            Ok(()) => guard.disarm(),
            Err(e) => warn!(container_id = %container_id, error = %e, "Failed to remove container"),
        }

        if let Ok(output) = &outcome {
            debug!(
                submission_id = %run.submission_id,
                exit_code = ?output.exit_code,
                output_bytes = output.output.len(),
                "Container finished"
            );
        }
        outcome
    }

    async fn remove_submission_containers(&self, submission_id: &Uuid) -> Result<usize, EngineError> {
        self.remove_labelled(&format!("{}={}", LABEL_SUBMISSION, submission_id)).await
    }
}
