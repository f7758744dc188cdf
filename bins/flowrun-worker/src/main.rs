mod config;
mod engine;
mod executor;
mod workspace;

use config::WorkerConfig;
use engine::{ContainerRuntime, DockerEngine};
use executor::Worker;
use flowrun_common::queue::JobQueue;
use flowrun_common::redis::RedisQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Pause between attempts to reach Redis at boot
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("flowrun worker booting...");

    let config = WorkerConfig::from_env()?;
    let registry = config.load_registry()?;
    for spec in registry.list() {
        info!(
            language = %spec.language_id,
            image = %spec.image,
            memory_mb = spec.memory_limit_mb,
            cpu_limit = spec.cpu_limit,
            "Runtime configured"
        );
    }

    let engine = DockerEngine::connect(
        &config.worker_id,
        config.poll_interval,
        config.pids_limit,
        config.max_output_bytes,
    )?;
    engine.ping().await?;
    match engine.reap_stale_containers().await {
        Ok(0) => {}
        Ok(removed) => warn!(removed, worker_id = %config.worker_id, "Removed containers left by a previous run"),
        Err(e) => warn!(error = %e, "Could not check for stale containers"),
    }

    let queue = connect_queue(&config).await;
    info!(
        worker_id = %config.worker_id,
        workspace_root = %config.workspace_root.display(),
        execution_timeout_s = config.execution_timeout.as_secs(),
        "Worker ready"
    );

    let worker = Worker::new(
        Arc::new(queue) as Arc<dyn JobQueue>,
        Arc::new(engine) as Arc<dyn ContainerRuntime>,
        Arc::new(registry),
        config,
    );

    // Setup graceful shutdown: finish the job in hand, take no new ones
    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            // Keep the sender alive so the worker is not stopped by accident
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, finishing current job...");
        let _ = stop.send(true);
    });

    worker.run(shutdown).await;

    info!("Worker shutdown complete");
    Ok(())
}

/// Keep trying until Redis answers; the worker is useless without its queue
async fn connect_queue(config: &WorkerConfig) -> RedisQueue {
    loop {
        match RedisQueue::connect(&config.redis_url, config.result_ttl_seconds).await {
            Ok(queue) => {
                info!(redis_url = %config.redis_url, "Connected to Redis");
                return queue;
            }
            Err(e) => {
                error!(redis_url = %config.redis_url, error = %e, "Redis unavailable, retrying");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
}
