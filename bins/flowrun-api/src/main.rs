mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use flowrun_common::config::{env_or, GatewayConfig};
use flowrun_common::gateway::Gateway;
use flowrun_common::language::LanguageRegistry;
use flowrun_common::redis::RedisQueue;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub struct AppState {
    pub gateway: Gateway,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("flowrun API booting...");

    let config = GatewayConfig::from_env()?;
    let addr: String = env_or("API_ADDR", "0.0.0.0:3000".to_string())?;

    // Connect to Redis
    let queue = RedisQueue::connect(&config.redis_url, config.result_ttl_seconds)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;
    info!(redis_url = %config.redis_url, "Connected to Redis");

    // Same runtime table as the workers, so /languages reports what they run
    let registry = match std::env::var("LANGUAGES_CONFIG") {
        Ok(path) => LanguageRegistry::load(Path::new(&path))
            .with_context(|| format!("Failed to load language runtimes from {}", path))?,
        Err(_) => LanguageRegistry::builtin(),
    };

    let body_limit = config.max_request_bytes();
    let state = Arc::new(AppState {
        gateway: Gateway::new(Arc::new(queue), Arc::new(registry), config),
    });

    // Build router
    let app = Router::new().merge(routes::routes(body_limit)).with_state(state);

    // Start server
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
