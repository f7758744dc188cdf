// CLI commands for submitting code and inspecting flowrun
use anyhow::{Context, Result};
use flowrun_common::config::GatewayConfig;
use flowrun_common::gateway::{Gateway, GatewayError, SubmitRequest};
use flowrun_common::language::LanguageRegistry;
use flowrun_common::queue::JobQueue;
use flowrun_common::redis::RedisQueue;
use flowrun_common::types::{ErrorKind, ExecutionResult, LanguageId};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Build a submission from a source file and optional stdin
pub fn build_request(
    language: LanguageId,
    file: &Path,
    input: Option<String>,
    input_file: Option<&Path>,
) -> Result<SubmitRequest> {
    let code = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let input = match input_file {
        Some(path) => Some(fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?),
        None => input,
    };

    Ok(SubmitRequest {
        code,
        input,
        language_id: language.code(),
    })
}

/// Submit a file, print the result and report whether it failed
pub async fn run_file(
    redis_url: &str,
    language: LanguageId,
    file: &Path,
    input: Option<String>,
    input_file: Option<&Path>,
    deadline_secs: u64,
) -> Result<bool> {
    let request = build_request(language, file, input, input_file)?;

    let config = GatewayConfig {
        redis_url: redis_url.to_string(),
        result_deadline: Duration::from_secs(deadline_secs),
        ..GatewayConfig::default()
    };
    let queue = RedisQueue::connect(&config.redis_url, config.result_ttl_seconds)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;
    let gateway = Gateway::new(Arc::new(queue), Arc::new(LanguageRegistry::builtin()), config);

    println!("🚀 Submitting {} ({})...", file.display(), language);
    let result = match gateway.submit(request).await {
        Ok(result) => result,
        Err(GatewayError::Timeout { submission_id }) => {
            ExecutionResult::failed(submission_id, ErrorKind::Timeout, String::new())
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.error_kind.is_error())
}

/// Render the built-in runtimes as a table
pub fn format_languages(registry: &LanguageRegistry) -> String {
    let mut out = format!("{:<4} {:<12} {:<18} {:>8} {:>5}\n", "ID", "LANGUAGE", "IMAGE", "MEMORY", "CPU");
    for spec in registry.list() {
        out.push_str(&format!(
            "{:<4} {:<12} {:<18} {:>6}MB {:>5}\n",
            spec.language_id.code(),
            spec.language_id.name(),
            spec.image,
            spec.memory_limit_mb,
            spec.cpu_limit
        ));
    }
    out
}

pub fn list_languages() {
    print!("{}", format_languages(&LanguageRegistry::builtin()));
}

/// Print the number of jobs waiting for a worker
pub async fn show_queue(redis_url: &str) -> Result<()> {
    let queue = RedisQueue::connect(redis_url, GatewayConfig::default().result_ttl_seconds)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", redis_url))?;
    let pending = queue.pending_jobs().await.context("Failed to read queue depth")?;
    println!("📋 Pending jobs: {}", pending);
    Ok(())
}
