// Worker configuration, read from the environment at boot
use anyhow::{Context, Result};
use flowrun_common::config::{env_or, DEFAULT_REDIS_URL};
use flowrun_common::language::LanguageRegistry;
use flowrun_common::redis::DEFAULT_RESULT_TTL_SECS;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    /// Labels this worker's containers; keep it stable across restarts to reap crash leftovers
    pub worker_id: String,
    pub languages_config: Option<PathBuf>,
    pub workspace_root: PathBuf,
    /// Wall-clock budget for one container run
    pub execution_timeout: Duration,
    /// Interval between container state checks
    pub poll_interval: Duration,
    /// Slice of a blocking dequeue, so shutdown is noticed
    pub dequeue_wait: Duration,
    pub pids_limit: i64,
    /// Output kept per run; the rest is dropped with a truncation note
    pub max_output_bytes: usize,
    pub result_ttl_seconds: u64,
    pub publish_attempts: u32,
    pub publish_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            worker_id: format!("worker-{}", uuid::Uuid::new_v4().simple()),
            languages_config: None,
            workspace_root: std::env::temp_dir(),
            execution_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            dequeue_wait: Duration::from_secs(5),
            pids_limit: 64,
            max_output_bytes: 1024 * 1024,
            result_ttl_seconds: DEFAULT_RESULT_TTL_SECS,
            publish_attempts: 3,
            publish_backoff: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            redis_url: env_or("REDIS_URL", defaults.redis_url)?,
            worker_id: env_or("WORKER_ID", defaults.worker_id)?,
            languages_config: std::env::var("LANGUAGES_CONFIG").ok().map(PathBuf::from),
            workspace_root: env_or("WORKSPACE_ROOT", defaults.workspace_root)?,
            execution_timeout: Duration::from_secs(env_or("EXECUTION_TIMEOUT_SECS", 10)?),
            poll_interval: Duration::from_millis(env_or("CONTAINER_POLL_INTERVAL_MS", 100)?),
            dequeue_wait: Duration::from_secs(env_or("DEQUEUE_TIMEOUT_SECS", 5)?),
            pids_limit: env_or("PIDS_LIMIT", defaults.pids_limit)?,
            max_output_bytes: env_or("MAX_OUTPUT_BYTES", defaults.max_output_bytes)?,
            result_ttl_seconds: env_or("RESULT_TTL_SECS", defaults.result_ttl_seconds)?,
            ..defaults
        })
    }

    /// Runtimes from `LANGUAGES_CONFIG` when set, the built-in table otherwise
    pub fn load_registry(&self) -> Result<LanguageRegistry> {
        match &self.languages_config {
            Some(path) => LanguageRegistry::load(path)
                .with_context(|| format!("Failed to load language runtimes from {}", path.display())),
            None => Ok(LanguageRegistry::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_common::types::LanguageId;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.execution_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert!(config.worker_id.starts_with("worker-"));
        assert_eq!(config.max_output_bytes, 1024 * 1024);
    }

    #[test]
    fn test_builtin_registry_without_config_file() {
        let registry = WorkerConfig::default().load_registry().unwrap();
        assert!(registry.resolve(LanguageId::Cpp).is_ok());
    }

    #[test]
    fn test_missing_config_file_is_reported() {
        let config = WorkerConfig {
            languages_config: Some(PathBuf::from("/nonexistent/languages.json")),
            ..WorkerConfig::default()
        };
        let err = config.load_registry().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/languages.json"));
    }

    #[test]
    fn test_shipped_languages_json_matches_builtin() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/languages.json");
        let shipped = LanguageRegistry::load(&path).unwrap();
        let builtin = LanguageRegistry::builtin();
        for lang in LanguageId::ALL {
            assert_eq!(shipped.resolve(lang).unwrap(), builtin.resolve(lang).unwrap());
        }
    }
}
