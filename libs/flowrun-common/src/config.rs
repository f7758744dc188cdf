// Gateway configuration, read from the environment at process start

use crate::redis::DEFAULT_RESULT_TTL_SECS;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Largest accepted source file
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024;
/// Largest accepted stdin payload
pub const MAX_STDIN_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for {key}")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
}

/// Read `key` from the environment, falling back to `default` when unset.
pub fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError {
            key: key.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub redis_url: String,
    /// How long a caller waits for its result
    pub result_deadline: Duration,
    /// Pause between result lookups
    pub poll_interval: Duration,
    /// Lifetime of a published result nobody collected
    pub result_ttl_seconds: u64,
    pub max_source_bytes: usize,
    pub max_stdin_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            result_deadline: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            result_ttl_seconds: DEFAULT_RESULT_TTL_SECS,
            max_source_bytes: MAX_SOURCE_CODE_BYTES,
            max_stdin_bytes: MAX_STDIN_BYTES,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            redis_url: env_or("REDIS_URL", defaults.redis_url)?,
            result_deadline: Duration::from_secs(env_or("RESULT_DEADLINE_SECS", 30)?),
            poll_interval: Duration::from_millis(env_or("RESULT_POLL_INTERVAL_MS", 100)?),
            result_ttl_seconds: env_or("RESULT_TTL_SECS", defaults.result_ttl_seconds)?,
            ..defaults
        })
    }

    /// Request body size that still lets oversized fields reach validation.
    /// Doubled for JSON escaping, plus room for the envelope.
    pub fn max_request_bytes(&self) -> usize {
        (self.max_source_bytes + self.max_stdin_bytes) * 2 + 64 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_limit_fits_largest_valid_submission() {
        let config = GatewayConfig::default();
        assert!(config.max_request_bytes() > config.max_source_bytes + config.max_stdin_bytes);
    }

    #[test]
    fn test_env_or_default_when_unset() {
        let value: u64 = env_or("FLOWRUN_TEST_SURELY_UNSET_KEY", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        std::env::set_var("FLOWRUN_TEST_BAD_NUMBER", "ten");
        let err = env_or::<u64>("FLOWRUN_TEST_BAD_NUMBER", 1).unwrap_err();
        assert_eq!(err.key, "FLOWRUN_TEST_BAD_NUMBER");
        assert_eq!(err.value, "ten");
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.result_deadline, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.max_source_bytes, 1024 * 1024);
    }
}
