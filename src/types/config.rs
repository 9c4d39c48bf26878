//! Configuration structures.
//!
//! Every component receives its configuration explicitly at construction
//! time; there is no process-wide configuration state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Async job executor configuration.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Historic-query configuration.
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Async job executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// How often the poll loop scans for due jobs.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Maximum number of jobs executing simultaneously.
    pub worker_pool_size: usize,

    /// Maximum execution attempts per job before it is terminally FAILED.
    pub max_job_attempts: u32,

    /// Base delay for exponential retry backoff
    /// (attempt n is re-due after `retry_backoff_base * 2^(n-1)`).
    #[serde(with = "humantime_serde")]
    pub retry_backoff_base: Duration,

    /// How long shutdown waits for in-flight jobs before forcibly failing them.
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            worker_pool_size: 8,
            max_job_attempts: 3,
            retry_backoff_base: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Historic-query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Upper bound applied to client-requested page sizes.
    pub max_page_size: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_page_size: 200 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_expectations() {
        let config = Config::default();
        assert_eq!(config.executor.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.executor.worker_pool_size, 8);
        assert_eq!(config.executor.max_job_attempts, 3);
        assert_eq!(config.history.max_page_size, 200);
    }

    #[test]
    fn executor_config_roundtrips_with_humantime() {
        let config = ExecutorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"poll_interval\":\"1s\""));

        let back: ExecutorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.poll_interval, config.poll_interval);
        assert_eq!(back.retry_backoff_base, config.retry_backoff_base);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.executor.max_job_attempts, 3);
        assert_eq!(config.observability.log_level, "info");
    }
}
