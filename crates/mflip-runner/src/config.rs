//! Runner configuration.

use std::path::PathBuf;
use std::time::Duration;

use mflip_store::DEFAULT_PREFIX;

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Redis connection URL
    pub redis_url: String,
    /// Prefix for every key the runner writes
    pub key_prefix: String,
    /// Cap on the RUNNING queue length
    pub max_concurrent_jobs: u64,
    /// Interval between reconciliation ticks
    pub poll_interval: Duration,
    /// How long a tick waits for the RUNNING queue lock
    pub lock_wait_timeout: Duration,
    /// Bulk status updates committed per pipeline
    pub bulk_commit_every: usize,
    /// How long bulk operations wait for pending status writes
    pub bulk_drain_timeout: Duration,
    /// Passed to workers as `MAX_RETRIES`
    pub worker_max_retries: u32,
    /// Capture logs and delete workers once their step finishes
    pub cleanup_finished_workers: bool,
    /// Base URL of the worker gateway
    pub orchestrator_url: String,
    pub orchestrator_timeout: Duration,
    pub templates_path: Option<PathBuf>,
    pub settings_path: Option<PathBuf>,
    pub metrics_port: u16,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: DEFAULT_PREFIX.to_string(),
            max_concurrent_jobs: 10,
            poll_interval: Duration::from_millis(1000),
            lock_wait_timeout: Duration::from_millis(5000),
            bulk_commit_every: 50,
            bulk_drain_timeout: Duration::from_millis(2000),
            worker_max_retries: 10,
            cleanup_finished_workers: false,
            orchestrator_url: "http://localhost:8090".to_string(),
            orchestrator_timeout: Duration::from_secs(30),
            templates_path: None,
            settings_path: None,
            metrics_port: 9090,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl RunnerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("MFLIP_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            max_concurrent_jobs: env_parse("MFLIP_MAX_CONCURRENT_JOBS")
                .unwrap_or(defaults.max_concurrent_jobs),
            poll_interval: env_parse("MFLIP_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            lock_wait_timeout: env_parse("MFLIP_LOCK_WAIT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_wait_timeout),
            bulk_commit_every: env_parse("MFLIP_BULK_COMMIT_EVERY")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.bulk_commit_every),
            bulk_drain_timeout: env_parse("MFLIP_BULK_DRAIN_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.bulk_drain_timeout),
            worker_max_retries: env_parse("MFLIP_WORKER_MAX_RETRIES")
                .unwrap_or(defaults.worker_max_retries),
            cleanup_finished_workers: env_parse("MFLIP_CLEANUP_FINISHED_WORKERS")
                .unwrap_or(defaults.cleanup_finished_workers),
            orchestrator_url: std::env::var("MFLIP_ORCHESTRATOR_URL")
                .unwrap_or(defaults.orchestrator_url),
            orchestrator_timeout: env_parse("MFLIP_ORCHESTRATOR_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.orchestrator_timeout),
            templates_path: std::env::var("MFLIP_TEMPLATES_PATH").ok().map(PathBuf::from),
            settings_path: std::env::var("MFLIP_SETTINGS_PATH").ok().map(PathBuf::from),
            metrics_port: env_parse("METRICS_PORT").unwrap_or(defaults.metrics_port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.key_prefix, "mediaflipper");
        assert_eq!(config.max_concurrent_jobs, 10);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.bulk_commit_every, 50);
        assert_eq!(config.bulk_drain_timeout, Duration::from_secs(2));
        assert!(!config.cleanup_finished_workers);
    }
}
