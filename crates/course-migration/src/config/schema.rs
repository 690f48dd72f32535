use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::secrets::SecretSource;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file holding the job table; defaults to the per-user data dir.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The destination instance's web-service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            token: None,
            token_file: None,
            token_env: None,
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    pub fn token_source(&self) -> SecretSource<'_> {
        SecretSource::new(
            self.token.as_deref(),
            self.token_file.as_deref(),
            self.token_env.as_deref(),
        )
    }

    /// Endpoint and token are both present. Required before any backup can
    /// be queued.
    pub fn is_configured(&self) -> bool {
        self.endpoint_url.as_deref().is_some_and(|u| !u.is_empty())
            && self.token_source().is_configured()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Used when the requested category is missing or was deleted.
    #[serde(default)]
    pub default_category_id: Option<i64>,
    #[serde(default)]
    pub hide_restored_course: bool,
    #[serde(default)]
    pub delete_on_successful_restore: bool,
    #[serde(default)]
    pub delete_on_failed_restore: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default)]
    pub delete_on_failed_backup: bool,
}

/// Storage backends selectable in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    SharedDisk,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `None` disables file transfer; every worker then fails with
    /// "storage not configured".
    #[serde(default, rename = "type")]
    pub kind: Option<StorageType>,
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub backup_interval_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub restore_interval_secs: u64,
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u64,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_batch_limit() -> u64 {
    20
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backup_interval_secs: default_sweep_interval_secs(),
            restore_interval_secs: default_sweep_interval_secs(),
            batch_limit: default_batch_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Scratch space for pulled archives and extraction directories.
    #[serde(default = "default_temp_directory")]
    pub temp_directory: PathBuf,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_temp_directory() -> PathBuf {
    std::env::temp_dir().join("course-migration")
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            temp_directory: default_temp_directory(),
            retry: RetryConfig::default(),
        }
    }
}

/// Backoff policy for retryable restore failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_delay_secs() -> u64 {
    60
}

fn default_max_delay_secs() -> u64 {
    3600
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-based): exponential, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max = self.max_delay_secs as f64;
        let secs = self.initial_delay_secs as f64 * self.multiplier.powi(attempt as i32);
        // 0 * inf is NaN: no initial delay means no delay.
        let secs = if secs.is_nan() { 0.0 } else { secs.clamp(0.0, max) };
        Duration::from_secs_f64(secs)
    }

    /// Whether another attempt is allowed after `attempt` retries.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_delay_secs: 10,
            max_delay_secs: 60,
            multiplier: 2.0,
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::from_secs(10));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(20));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(40));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_secs(60));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_retry_delay_survives_overflowing_multiplier() {
        let zero_initial = RetryConfig {
            max_retries: 5000,
            initial_delay_secs: 0,
            max_delay_secs: 60,
            multiplier: 10.0,
        };
        assert_eq!(zero_initial.delay_for_attempt(4000), Duration::ZERO);

        let capped = RetryConfig {
            initial_delay_secs: 1,
            ..zero_initial
        };
        assert_eq!(capped.delay_for_attempt(4000), Duration::from_secs(60));
    }

    #[test]
    fn test_should_retry() {
        let retry = RetryConfig {
            max_retries: 2,
            ..Default::default()
        };
        assert!(retry.should_retry(0));
        assert!(retry.should_retry(1));
        assert!(!retry.should_retry(2));
        assert!(!RetryConfig::no_retry().should_retry(0));
    }

    #[test]
    fn test_remote_is_configured() {
        let mut remote = RemoteConfig::default();
        assert!(!remote.is_configured());

        remote.endpoint_url = Some("https://dest.example/webservice/rest/server.php".into());
        assert!(!remote.is_configured());

        remote.token = Some("abc".into());
        assert!(remote.is_configured());
    }

    #[test]
    fn test_storage_kind_serde() {
        let storage: StorageConfig =
            serde_json::from_str(r#"{"type": "shared_disk", "directory": "/mnt/share"}"#).unwrap();
        assert_eq!(storage.kind, Some(StorageType::SharedDisk));
        assert_eq!(storage.directory, Some(PathBuf::from("/mnt/share")));
    }
}
