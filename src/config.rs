use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Engine tuning knobs. Every field has a default so a partial YAML file is
/// enough.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a workflow may sit with an empty ready set before it is
    /// failed with a stall timeout.
    pub stall_window_secs: u64,
    /// Idle wait between ready-set computations when nothing is ready.
    pub idle_interval_ms: u64,
    /// Retry delay is `backoff_base_secs * 2^retry_count`.
    pub backoff_base_secs: f64,
    pub default_max_retries: u32,
    pub default_timeout_secs: u64,
    /// Maximum number of events kept in a live workflow's history.
    pub history_limit: usize,
    /// Number of trailing history events carried by a snapshot.
    pub snapshot_history: usize,
    pub snapshot_ttl_secs: u64,
    pub snapshot_prefix: String,
    /// Cap on concurrent remote dispatches per worker identity; 0 = no cap.
    pub max_in_flight_per_worker: usize,
    /// Drop terminal workflows from memory once their snapshot is persisted.
    pub evict_on_terminal: bool,
    /// Worker used by the single-task fallback decomposition.
    pub fallback_worker: String,
    pub redis: RedisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub work_prefix: String,
    pub result_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stall_window_secs: 300,
            idle_interval_ms: 1000,
            backoff_base_secs: 1.0,
            default_max_retries: 3,
            default_timeout_secs: 300,
            history_limit: 100,
            snapshot_history: 10,
            snapshot_ttl_secs: 3600,
            snapshot_prefix: "workflow".to_string(),
            max_in_flight_per_worker: 16,
            evict_on_terminal: true,
            fallback_worker: "coordinator".to_string(),
            redis: RedisConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            work_prefix: "work".to_string(),
            result_prefix: "result".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn stall_window(&self) -> Duration {
        Duration::from_secs(self.stall_window_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms.max(1))
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    /// Delay before a task that has failed `retry_count` times goes back to
    /// pending.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2f64.powi(retry_count.min(30) as i32);
        Duration::from_secs_f64((self.backoff_base_secs * factor).max(0.0))
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
