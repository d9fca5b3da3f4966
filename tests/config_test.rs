use conductor::config::{EngineConfig, load_config};
use conductor::error::ConfigError;
use conductor::logging::{LogLevel, resolve_level};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::Level;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

#[test]
fn test_defaults() {
    let config = EngineConfig::default();
    assert_eq!(config.stall_window(), Duration::from_secs(300));
    assert_eq!(config.idle_interval(), Duration::from_secs(1));
    assert_eq!(config.default_timeout(), Duration::from_secs(300));
    assert_eq!(config.default_max_retries, 3);
    assert_eq!(config.max_in_flight_per_worker, 16);
    assert_eq!(config.snapshot_ttl(), Duration::from_secs(3600));
    assert_eq!(config.redis.work_prefix, "work");
    assert_eq!(config.redis.result_prefix, "result");
}

#[test]
fn test_backoff_doubles_from_base() {
    let config = EngineConfig::default();
    assert_eq!(config.backoff(1), Duration::from_secs(2));
    assert_eq!(config.backoff(2), Duration::from_secs(4));
    assert_eq!(config.backoff(3), Duration::from_secs(8));

    let fast = EngineConfig {
        backoff_base_secs: 0.5,
        ..EngineConfig::default()
    };
    assert_eq!(fast.backoff(1), Duration::from_secs(1));
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let file = write_config(
        "stall_window_secs: 30\nmax_in_flight_per_worker: 0\nredis:\n  url: redis://cache:6379/2\n",
    );
    let config = load_config(file.path()).unwrap();

    assert_eq!(config.stall_window(), Duration::from_secs(30));
    assert_eq!(config.max_in_flight_per_worker, 0);
    assert_eq!(config.redis.url, "redis://cache:6379/2");
    assert_eq!(config.redis.work_prefix, "work");
    assert_eq!(config.history_limit, 100);
    assert_eq!(config.fallback_worker, "coordinator");
}

#[test]
fn test_malformed_and_missing_files() {
    let file = write_config("stall_window_secs: [not a number]\n");
    assert!(matches!(load_config(file.path()), Err(ConfigError::Parse { .. })));

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.yaml");
    assert!(matches!(load_config(&missing), Err(ConfigError::Read { .. })));
}

#[test]
fn test_log_level_precedence() {
    assert_eq!(resolve_level(Some(LogLevel::Debug), Some("error")), Level::DEBUG);
    assert_eq!(resolve_level(None, Some("WARN")), Level::WARN);
    assert_eq!(resolve_level(None, Some("nonsense")), Level::INFO);
    assert_eq!(resolve_level(None, None), Level::INFO);
}
