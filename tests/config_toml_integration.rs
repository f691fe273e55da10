use bulwark::EngineConfig;
use bulwark::cli::ConfigDiscovery;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_config_serialization_roundtrip() {
    let original_config = EngineConfig::default();

    let toml_str = original_config
        .to_toml_string()
        .expect("Should be able to serialize config to TOML");

    assert!(toml_str.contains("[queue]"), "Should contain the queue table");
    assert!(toml_str.contains("[recovery]"), "Should contain the recovery table");
    assert!(
        !toml_str.contains("store_dir"),
        "Unset store directory should be omitted"
    );

    let deserialized_config = EngineConfig::from_toml_str(&toml_str)
        .expect("Should be able to deserialize TOML string");
    assert_eq!(original_config, deserialized_config);
}

#[test]
fn test_config_file_operations() {
    let mut original_config = EngineConfig::default();
    original_config.persistence.store_dir = Some(PathBuf::from("/var/lib/bulwark/store"));
    original_config.recovery.leak_thresholds.max_timers = 12;

    let temp_file = NamedTempFile::new().expect("Should be able to create temporary file");
    original_config
        .to_toml_file(temp_file.path())
        .expect("Should be able to save config to file");

    let loaded_config = EngineConfig::from_toml_file(temp_file.path())
        .expect("Should be able to load config from file");
    assert_eq!(original_config, loaded_config);
}

#[test]
fn test_handwritten_config() {
    let config = EngineConfig::from_toml_str(
        r#"
        [queue]
        max_queue_size = 50
        per_task_timeout_ms = 2500
        backoff_multiplier = 3.0

        [health]
        max_failure_ratio = 0.5

        [recovery]
        memory_threshold_mb = 2048

        [recovery.leak_thresholds]
        max_operations = 10

        [hooks]
        default_operations = ["task.before"]

        [persistence]
        snapshot_key = "worker-7"
        "#,
    )
    .expect("Should parse a partial configuration");

    assert_eq!(config.queue.max_queue_size, 50);
    assert_eq!(config.queue.per_task_timeout(), Duration::from_millis(2500));
    assert_eq!(config.queue.backoff_multiplier, 3.0);
    assert_eq!(config.health.max_failure_ratio, 0.5);
    assert_eq!(config.recovery.memory_threshold_bytes(), 2048 * 1024 * 1024);
    assert_eq!(config.recovery.leak_thresholds.max_operations, 10);
    assert_eq!(config.hooks.default_operations, vec!["task.before".to_string()]);
    assert_eq!(config.persistence.snapshot_key, "worker-7");
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_values_fail_validation() {
    let config = EngineConfig::from_toml_str("[queue]\nbatch_size = 0\n").unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("batch_size"));
}

#[test]
fn test_malformed_toml_is_an_error() {
    assert!(EngineConfig::from_toml_str("[queue\nmax_retries = ").is_err());
    assert!(EngineConfig::from_toml_str("[queue]\nmax_retries = \"three\"").is_err());
}

#[test]
fn test_override_path_takes_precedence() {
    let temp_file = NamedTempFile::new().unwrap();
    std::fs::write(temp_file.path(), "[queue]\nmax_retries = 7\n").unwrap();

    let config = ConfigDiscovery::load(Some(temp_file.path())).unwrap();
    assert_eq!(config.queue.max_retries, 7);
}
