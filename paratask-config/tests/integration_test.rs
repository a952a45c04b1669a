//! Integration tests for paratask-config

use paratask_config::domains::logging::{LogFormat, LogLevel};
use paratask_config::*;
use std::io::Write;
use std::path::PathBuf;
use temp_env::with_vars;

#[test]
fn test_default_config_validation() {
    let config = ParataskConfig::default();
    assert!(config.validate_all().is_ok());
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("PARATASK_WORKER_PROGRAM", Some("/opt/paratask/bin/paratask-worker")),
        ("PARATASK_SHARED_DATA_DIR", Some("/var/tmp/paratask")),
        ("PARATASK_WORKER_LOG_LEVEL", Some("DEBUG")),
        ("PARATASK_LOG_LEVEL", Some("debug")),
        ("PARATASK_LOG_FORMAT", Some("json")),
    ];

    with_vars(vars, || {
        let loader = ConfigLoader::new();
        let config = loader.from_env().unwrap();

        assert_eq!(
            config.execution.worker_program,
            Some(PathBuf::from("/opt/paratask/bin/paratask-worker"))
        );
        assert_eq!(config.execution.shared_data_dir, PathBuf::from("/var/tmp/paratask"));
        assert_eq!(config.execution.worker_log_level, "debug");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
    });
}

#[test]
fn test_invalid_env_override_is_reported() {
    with_vars(vec![("PARATASK_LOG_LEVEL", Some("shouty"))], || {
        let result = ConfigLoader::new().from_env();
        assert!(matches!(result, Err(ConfigError::EnvError(_))));
    });
}

#[test]
fn test_custom_prefix() {
    with_vars(vec![("MYAPP_MODULE_ROOT", Some("/srv/tasks"))], || {
        let config = ConfigLoader::with_prefix("MYAPP").from_env().unwrap();
        assert_eq!(config.execution.module_root, Some(PathBuf::from("/srv/tasks")));
    });
}

#[test]
fn test_yaml_config_serialization() {
    let config = ParataskConfig::default();
    let yaml = serde_yaml::to_string(&config).unwrap();

    let parsed: ParataskConfig = serde_yaml::from_str(&yaml).unwrap();
    assert!(parsed.validate_all().is_ok());
    assert_eq!(parsed.execution.shared_data_dir, config.execution.shared_data_dir);
}

#[test]
fn test_load_from_file() {
    let yaml = r#"
execution:
  worker_program: /usr/local/bin/paratask-worker
  worker_args: ["--worker-id", "pool"]
  shared_data_dir: /tmp/paratask-test
  forward_worker_stderr: false

logging:
  level: warn
  format: compact
"#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    with_vars(vec![("PARATASK_LOG_LEVEL", None::<&str>)], || {
        let config = ConfigLoader::new().from_file(file.path()).unwrap();

        assert_eq!(config.execution.worker_args, vec!["--worker-id", "pool"]);
        assert!(!config.execution.forward_worker_stderr);
        assert_eq!(config.execution.worker_log_level, "warn");
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.format, LogFormat::Compact);
    });
}

#[test]
fn test_invalid_file_fails_validation() {
    let yaml = r#"
execution:
  worker_log_level: loud
"#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let result = ConfigLoader::new().from_file(file.path());
    assert!(matches!(result, Err(ConfigError::DomainError { .. })));
}

#[test]
fn test_generate_sample() {
    let sample = ParataskConfig::generate_sample();
    assert!(sample.contains("execution"));
    assert!(sample.contains("shared_data_dir"));
}
