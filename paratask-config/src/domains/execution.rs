//! Task execution configuration

use crate::error::ConfigResult;
use crate::validation::{validate_enum_choice, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Log levels a worker process accepts on its command line
pub const WORKER_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Task execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Executable started once per task. When unset, a `paratask-worker`
    /// binary next to the current executable is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_program: Option<PathBuf>,

    /// Extra arguments passed to every worker process
    #[serde(default)]
    pub worker_args: Vec<String>,

    /// Directory used to stage task payloads for workers
    #[serde(default = "default_shared_data_dir")]
    pub shared_data_dir: PathBuf,

    /// Working directory of worker processes; `require()` resolves against it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_root: Option<PathBuf>,

    /// Whether worker stderr lines are re-emitted as orchestrator log events
    #[serde(default = "crate::domains::utils::default_true")]
    pub forward_worker_stderr: bool,

    /// Log level handed to worker processes
    #[serde(default = "default_worker_log_level")]
    pub worker_log_level: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            worker_program: None,
            worker_args: Vec::new(),
            shared_data_dir: default_shared_data_dir(),
            module_root: None,
            forward_worker_stderr: true,
            worker_log_level: default_worker_log_level(),
        }
    }
}

impl Validatable for ExecutionConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.shared_data_dir.as_os_str().is_empty() {
            return Err(self.validation_error("shared_data_dir cannot be empty"));
        }

        if let Some(program) = &self.worker_program {
            if program.as_os_str().is_empty() {
                return Err(self.validation_error("worker_program cannot be empty when set"));
            }
        }

        validate_required_string(&self.worker_log_level, "worker_log_level", self.domain_name())?;
        validate_enum_choice(
            &self.worker_log_level,
            WORKER_LOG_LEVELS,
            "worker_log_level",
            self.domain_name(),
        )?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "execution"
    }
}

// Default value functions
fn default_shared_data_dir() -> PathBuf {
    std::env::temp_dir().join("paratask").join("shared_data")
}

fn default_worker_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_config_defaults() {
        let config = ExecutionConfig::default();
        assert!(config.worker_program.is_none());
        assert!(config.worker_args.is_empty());
        assert!(config.shared_data_dir.ends_with("shared_data"));
        assert!(config.forward_worker_stderr);
        assert_eq!(config.worker_log_level, "warn");
    }

    #[test]
    fn test_execution_config_validation() {
        let mut config = ExecutionConfig::default();
        assert!(config.validate().is_ok());

        config.worker_log_level = "chatty".to_string();
        assert!(config.validate().is_err());

        config.worker_log_level = "debug".to_string();
        config.shared_data_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_worker_program_rejected() {
        let config = ExecutionConfig {
            worker_program: Some(PathBuf::new()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
