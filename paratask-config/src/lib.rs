//! Domain-driven configuration management for paratask
//!
//! Configuration is split by functional domain (task execution and logging),
//! each with its own defaults and validation, and can be loaded from a YAML
//! file with `PARATASK_*` environment variable overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

// Re-export domain configurations
pub use domains::{execution::ExecutionConfig, logging::LoggingConfig, ParataskConfig};
