//! Logging initialisation for paratask
//!
//! The orchestrator logs wherever its configuration says. Worker processes
//! always log to stderr because stdout carries the IPC channel.

pub mod init;

pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing, init_worker_tracing};
