//! JavaScript worker executor for paratask
//!
//! A worker process receives one payload reference, rebuilds the task's logic
//! inside a Boa context with its scope injected, runs it until a callback (or
//! an uncaught error) produces an outcome and reports that outcome back.

pub mod conversion;
pub mod executor;
pub mod natives;
pub mod params;
pub mod prelude;
pub mod worker;

// Re-export main types for convenience
pub use executor::{execute_payload, TaskExecutor};
pub use params::{is_invocable, is_valid_identifier, scan_parameters, ParameterList, ScanError};
pub use worker::{run_payload_file, run_worker_process};

use thiserror::Error;

/// JavaScript execution errors
#[derive(Error, Debug)]
pub enum JsExecutionError {
    #[error("Context error: {0}")]
    ContextError(String),

    #[error("Invalid scope key '{0}': scope keys must be valid JavaScript identifiers")]
    InvalidScopeKey(String),

    #[error("Output conversion error: {0}")]
    OutputError(String),

    #[error("File read error: {0}")]
    FileReadError(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    Ipc(#[from] paratask_ipc::IpcError),
}
